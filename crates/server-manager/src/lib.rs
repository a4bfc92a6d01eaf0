//! # cubehost-manager
//!
//! Bedrock 서버 컨테이너의 생성, 재조정, 상태 동기화를 담당합니다.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ManagerError`)
//! - [`config`]: Manager configuration (`ManagerConfig`, builder)
//! - [`network`]: Network/port policy (`resolve`)
//! - [`spec`]: Deterministic container spec construction (`build`, `ContainerSpec`)
//! - [`docker`]: Docker API abstraction (`DockerClient` trait, `BollardDockerClient`)
//! - [`metadata`]: Per-server JSON records (`MetadataStore`)
//! - [`cache`]: Namespaced TTL cache (`TtlCache`)
//! - [`broadcast`]: Coalescing push hub (`BroadcastHub`, `Subscription`)
//! - [`event`]: Server lifecycle events (`ServerEvent`, `ServerEventKind`)
//! - [`exec`]: argv execution and console tokenizer (`CommandExecutor`, `tokenize`)
//! - [`locks`]: Per-server async locks (`KeyedLocks`)
//! - [`lifecycle`]: Main orchestrator (`LifecycleManager`, `LifecycleManagerBuilder`)
//!
//! # Architecture
//!
//! ```text
//! request --> LifecycleManager --KeyedLocks--> MetadataStore
//!                  |                                |
//!                  |                     network::resolve + spec::build
//!                  |                                |
//!                  +---------------------> DockerClient (timeout)
//!                  |
//!             TtlCache.invalidate --> BroadcastHub.publish --> Subscription
//! ```

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod docker;
pub mod error;
pub mod event;
pub mod exec;
pub mod lifecycle;
pub mod locks;
pub mod metadata;
pub mod network;
pub mod spec;

// --- Public API Re-exports ---

// Lifecycle (main orchestrator)
pub use lifecycle::{
    BatchReport, CreateOutcome, DeleteMode, LifecycleManager, LifecycleManagerBuilder, NewServer,
    ReconcileResult, ServerOutcome, ServerUpdate,
};

// Configuration
pub use config::{ManagerConfig, ManagerConfigBuilder};

// Error
pub use error::ManagerError;

// Events
pub use event::{ServerEvent, ServerEventKind};

// Docker API
pub use docker::{BollardDockerClient, DockerClient, ExecOutput};

// Spec building
pub use spec::{ContainerSpec, MountSpec, PortSpec, RestartPolicy};

// State sync
pub use broadcast::{BroadcastHub, Subscription};
pub use cache::TtlCache;

// Execution
pub use exec::{CommandExecutor, PlayerAction, tokenize};

// Metadata
pub use metadata::MetadataStore;
