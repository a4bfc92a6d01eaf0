//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `cubehost_`
//! - 영역명: `lifecycle_`, `reconcile_`, `cache_`, `broadcast_`, `exec_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(cubehost_core::metrics::EXEC_TOTAL, "result" => "success").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 작업 레이블 키 (create, start, stop, restart, delete, recreate, update)
pub const LABEL_OPERATION: &str = "operation";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 캐시 네임스페이스 레이블 키 (inspect, file)
pub const LABEL_NAMESPACE: &str = "namespace";

// ─── Lifecycle 메트릭 ──────────────────────────────────────────────

/// Lifecycle: 수행된 작업 수 (counter, labels: operation, result)
pub const LIFECYCLE_OPERATIONS_TOTAL: &str = "cubehost_lifecycle_operations_total";

/// Lifecycle: 작업 소요 시간 (histogram, 초, label: operation)
pub const LIFECYCLE_OPERATION_DURATION_SECONDS: &str =
    "cubehost_lifecycle_operation_duration_seconds";

/// Lifecycle: 관리 중인 서버 수 (gauge)
pub const LIFECYCLE_MANAGED_SERVERS: &str = "cubehost_lifecycle_managed_servers";

// ─── Reconcile 메트릭 ──────────────────────────────────────────────

/// Reconcile: 일괄 재조정 실행 수 (counter)
pub const RECONCILE_RUNS_TOTAL: &str = "cubehost_reconcile_runs_total";

/// Reconcile: 서버 단위 재조정 실패 수 (counter)
pub const RECONCILE_FAILURES_TOTAL: &str = "cubehost_reconcile_failures_total";

// ─── Cache 메트릭 ──────────────────────────────────────────────────

/// Cache: 적중 수 (counter, label: namespace)
pub const CACHE_HITS_TOTAL: &str = "cubehost_cache_hits_total";

/// Cache: 미스 수 (counter, label: namespace)
pub const CACHE_MISSES_TOTAL: &str = "cubehost_cache_misses_total";

/// Cache: 무효화 수 (counter, label: namespace)
pub const CACHE_INVALIDATIONS_TOTAL: &str = "cubehost_cache_invalidations_total";

// ─── Broadcast 메트릭 ──────────────────────────────────────────────

/// Broadcast: 발행된 이벤트 수 (counter)
pub const BROADCAST_EVENTS_TOTAL: &str = "cubehost_broadcast_events_total";

/// Broadcast: 병합으로 대체된 이벤트 수 (counter)
pub const BROADCAST_EVENTS_COALESCED_TOTAL: &str = "cubehost_broadcast_events_coalesced_total";

/// Broadcast: 연결된 관찰자 수 (gauge)
pub const BROADCAST_SUBSCRIBERS: &str = "cubehost_broadcast_subscribers";

// ─── Exec 메트릭 ───────────────────────────────────────────────────

/// Exec: 컨테이너 내부 명령 실행 수 (counter, label: result)
pub const EXEC_TOTAL: &str = "cubehost_exec_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "cubehost_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "cubehost_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 라이프사이클 작업 소요 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 600s 범위 (이미지 pull 포함)
pub const OPERATION_DURATION_BUCKETS: [f64; 10] =
    [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0, 600.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `cubehost-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Lifecycle
    describe_counter!(
        LIFECYCLE_OPERATIONS_TOTAL,
        "Total number of server lifecycle operations by operation and result"
    );
    describe_histogram!(
        LIFECYCLE_OPERATION_DURATION_SECONDS,
        "Lifecycle operation latency in seconds"
    );
    describe_gauge!(
        LIFECYCLE_MANAGED_SERVERS,
        "Number of servers with metadata on disk"
    );

    // Reconcile
    describe_counter!(
        RECONCILE_RUNS_TOTAL,
        "Total number of batch recreate runs"
    );
    describe_counter!(
        RECONCILE_FAILURES_TOTAL,
        "Total number of per-server failures during batch recreate"
    );

    // Cache
    describe_counter!(CACHE_HITS_TOTAL, "Cache hits by namespace");
    describe_counter!(CACHE_MISSES_TOTAL, "Cache misses by namespace");
    describe_counter!(
        CACHE_INVALIDATIONS_TOTAL,
        "Explicit cache invalidations by namespace"
    );

    // Broadcast
    describe_counter!(
        BROADCAST_EVENTS_TOTAL,
        "Total number of events published to observers"
    );
    describe_counter!(
        BROADCAST_EVENTS_COALESCED_TOTAL,
        "Events replaced by a newer event on the same topic before delivery"
    );
    describe_gauge!(BROADCAST_SUBSCRIBERS, "Currently connected observers");

    // Exec
    describe_counter!(EXEC_TOTAL, "In-container command executions by result");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Cubehost daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
