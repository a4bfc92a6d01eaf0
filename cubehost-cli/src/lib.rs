//! cubehost CLI library.
//!
//! Exposes argument definitions, command handlers and output rendering so
//! integration tests can drive commands against an in-memory runtime.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
