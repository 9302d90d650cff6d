//! Common types, errors, and configuration for wasm-sandbox.
//!
//! This crate provides shared functionality used across the wasm-sandbox workspace:
//! - [`SandboxError`]: the error taxonomy for every stage of an invocation
//! - Configuration structures for the engine, executions and host capabilities
//! - The [`Word`] type used for arguments and results

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{Capabilities, EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, LogFormat, LoggingConfig};
pub use error::{ErrorClass, SandboxError, TrapCause};

/// A 64-bit argument or result value exchanged with guest functions.
pub type Word = u64;
