//! Runtime lifecycle and execution service for wasm-sandbox.
//!
//! - [`Runtime`]: owns the engine and the frozen host capability table;
//!   exposes `create`, `execute` and `shutdown`
//! - [`ModuleCache`]: optional content-addressed artifact cache
//! - [`RuntimeService`]: start/stop lifecycle and async execution for
//!   orchestration layers
//!
//! # Example
//!
//! ```ignore
//! use wasm_sandbox_common::RuntimeConfig;
//! use wasm_sandbox_runtime::{InvocationRequest, Runtime};
//!
//! let runtime = Runtime::create(&RuntimeConfig::default())?;
//! let outcome = runtime.execute(&InvocationRequest::new(bytes, "add").with_args(vec![2, 3]))?;
//! assert_eq!(outcome.results, vec![5]);
//! runtime.shutdown();
//! ```

pub mod cache;
pub mod request;
pub mod runtime;
pub mod service;

pub use cache::ModuleCache;
pub use request::{InvocationFailure, InvocationOutcome, InvocationRequest};
pub use runtime::Runtime;
pub use service::{RuntimeService, ServiceState};
