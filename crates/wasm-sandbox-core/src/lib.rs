//! Core Wasmtime runtime for wasm-sandbox.
//!
//! This crate provides the fundamental WebAssembly execution capabilities:
//! - [`WasmEngine`]: Shared engine with lifecycle state and live-resource counters
//! - [`CompiledModule`]: Validated, compiled artifact with its export table
//! - [`HostImports`]: The host capability table bound at instantiation
//! - [`LiveInstance`]: One isolated instance, released on drop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               WasmEngine + HostImports                  │
//! │  (Shared across all invocations, read-only)             │
//! │  - Open/closed state                                    │
//! │  - Live artifact / instance counters                    │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Immutable, one per invocation unless cached)          │
//! │  - Compiled machine code                                │
//! │  - Export table (name -> signature)                     │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         LiveInstance (Store<WorkerContext>)             │
//! │  (Per-invocation, isolated, released on every path)     │
//! │  - Linear memory, tables, globals                       │
//! │  - Captured console output and guest logs               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod console;
pub mod engine;
pub mod imports;
pub mod instance;
pub mod invoke;
pub mod module;
pub mod store;
pub mod trap;

pub use engine::WasmEngine;
pub use imports::HostImports;
pub use instance::{InstanceReport, LiveInstance};
pub use invoke::{ExportTable, FuncSignature, WordType};
pub use module::CompiledModule;
pub use store::{ExecutionMetrics, LogEntry, LogLevel, LogSource, Phase, WorkerContext};
pub use trap::GuestAbort;
