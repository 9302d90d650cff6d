//! Host capability set for wasm-sandbox.
//!
//! This crate fills a [`HostImports`](wasm_sandbox_core::HostImports) table
//! with the functions guest modules may call. The table is the sandbox's
//! entire attack surface.
//!
//! # Interfaces
//!
//! - [`logging`]: `env.log`, leveled logging from guest code
//! - [`linker`]: registration of `env.log`, `env.abort` and the WASI
//!   preview1 console shims
//!
//! # Security Model
//!
//! 1. **No ambient authority**: no filesystem, network, environment or
//!    process access is linked.
//! 2. **Capability groups**: each group is linked only when its
//!    [`Capabilities`](wasm_sandbox_common::Capabilities) flag is set; a
//!    module importing a disabled group fails to instantiate.
//! 3. **Checked guest memory**: pointers handed to host functions are
//!    bounds-checked; a bad pointer fails the host call.

pub mod linker;
pub mod logging;

pub use linker::{host_imports, register_all};
pub use logging::LoggingHost;
