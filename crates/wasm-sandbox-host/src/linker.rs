//! Host function registration for Wasmtime linkers.
//!
//! This module fills a [`HostImports`] table according to its
//! [`Capabilities`](wasm_sandbox_common::Capabilities):
//!
//! | import | capability |
//! |--------|------------|
//! | `env.log(level, ptr, len)` | `logging` |
//! | `env.abort(code)` | always |
//! | `wasi_snapshot_preview1.*` | `console` |

use tracing::{debug, info};
use wasmtime::{Caller, Linker};

use wasm_sandbox_common::{Capabilities, SandboxError};
use wasm_sandbox_core::store::WorkerContext;
use wasm_sandbox_core::{GuestAbort, HostImports, WasmEngine};

use crate::logging::LoggingHost;

/// Build the host capability table for `engine`.
///
/// # Errors
///
/// Returns [`SandboxError::HostBinding`] if any function cannot be
/// registered.
pub fn host_imports(
    engine: &WasmEngine,
    capabilities: Capabilities,
) -> Result<HostImports, SandboxError> {
    let mut imports = HostImports::new(engine, capabilities);
    register_all(&mut imports)?;
    Ok(imports)
}

/// Register every host function enabled by the table's capabilities.
pub fn register_all(imports: &mut HostImports) -> Result<(), SandboxError> {
    let capabilities = imports.capabilities().clone();

    register_abort(imports.linker_mut())?;

    if capabilities.logging {
        register_logging(imports.linker_mut())?;
    }

    if capabilities.console {
        register_wasi(imports.linker_mut())?;
    }

    info!(
        logging = capabilities.logging,
        console = capabilities.console,
        clock = capabilities.clock,
        "Host capabilities installed"
    );

    Ok(())
}

/// Register the logging host function.
///
/// Registers `env::log(level: i32, ptr: i32, len: i32)` which allows guest
/// code to emit logs at various levels (debug, info, warn, error).
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in guest memory
/// - `len`: Length of the message in bytes (UTF-8)
///
/// An out-of-range pointer or a module without an exported `memory` fails
/// the call.
pub fn register_logging(linker: &mut Linker<WorkerContext>) -> Result<(), SandboxError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, WorkerContext>,
             level: i32,
             ptr: i32,
             len: i32|
             -> wasmtime::Result<()> {
                LoggingHost::log_from_guest(&mut caller, level, ptr, len)
            },
        )
        .map_err(|e| SandboxError::host_binding(format!("Failed to register env::log: {e}")))?;

    Ok(())
}

/// Register `env::abort(code: i32)`.
///
/// The call never returns; the invocation ends with an explicit-abort trap.
pub fn register_abort(linker: &mut Linker<WorkerContext>) -> Result<(), SandboxError> {
    linker
        .func_wrap(
            "env",
            "abort",
            |caller: Caller<'_, WorkerContext>, code: i32| -> wasmtime::Result<()> {
                debug!(request_id = %caller.data().request_id, code, "Guest abort");
                Err(GuestAbort { code }.into())
            },
        )
        .map_err(|e| SandboxError::host_binding(format!("Failed to register env::abort: {e}")))?;

    Ok(())
}

/// Register the WASI preview1 shims.
///
/// The context behind them has stdout/stderr captured to the log and no
/// preopens, environment, arguments or sockets.
pub fn register_wasi(linker: &mut Linker<WorkerContext>) -> Result<(), SandboxError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, WorkerContext::wasi_mut).map_err(|e| {
        SandboxError::host_binding(format!("Failed to register WASI preview1 shims: {e}"))
    })
}
