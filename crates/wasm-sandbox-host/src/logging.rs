//! `env.log` implementation.
//!
//! Guest code passes a level and a `(ptr, len)` UTF-8 buffer in its exported
//! memory. The message is recorded on the instance's [`WorkerContext`] and
//! emitted through `tracing` with `stream = "log"`.

use tracing::warn;
use wasmtime::{Caller, Extern};

use wasm_sandbox_core::store::{LogLevel, LogSource, WorkerContext};

/// Host side of the guest logging interface.
pub struct LoggingHost;

impl LoggingHost {
    /// Record `message` at `level`.
    pub fn log(ctx: &mut WorkerContext, level: LogLevel, message: &str) {
        ctx.record(level, LogSource::Guest, message);
    }

    /// Handle one `env.log(level, ptr, len)` call.
    ///
    /// # Errors
    ///
    /// Fails the host call if the buffer is negative, out of bounds, or the
    /// module exports no `memory`.
    pub fn log_from_guest(
        caller: &mut Caller<'_, WorkerContext>,
        level: i32,
        ptr: i32,
        len: i32,
    ) -> wasmtime::Result<()> {
        let message = read_guest_str(caller, ptr, len)?;
        Self::log(caller.data_mut(), level_from_i32(level), &message);
        Ok(())
    }
}

/// Map a guest level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; anything else is info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Read a UTF-8 string from the caller's exported memory.
///
/// Invalid UTF-8 is replaced rather than rejected.
#[allow(clippy::cast_sign_loss)]
fn read_guest_str(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<String> {
    if ptr < 0 || len < 0 {
        warn!(ptr, len, "Negative guest buffer");
        return Err(wasmtime::Error::msg(format!(
            "invalid guest buffer: ptr={ptr} len={len}"
        )));
    }

    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        warn!("Guest module exports no memory");
        return Err(wasmtime::Error::msg("guest module exports no memory"));
    };

    let data = memory.data(&*caller);
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            warn!(start, len, memory_size = data.len(), "Guest buffer out of bounds");
            wasmtime::Error::msg(format!("guest buffer {start}+{len} out of bounds"))
        })?;

    Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
}
