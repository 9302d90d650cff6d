//! Classification of guest execution failures.
//!
//! Everything that goes wrong inside guest code reaches the host as a
//! [`wasmtime::Error`]. [`classify`] maps it onto a [`TrapCause`] so callers
//! get a stable tag instead of an engine-specific message.

use wasmtime::Trap;
use wasmtime_wasi::I32Exit;

use wasm_sandbox_common::{SandboxError, TrapCause};

/// Error raised by the `env.abort` host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("guest aborted with code {code}")]
pub struct GuestAbort {
    /// Code supplied by the guest.
    pub code: i32,
}

/// Map an engine trap code to a cause tag.
pub fn cause_for_trap(trap: Trap) -> TrapCause {
    match trap {
        Trap::MemoryOutOfBounds | Trap::HeapMisaligned | Trap::TableOutOfBounds => {
            TrapCause::OutOfBounds
        }
        Trap::IntegerDivisionByZero | Trap::IntegerOverflow | Trap::BadConversionToInteger => {
            TrapCause::DivideFault
        }
        Trap::UnreachableCodeReached => TrapCause::Unreachable,
        Trap::StackOverflow => TrapCause::StackExhaustion,
        Trap::OutOfFuel => TrapCause::OutOfFuel,
        _ => TrapCause::Other,
    }
}

/// Classify an error returned by guest code.
///
/// Engine traps map through [`cause_for_trap`]; guest-requested exits are
/// [`TrapCause::ExplicitAbort`]; anything else was raised by a host
/// function and is [`TrapCause::HostCallFailure`].
pub fn classify(error: &wasmtime::Error) -> TrapCause {
    if let Some(trap) = error.downcast_ref::<Trap>() {
        cause_for_trap(*trap)
    } else if error.downcast_ref::<GuestAbort>().is_some()
        || error.downcast_ref::<I32Exit>().is_some()
    {
        TrapCause::ExplicitAbort
    } else {
        TrapCause::HostCallFailure
    }
}

/// Whether the guest ended the call with WASI `proc_exit(0)`.
pub fn is_clean_exit(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<I32Exit>()
        .is_some_and(|exit| exit.0 == 0)
}

/// Convert an error from a guest call into [`SandboxError::ExecutionTrap`].
pub fn execution_trap(error: &wasmtime::Error) -> SandboxError {
    SandboxError::trap(classify(error), error.root_cause().to_string())
}

/// Convert an error from instantiation into [`SandboxError::Instantiate`].
///
/// Only errors raised while running guest code carry a cause; link errors
/// (missing imports, type mismatches) do not.
pub fn instantiate_failure(error: &wasmtime::Error) -> SandboxError {
    let cause = if error.downcast_ref::<Trap>().is_some()
        || error.downcast_ref::<GuestAbort>().is_some()
        || error.downcast_ref::<I32Exit>().is_some()
    {
        Some(classify(error))
    } else {
        None
    };

    SandboxError::Instantiate {
        reason: format!("{error:#}"),
        cause,
    }
}
