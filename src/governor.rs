//! Bounded invocation of the entry function.
//!
//! The governor runs on the interpreter's worker thread and enforces the
//! wall-clock budget from inside the VM: an instruction hook checks the
//! deadline every few thousand instructions and aborts the interpreter when
//! it passes, so a `while true do end` loop cannot outlive its budget. The
//! memory ceiling is enforced by the allocator installed at sandbox build
//! time; a breach surfaces here as a distinct failure.
//!
//! The caller-side guarantee that `execute` returns `Err(Timeout)` within
//! the budget even when the worker is stuck in a blocking tool call lives in
//! [`crate::engine`], which awaits the worker with `tokio::time::timeout`
//! and discards any late result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua};
use tracing::debug;

use crate::sandbox::ExecutionLimits;
use crate::types::SandboxError;

/// Instructions between deadline checks. Low enough to catch tight loops
/// within milliseconds, high enough to keep hook overhead negligible.
const DEADLINE_CHECK_INTERVAL: u32 = 8192;

const DEADLINE_MESSAGE: &str = "execution deadline exceeded";

/// Calls `entry` with `arg`, bounded by `limits`.
///
/// Outcomes: a normal return propagates; a deadline abort is `Timeout`; an
/// allocator breach is `MemoryExceeded`; any other interpreter error is
/// `RuntimeError` with the interpreter's message.
pub fn call_bounded<'lua>(
    lua: &'lua Lua,
    entry: &Function<'lua>,
    arg: mlua::Value<'lua>,
    limits: &ExecutionLimits,
) -> Result<mlua::Value<'lua>, SandboxError> {
    let deadline = Instant::now() + Duration::from_millis(limits.timeout_ms);
    let deadline_hit = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&deadline_hit);
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                flag.store(true, Ordering::SeqCst);
                Err(mlua::Error::RuntimeError(DEADLINE_MESSAGE.to_string()))
            } else {
                Ok(())
            }
        },
    );

    let started = Instant::now();
    let outcome = entry.call::<_, mlua::Value>(arg);
    // Marshalling the result out is not metered.
    lua.remove_hook();

    match outcome {
        Ok(value) => {
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                used_memory = lua.used_memory(),
                "entry returned"
            );
            Ok(value)
        }
        Err(err) => Err(classify(&err, deadline_hit.load(Ordering::SeqCst), limits)),
    }
}

fn classify(err: &mlua::Error, deadline_hit: bool, limits: &ExecutionLimits) -> SandboxError {
    if deadline_hit {
        return SandboxError::Timeout(limits.timeout_ms);
    }
    match err {
        mlua::Error::MemoryError(_) => SandboxError::MemoryExceeded(limits.memory_bytes),
        // Host-callback errors wrap their cause; classify the cause.
        mlua::Error::CallbackError { cause, .. } => classify(cause.as_ref(), false, limits),
        other => SandboxError::RuntimeError(other.to_string()),
    }
}
