//! Error taxonomy for script execution.
//!
//! Every way an [`execute`](crate::ScriptExecutor::execute) call can fail maps
//! to exactly one variant here, in pipeline order: validation, sandbox
//! construction, source loading, input marshalling, bounded execution, output
//! conversion. Tool-level failures (HTTP, JSON) are deliberately *not* part of
//! this taxonomy; they surface inside the script as prefixed strings and the
//! executor never sees them.
//!
//! # Error Handling
//!
//! All errors implement `std::error::Error` with human-readable, stable
//! messages. Callers that need the machine-readable kind (e.g. to build a
//! `{kind, message}` response) use [`SandboxError::kind`].
//!
//! ```ignore
//! match executor.execute(source, &ctx, limits).await {
//!     Ok(result) => println!("{result}"),
//!     Err(e) => eprintln!("{}: {}", e.kind(), e),
//! }
//! ```

use thiserror::Error;

/// Errors surfaced by validation and execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The script does not declare the `run(ctx)` entry function.
    #[error("script is missing entry function 'run'")]
    MissingEntry,

    /// The script matched a forbidden pattern in the static screen.
    ///
    /// The contained value names the pattern that matched.
    #[error("script contains a dangerous construct: {0}")]
    DangerousConstruct(String),

    /// A fresh sandbox could not be constructed.
    ///
    /// Indicates host misconfiguration rather than a bad script.
    #[error("sandbox construction failed: {0}")]
    SandboxBuildFailed(String),

    /// The interpreter rejected the source at parse/load time.
    #[error("script failed to load: {0}")]
    LoadFailed(String),

    /// The input context could not be converted into interpreter values.
    #[error("input conversion failed: {0}")]
    MarshalFailed(String),

    /// The interpreter raised an error while running `run`.
    #[error("script execution failed: {0}")]
    RuntimeError(String),

    /// Wall-clock budget exhausted.
    ///
    /// The contained value is the budget in milliseconds.
    #[error("script execution timed out after {0}ms")]
    Timeout(u64),

    /// The interpreter allocator hit its memory ceiling.
    ///
    /// The contained value is the ceiling in bytes. Accounting is
    /// best-effort, not byte-exact.
    #[error("script exceeded memory ceiling ({0} bytes)")]
    MemoryExceeded(usize),

    /// The value returned by `run` could not be converted back to a bag.
    #[error("output conversion failed: {0}")]
    ConvertFailed(String),
}

impl SandboxError {
    /// Stable machine-readable name for this error's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::MissingEntry => "MissingEntry",
            SandboxError::DangerousConstruct(_) => "DangerousConstruct",
            SandboxError::SandboxBuildFailed(_) => "SandboxBuildFailed",
            SandboxError::LoadFailed(_) => "LoadFailed",
            SandboxError::MarshalFailed(_) => "MarshalFailed",
            SandboxError::RuntimeError(_) => "RuntimeError",
            SandboxError::Timeout(_) => "Timeout",
            SandboxError::MemoryExceeded(_) => "MemoryExceeded",
            SandboxError::ConvertFailed(_) => "ConvertFailed",
        }
    }
}
