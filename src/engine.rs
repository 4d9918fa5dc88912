//! The public executor: validate, sandbox, marshal, govern, marshal back.
//!
//! [`ScriptExecutor`] is cheap to share and holds the only two pieces of
//! process-wide state the core permits: the read-only [`SandboxConfig`] and
//! the pooled HTTP client. Everything else (interpreter, tool callbacks,
//! governor hook) is created fresh for each call and dropped on every
//! terminal state, so concurrent executions cannot observe each other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::Function;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::governor;
use crate::marshal;
use crate::sandbox::{self, ExecutionLimits};
use crate::tools::ToolMediator;
use crate::types::SandboxError;
use crate::validator;

/// HTTP read timeout in seconds.
const READ_TIMEOUT_SECS: u64 = 30;

/// HTTP connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// User-Agent header sent with tool requests.
const USER_AGENT: &str = concat!("script-sandbox/", env!("CARGO_PKG_VERSION"));

/// Executes agent-generated scripts in per-call sandboxes.
pub struct ScriptExecutor {
    config: Arc<SandboxConfig>,
    client: reqwest::Client,
}

impl ScriptExecutor {
    /// Create an executor with the given process-wide configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config: Arc::new(config),
            client,
        }
    }

    /// The configuration this executor was built with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `source` against a deep copy of `context` and returns the
    /// (possibly mutated) context.
    ///
    /// Pipeline: static validation, fresh sandbox, load, marshal in, bounded
    /// call of `run(ctx)`, marshal out. Each stage maps to one
    /// [`SandboxError`] variant; exactly one `Ok` or one `Err` is returned
    /// per call.
    ///
    /// The interpreter runs on a dedicated worker thread. If the wall-clock
    /// budget elapses first the call returns [`SandboxError::Timeout`]
    /// immediately; a worker still blocked in a tool call finishes on its
    /// own and its result is discarded.
    pub async fn execute(
        &self,
        source: &str,
        context: &JsonValue,
        limits: ExecutionLimits,
    ) -> Result<JsonValue, SandboxError> {
        validator::validate(source)?;
        debug!(
            source_len = source.len(),
            timeout_ms = limits.timeout_ms,
            "executing script"
        );

        let mediator = Arc::new(ToolMediator::new(
            self.client.clone(),
            Handle::current(),
            Arc::clone(&self.config),
        ));
        let source = source.to_string();
        let context = context.clone();
        let worker_limits = limits.clone();
        let (tx, rx) = oneshot::channel();

        // mlua states are not Send; the whole pipeline runs on the thread
        // that owns the state.
        std::thread::spawn(move || {
            let result = run_invocation(&source, &context, mediator, &worker_limits);
            if tx.send(result).is_err() {
                debug!("result receiver dropped; discarding worker outcome");
            }
        });

        let started = Instant::now();
        match tokio::time::timeout(Duration::from_millis(limits.timeout_ms), rx).await {
            Ok(Ok(result)) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "script execution finished"
                );
                result
            }
            Ok(Err(_)) => Err(SandboxError::RuntimeError(
                "script worker thread panicked".to_string(),
            )),
            Err(_) => {
                warn!(
                    timeout_ms = limits.timeout_ms,
                    "script execution cancelled at wall-clock budget"
                );
                Err(SandboxError::Timeout(limits.timeout_ms))
            }
        }
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// One complete invocation on the worker thread: fresh state in, result out,
/// state dropped on return.
fn run_invocation(
    source: &str,
    context: &JsonValue,
    mediator: Arc<ToolMediator>,
    limits: &ExecutionLimits,
) -> Result<JsonValue, SandboxError> {
    let lua = sandbox::build(mediator, limits)?;

    lua.load(source)
        .set_name("agent script")
        .exec()
        .map_err(|e| SandboxError::LoadFailed(e.to_string()))?;

    let entry: Function = lua
        .globals()
        .get("run")
        .map_err(|_| SandboxError::RuntimeError("global 'run' is not a function".to_string()))?;

    let arg = marshal::to_lua(&lua, context)
        .map_err(|e| SandboxError::MarshalFailed(e.to_string()))?;

    let result = governor::call_bounded(&lua, &entry, arg, limits)?;

    let mut visited = HashSet::new();
    marshal::from_lua(result, &mut visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_executor_creation() {
        let executor = ScriptExecutor::default();
        assert!(executor.config().allowed_hosts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_identity_script() {
        let executor = ScriptExecutor::default();
        let context = json!({"k": "v"});
        let result = executor
            .execute(
                "function run(c) return c end",
                &context,
                ExecutionLimits::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, context);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validation_runs_before_any_execution() {
        let executor = ScriptExecutor::default();
        let result = executor
            .execute(
                "function run(c) os.execute('x') return c end",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(SandboxError::DangerousConstruct(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_entry() {
        let executor = ScriptExecutor::default();
        let result = executor
            .execute(
                "function other(c) return c end",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::MissingEntry)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_failure_on_bad_syntax() {
        let executor = ScriptExecutor::default();
        // Passes the textual screen, fails the parser.
        let result = executor
            .execute(
                "function run(c) return c end end end",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::LoadFailed(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runtime_error_surfaces() {
        let executor = ScriptExecutor::default();
        let result = executor
            .execute(
                "function run(c) error('kaboom') end",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        match result {
            Err(SandboxError::RuntimeError(msg)) => assert!(msg.contains("kaboom")),
            other => panic!("expected RuntimeError, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entry_shadowed_by_non_function() {
        let executor = ScriptExecutor::default();
        let result = executor
            .execute(
                "function run(c) return c end\nrun = 3",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::RuntimeError(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unconvertible_result() {
        let executor = ScriptExecutor::default();
        let result = executor
            .execute(
                "function run(c) return coroutine.create(function() end) end",
                &json!({}),
                ExecutionLimits::default(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::ConvertFailed(_))));
    }
}
