//! Script Sandbox - hardened execution of agent-generated Lua scripts
//!
//! AI agents produce short Lua programs; this crate runs them safely. Each
//! script declares `function run(ctx)`, receives a structured context bag,
//! orchestrates work through a mediated tool surface (`http.get`,
//! `http.post`, `json.decode`, `json.encode`), and returns the mutated bag
//! to the caller as structured data.
//!
//! ## Security model
//!
//! Three layers, outermost first:
//!
//! 1. **Static screen** - scripts referencing stripped capabilities
//!    (`os`, `io`, loaders, `debug`, globals-table tricks) are rejected
//!    before any interpreter work, with a named pattern.
//! 2. **Capability stripping** - every call gets a fresh interpreter with
//!    the dangerous globals set to nil. This is the authoritative barrier.
//! 3. **Mediated tools** - the only reachable effects are host callbacks
//!    that enforce a hostname allowlist and bounded, simplified responses.
//!    Tool failures surface inside the script as prefixed strings, never
//!    as executor errors.
//!
//! A per-call governor bounds wall-clock time (VM instruction hook plus a
//! caller-side deadline) and memory (interpreter allocator ceiling).
//!
//! ## Example
//!
//! ```ignore
//! use script_sandbox::{ExecutionLimits, SandboxConfig, ScriptExecutor};
//! use serde_json::json;
//!
//! let executor = ScriptExecutor::new(SandboxConfig::with_allowed_hosts([
//!     "api.example.com",
//! ]));
//!
//! let source = r#"
//!     function run(c)
//!         c.greeting = "hello, " .. c.name
//!         return c
//!     end
//! "#;
//!
//! let result = executor
//!     .execute(source, &json!({"name": "world"}), ExecutionLimits::default())
//!     .await?;
//!
//! assert_eq!(result["greeting"], "hello, world");
//! ```

pub mod config;
pub mod engine;
pub mod governor;
pub mod marshal;
pub mod sandbox;
pub mod tools;
pub mod types;
pub mod validator;

pub use config::SandboxConfig;
pub use engine::ScriptExecutor;
pub use marshal::CIRCULAR_REF_KEY;
pub use sandbox::{ExecutionLimits, STRIPPED_GLOBALS};
pub use types::SandboxError;
pub use validator::validate;
