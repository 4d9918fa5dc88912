//! Execution limits and per-invocation sandbox construction.
//!
//! Every `execute` call gets a brand-new interpreter: dangerous capability
//! namespaces are nilled out, the allocator ceiling is applied, and the tool
//! tables are installed as host callbacks. Nothing survives an invocation.
//!
//! The stripping step is the authoritative security barrier (the static
//! validator is only a screen in front of it): a script that reaches for
//! `os`, `io`, the loaders, or `debug` observes nil, whatever the validator
//! thought of its source text.

use std::collections::HashSet;
use std::sync::Arc;

use mlua::Lua;
use serde::{Deserialize, Serialize};

use crate::marshal;
use crate::tools::ToolMediator;
use crate::types::SandboxError;

/// Globals cleared from every fresh interpreter.
///
/// `package` rides along with `require`; both are halves of the module loader.
/// Names absent from this interpreter build (`getfenv`/`setfenv` on Lua 5.4,
/// `debug` when not loaded) are skipped rather than treated as failures.
pub const STRIPPED_GLOBALS: [&str; 10] = [
    "os", "io", "package", "require", "load", "loadfile", "dofile", "getfenv", "setfenv", "debug",
];

/// Per-call resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock budget in milliseconds.
    pub timeout_ms: u64,
    /// Interpreter allocator ceiling in bytes.
    pub memory_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,          // 30 seconds
            memory_bytes: 10_000_000,    // 10 MB
        }
    }
}

impl ExecutionLimits {
    /// Create new limits with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight limits for untrusted one-shot scripts.
    pub fn strict() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_bytes: 5_000_000,
        }
    }

    /// Builder: set the wall-clock budget.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Builder: set the memory ceiling.
    pub fn with_memory_bytes(mut self, memory_bytes: usize) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }
}

/// Builds a fresh interpreter state with capabilities stripped and the tool
/// surface installed.
pub fn build(mediator: Arc<ToolMediator>, limits: &ExecutionLimits) -> Result<Lua, SandboxError> {
    let lua = Lua::new();

    let globals = lua.globals();
    for name in STRIPPED_GLOBALS {
        let present = globals.contains_key(name).map_err(|e| {
            SandboxError::SandboxBuildFailed(format!("failed to inspect global '{name}': {e}"))
        })?;
        if present {
            globals.raw_set(name, mlua::Value::Nil).map_err(|e| {
                SandboxError::SandboxBuildFailed(format!("failed to clear global '{name}': {e}"))
            })?;
        }
    }

    drop(globals);

    lua.set_memory_limit(limits.memory_bytes).map_err(|e| {
        SandboxError::SandboxBuildFailed(format!("failed to apply memory ceiling: {e}"))
    })?;

    install_tools(&lua, mediator)
        .map_err(|e| SandboxError::SandboxBuildFailed(format!("failed to install tools: {e}")))?;

    Ok(lua)
}

/// Installs the `http` and `json` callback tables.
///
/// Each callback delegates to the [`ToolMediator`] and always returns a
/// value: tool failures become script-visible strings, never interpreter
/// errors.
fn install_tools(lua: &Lua, mediator: Arc<ToolMediator>) -> mlua::Result<()> {
    let globals = lua.globals();

    let http = lua.create_table()?;

    let m = Arc::clone(&mediator);
    http.set(
        "get",
        lua.create_function(move |lua, url: String| {
            let body = m.http_get(&url);
            lua.create_string(&body)
        })?,
    )?;

    let m = Arc::clone(&mediator);
    http.set(
        "post",
        lua.create_function(move |lua, (url, opts): (String, Option<mlua::Table>)| {
            let mut headers = Vec::new();
            let mut body = None;
            if let Some(opts) = opts {
                if let Ok(Some(header_table)) = opts.get::<_, Option<mlua::Table>>("headers") {
                    for pair in header_table.pairs::<String, String>() {
                        match pair {
                            Ok((name, value)) => headers.push((name, value)),
                            Err(_) => {
                                return lua
                                    .create_string("Request failed: invalid headers table")
                            }
                        }
                    }
                }
                if let Ok(Some(b)) = opts.get::<_, Option<mlua::String>>("body") {
                    body = Some(b.as_bytes().to_vec());
                }
            }
            let response = m.http_post(&url, headers, body);
            lua.create_string(&response)
        })?,
    )?;

    globals.set("http", http)?;

    let json = lua.create_table()?;

    let m = Arc::clone(&mediator);
    json.set(
        "decode",
        lua.create_function(move |lua, text: mlua::String| {
            let text = match text.to_str() {
                Ok(text) => text,
                Err(_) => {
                    let msg = lua.create_string("JSON decode error: input is not valid UTF-8")?;
                    return Ok(mlua::Value::String(msg));
                }
            };
            match m.json_decode(text) {
                Ok(decoded) => marshal::to_lua(lua, &decoded),
                Err(msg) => Ok(mlua::Value::String(lua.create_string(&msg)?)),
            }
        })?,
    )?;

    let m = Arc::clone(&mediator);
    json.set(
        "encode",
        lua.create_function(move |lua, value: mlua::Value| {
            let mut visited = HashSet::new();
            let text = match marshal::from_lua(value, &mut visited) {
                Ok(bag) => match m.json_encode(&bag) {
                    Ok(text) => text,
                    Err(msg) => msg,
                },
                Err(SandboxError::ConvertFailed(msg)) => format!("JSON encode error: {msg}"),
                Err(e) => format!("JSON encode error: {e}"),
            };
            lua.create_string(&text)
        })?,
    )?;

    globals.set("json", json)?;

    Ok(())
}
