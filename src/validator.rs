//! Static screen for submitted scripts.
//!
//! A cheap textual check that runs before any interpreter work: scripts that
//! advertise intent to reach stripped capabilities are rejected up front with
//! a named pattern, and scripts without the `run` entry point are rejected
//! because they cannot possibly succeed.
//!
//! This is a defense-in-depth layer, not the security boundary; the sandbox
//! builder is authoritative. The screen is deliberately permissive to false
//! negatives (a sufficiently obfuscated bypass attempt can slip through and
//! will hit a nil global instead) and is kept as a pattern table rather than
//! a parser.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::types::SandboxError;

/// A named forbidden pattern.
struct ForbiddenPattern {
    /// Stable name reported in the rejection error.
    name: &'static str,
    regex: Regex,
}

static ENTRY_POINT: OnceLock<Regex> = OnceLock::new();
static FORBIDDEN: OnceLock<Vec<ForbiddenPattern>> = OnceLock::new();

fn entry_point() -> &'static Regex {
    ENTRY_POINT.get_or_init(|| Regex::new(r"function\s+run\s*\(").unwrap())
}

fn forbidden_patterns() -> &'static [ForbiddenPattern] {
    FORBIDDEN.get_or_init(|| {
        let pattern = |name, re: &str| ForbiddenPattern {
            name,
            regex: Regex::new(re).unwrap(),
        };
        vec![
            // Direct references to capability namespaces the sandbox strips.
            pattern("os_facade", r"\bos\s*\."),
            pattern("io_facade", r"\bio\s*\."),
            pattern("module_loader", r"\brequire\b"),
            pattern("code_loader", r"\bload\s*\("),
            pattern("file_loader", r"\bloadfile\b"),
            pattern("file_code_loader", r"\bdofile\b"),
            pattern("environment_get", r"\bgetfenv\b"),
            pattern("environment_set", r"\bsetfenv\b"),
            pattern("debug_facade", r"\bdebug\s*\."),
            // Obfuscated access through the globals table.
            pattern("globals_index", r"_G\s*\["),
            pattern("globals_field", r"_G\s*\."),
            pattern("raw_getter", r"\brawget\s*\("),
            pattern("globals_metatable", r"\bgetmetatable\s*\(\s*_G"),
            // Building a stripped name out of string fragments.
            pattern(
                "name_from_fragments",
                r#"["'](?:os|io|debug|require|load|loadfile|dofile|getfenv|setfenv)["']\s*\.\.|\.\.\s*["'](?:os|io|debug|require|load|loadfile|dofile|getfenv|setfenv)["']"#,
            ),
        ]
    })
}

/// Validates a script without executing it.
///
/// Forbidden patterns take precedence over the entry-point check, so a
/// dangerous script without an entry point reports the dangerous construct.
/// Pure function of the source text; never panics on malformed input.
pub fn validate(source: &str) -> Result<(), SandboxError> {
    for pattern in forbidden_patterns() {
        if pattern.regex.is_match(source) {
            warn!(pattern = pattern.name, "script rejected by static screen");
            return Err(SandboxError::DangerousConstruct(pattern.name.to_string()));
        }
    }

    if !entry_point().is_match(source) {
        return Err(SandboxError::MissingEntry);
    }

    Ok(())
}
