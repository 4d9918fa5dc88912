//! Process-wide sandbox configuration.
//!
//! Both fields are read-only after startup: the executor clones the config
//! into an `Arc` and never mutates it. Loading from a file is the caller's
//! concern; this struct deserializes cleanly from whatever format they use.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Configuration shared by every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Hostnames the `http` tool may reach. Hosts ending in `.local` are
    /// always allowed regardless of this set.
    #[serde(default)]
    pub allowed_hosts: HashSet<String>,

    /// Mapping keys retained when `json.decode` simplifies a response.
    #[serde(default = "default_essential_json_keys")]
    pub essential_json_keys: HashSet<String>,
}

fn default_essential_json_keys() -> HashSet<String> {
    ["id", "name", "url", "height", "weight", "base_experience"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: HashSet::new(),
            essential_json_keys: default_essential_json_keys(),
        }
    }
}

impl SandboxConfig {
    /// Convenience constructor with an explicit allowlist and default
    /// essential keys.
    pub fn with_allowed_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_hosts: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Checks whether a hostname may be contacted by the HTTP tool.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.contains(host) || host.ends_with(".local")
    }
}
