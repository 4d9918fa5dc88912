//! Host-side implementation of the tool surface reachable from scripts.
//!
//! Scripts see four callables: `http.get`, `http.post`, `json.decode`,
//! `json.encode`. Every failure (bad URL, transport error, non-2xx status,
//! oversized body, malformed JSON, host-side bug) comes back to the script
//! as a plain string with a stable prefix (`Invalid URL:`, `HTTP Error:`,
//! `Request failed:`, `JSON decode error:`, `JSON encode error:`). Nothing
//! the mediator does ever raises an error into the interpreter; the script
//! is free to inspect the string and carry on.
//!
//! HTTP requests go through the executor's shared pooled client. The
//! mediator runs on the interpreter's worker thread, which is a plain
//! `std::thread`, so it drives the async client with `Handle::block_on`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

use crate::config::SandboxConfig;

/// Maximum raw response body size (5 MB).
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024;

/// Sequences longer than this are dropped during response simplification.
const MAX_SEQUENCE_LEN: usize = 5;

/// Shared state behind the script-visible tool callbacks.
pub struct ToolMediator {
    client: reqwest::Client,
    handle: Handle,
    config: Arc<SandboxConfig>,
}

impl ToolMediator {
    pub fn new(client: reqwest::Client, handle: Handle, config: Arc<SandboxConfig>) -> Self {
        Self {
            client,
            handle,
            config,
        }
    }

    /// `http.get(url)`: returns the body bytes, or an error string.
    ///
    /// Must be called from a plain thread; drives the shared async client
    /// via the captured runtime handle.
    pub fn http_get(&self, raw_url: &str) -> Vec<u8> {
        let url = match self.check_url(raw_url) {
            Ok(url) => url,
            Err(reason) => {
                warn!(url = raw_url, %reason, "http.get rejected");
                return format!("Invalid URL: {reason}").into_bytes();
            }
        };
        debug!(%url, "http.get");
        self.handle.block_on(self.dispatch(self.client.get(url)))
    }

    /// `http.post(url, {headers?, body?})`: returns the body bytes, or an
    /// error string.
    pub fn http_post(
        &self,
        raw_url: &str,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    ) -> Vec<u8> {
        let url = match self.check_url(raw_url) {
            Ok(url) => url,
            Err(reason) => {
                warn!(url = raw_url, %reason, "http.post rejected");
                return format!("Invalid URL: {reason}").into_bytes();
            }
        };
        debug!(%url, headers = headers.len(), "http.post");

        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(&name, &value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        self.handle.block_on(self.dispatch(request))
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder) -> Vec<u8> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "tool request failed");
                return format!("Request failed: {e}").into_bytes();
            }
        };

        let status = response.status();
        if !status.is_success() {
            return format!("HTTP Error: {status}").into_bytes();
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return oversized(len as usize);
            }
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return format!("Request failed: {e}").into_bytes(),
        };
        if body.len() > MAX_RESPONSE_SIZE {
            return oversized(body.len());
        }

        body.to_vec()
    }

    /// Parses and policy-checks a URL before any request is issued.
    fn check_url(&self, raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw).map_err(|e| e.to_string())?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(format!("unsupported scheme '{scheme}'")),
        }
        let host = url.host_str().ok_or_else(|| "missing host".to_string())?;
        if !self.config.is_host_allowed(host) {
            return Err(format!("host '{host}' is not allowlisted"));
        }
        Ok(url)
    }

    /// `json.decode(s)`: parses and simplifies, or returns an error string.
    pub fn json_decode(&self, text: &str) -> Result<JsonValue, String> {
        let parsed: JsonValue =
            serde_json::from_str(text).map_err(|e| format!("JSON decode error: {e}"))?;
        Ok(simplify_json(&parsed, &self.config.essential_json_keys).unwrap_or(JsonValue::Null))
    }

    /// `json.encode(v)`: serializes an already-marshalled bag.
    pub fn json_encode(&self, value: &JsonValue) -> Result<String, String> {
        serde_json::to_string(value).map_err(|e| format!("JSON encode error: {e}"))
    }
}

fn oversized(len: usize) -> Vec<u8> {
    format!("Request failed: response too large ({len} bytes, limit is {MAX_RESPONSE_SIZE} bytes)")
        .into_bytes()
}

/// Reduces a decoded JSON value before it reaches the script.
///
/// Scripts get a small, bounded view of a response: primitives pass through,
/// nested mappings survive only when they carry at least one essential key,
/// sequences survive only up to [`MAX_SEQUENCE_LEN`] elements, and
/// everything else is dropped. Returns `None` when the whole value is
/// dropped. Lossy on purpose; callers needing the full body can read the raw
/// `http` response themselves.
pub fn simplify_json(value: &JsonValue, essential: &HashSet<String>) -> Option<JsonValue> {
    match value {
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_) => {
            Some(value.clone())
        }
        JsonValue::Array(items) => {
            if items.len() > MAX_SEQUENCE_LEN {
                return None;
            }
            Some(JsonValue::Array(
                items
                    .iter()
                    .filter_map(|item| simplify_nested(item, essential))
                    .collect(),
            ))
        }
        // The top-level mapping is always kept; the essential-key rule
        // applies to mappings nested inside it.
        JsonValue::Object(entries) => Some(JsonValue::Object(
            entries
                .iter()
                .filter_map(|(key, item)| {
                    simplify_nested(item, essential).map(|v| (key.clone(), v))
                })
                .collect(),
        )),
    }
}

fn simplify_nested(value: &JsonValue, essential: &HashSet<String>) -> Option<JsonValue> {
    match value {
        JsonValue::Object(entries) => {
            if entries.keys().any(|key| essential.contains(key)) {
                simplify_json(value, essential)
            } else {
                None
            }
        }
        _ => simplify_json(value, essential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mediator(config: SandboxConfig) -> ToolMediator {
        ToolMediator::new(
            reqwest::Client::new(),
            Handle::current(),
            Arc::new(config),
        )
    }

    fn essential() -> HashSet<String> {
        SandboxConfig::default().essential_json_keys
    }

    // ── URL policy ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_check_url_allows_listed_host() {
        let m = mediator(SandboxConfig::with_allowed_hosts(["api.example.com"]));
        assert!(m.check_url("https://api.example.com/v1").is_ok());
    }

    #[tokio::test]
    async fn test_check_url_allows_local_suffix() {
        let m = mediator(SandboxConfig::default());
        assert!(m.check_url("http://dev-box.local/health").is_ok());
    }

    #[tokio::test]
    async fn test_check_url_rejects_unlisted_host() {
        let m = mediator(SandboxConfig::default());
        let reason = m.check_url("https://blocked.example/").unwrap_err();
        assert!(reason.contains("blocked.example"));
        assert!(reason.contains("not allowlisted"));
    }

    #[tokio::test]
    async fn test_check_url_rejects_bad_scheme() {
        let m = mediator(SandboxConfig::default());
        let reason = m.check_url("ftp://host.local/file").unwrap_err();
        assert!(reason.contains("unsupported scheme"));
        assert!(reason.contains("ftp"));
    }

    #[tokio::test]
    async fn test_check_url_rejects_unparseable() {
        let m = mediator(SandboxConfig::default());
        assert!(m.check_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_http_get_invalid_url_is_prefixed_string() {
        let m = mediator(SandboxConfig::default());
        let body = m.http_get("https://blocked.example/");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("Invalid URL:"), "got: {text}");
    }

    // ── json.decode / json.encode ───────────────────────────────

    #[tokio::test]
    async fn test_json_decode_error_is_prefixed() {
        let m = mediator(SandboxConfig::default());
        let err = m.json_decode("{not json").unwrap_err();
        assert!(err.starts_with("JSON decode error:"));
    }

    #[tokio::test]
    async fn test_json_decode_applies_simplification() {
        let m = mediator(SandboxConfig::default());
        let decoded = m
            .json_decode(r#"{"name": "bulbasaur", "moves": [1,2,3,4,5,6], "junk": {"deep": 1}}"#)
            .unwrap();
        assert_eq!(decoded, json!({"name": "bulbasaur"}));
    }

    #[tokio::test]
    async fn test_json_encode_round_trips() {
        let m = mediator(SandboxConfig::default());
        let encoded = m.json_encode(&json!({"a": 1})).unwrap();
        assert_eq!(encoded, r#"{"a":1}"#);
    }

    // ── Simplification policy ───────────────────────────────────

    #[test]
    fn test_simplify_preserves_primitives() {
        let e = essential();
        assert_eq!(simplify_json(&json!(7), &e), Some(json!(7)));
        assert_eq!(simplify_json(&json!("s"), &e), Some(json!("s")));
        assert_eq!(simplify_json(&json!(null), &e), Some(json!(null)));
    }

    #[test]
    fn test_simplify_keeps_primitive_fields_of_top_mapping() {
        let e = essential();
        let input = json!({"alpha": 1, "beta": "two", "gamma": true});
        assert_eq!(simplify_json(&input, &e), Some(input.clone()));
    }

    #[test]
    fn test_simplify_drops_nested_mapping_without_essential_keys() {
        let e = essential();
        let input = json!({"keep": 1, "drop": {"nothing": "useful"}});
        assert_eq!(simplify_json(&input, &e), Some(json!({"keep": 1})));
    }

    #[test]
    fn test_simplify_keeps_nested_mapping_with_essential_key() {
        let e = essential();
        let input = json!({"species": {"name": "ivysaur", "noise": {"x": 1}}});
        assert_eq!(
            simplify_json(&input, &e),
            Some(json!({"species": {"name": "ivysaur"}}))
        );
    }

    #[test]
    fn test_simplify_keeps_short_sequences() {
        let e = essential();
        let input = json!({"nums": [1, 2, 3, 4, 5]});
        assert_eq!(simplify_json(&input, &e), Some(input.clone()));
    }

    #[test]
    fn test_simplify_drops_long_sequences() {
        let e = essential();
        let input = json!({"nums": [1, 2, 3, 4, 5, 6]});
        assert_eq!(simplify_json(&input, &e), Some(json!({})));
    }

    #[test]
    fn test_simplify_drops_long_top_level_sequence_entirely() {
        let e = essential();
        assert_eq!(simplify_json(&json!([1, 2, 3, 4, 5, 6]), &e), None);
    }

    #[test]
    fn test_simplify_filters_elements_of_kept_sequence() {
        let e = essential();
        let input = json!([{"id": 1}, {"other": 2}, 3]);
        assert_eq!(
            simplify_json(&input, &e),
            Some(json!([{"id": 1}, 3]))
        );
    }

    #[test]
    fn test_simplify_respects_configured_keys() {
        let e: HashSet<String> = ["token"].into_iter().map(String::from).collect();
        let input = json!({"auth": {"token": "t"}, "species": {"name": "x"}});
        assert_eq!(
            simplify_json(&input, &e),
            Some(json!({"auth": {"token": "t"}}))
        );
    }
}
