//! Module L — Diagnostics Emitter.
//!
//! A per-request structured record, written to (never read) by every
//! other component. On response finalization it either becomes response
//! headers (opt-in) or, in `debug=view` mode, gets serialized into a
//! static HTML shell for the (external) dashboard collaborator.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsRecord {
    #[serde(rename = "originalUrl")]
    pub original_url: String,
    #[serde(rename = "originName")]
    pub origin_name: Option<String>,
    #[serde(rename = "originMatcher")]
    pub matcher: Option<String>,
    pub captures: BTreeMap<String, String>,
    #[serde(rename = "sourceType")]
    pub source_type: Option<String>,
    #[serde(rename = "resolvedPath")]
    pub resolved_path: Option<String>,
    #[serde(rename = "backendUrl")]
    pub backend_url: Option<String>,
    #[serde(rename = "timingsMs")]
    pub timings_ms: BTreeMap<String, u128>,
    #[serde(rename = "originalParams")]
    pub original_params: BTreeMap<String, String>,
    #[serde(rename = "translatedParams")]
    pub translated_params: BTreeMap<String, String>,
    #[serde(rename = "usedImQuery")]
    pub used_im_query: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    #[serde(rename = "cacheStatus")]
    pub cache_status: Option<String>,
    pub version: Option<u32>,
    #[serde(rename = "fallbackApplied")]
    pub fallback_applied: bool,
    #[serde(rename = "isFirstRequest")]
    pub is_first_request: Option<bool>,
}

impl DiagnosticsRecord {
    pub fn new(original_url: impl Into<String>) -> Self {
        Self { original_url: original_url.into(), ..Default::default() }
    }

    pub fn record_timing(&mut self, stage: &str, elapsed: Duration) {
        self.timings_ms.insert(stage.to_string(), elapsed.as_millis());
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

const DEBUG_SHELL_TEMPLATE: &str = include_str!("../assets/debug_shell.html");

/// Inject the record's JSON into the static HTML shell by placeholder
/// substitution (spec §4.L — the real dashboard build is an external
/// collaborator; this is the minimal embedded stand-in).
pub fn render_debug_view(record: &DiagnosticsRecord) -> String {
    DEBUG_SHELL_TEMPLATE.replace("__DIAGNOSTICS_JSON__", &record.to_json())
}

/// Select which fields become opt-in response headers for
/// `debug=true|headers|config|all` (spec §6).
pub fn diagnostic_headers(record: &DiagnosticsRecord, mode: &str) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    if matches!(mode, "true" | "headers" | "all") {
        if let Some(origin) = &record.origin_name {
            headers.push(("X-Origin-Name", origin.clone()));
        }
        if let Some(matcher) = &record.matcher {
            headers.push(("X-Origin-Matcher", matcher.clone()));
        }
        if let Some(source) = &record.source_type {
            headers.push(("X-Source-Type", source.clone()));
        }
        if let Some(path) = &record.resolved_path {
            headers.push(("X-Source-Path", path.clone()));
        }
        if record.used_im_query {
            headers.push(("X-Using-IMQuery", "true".to_string()));
        }
    }
    if matches!(mode, "true" | "config" | "all") {
        if let Some(v) = record.version {
            headers.push(("X-Cache-Version", format!("v{}", v)));
        }
    }
    if !record.warnings.is_empty() && matches!(mode, "true" | "all") {
        headers.push(("X-Translation-Warnings", record.warnings.join("; ")));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_view_embeds_json() {
        let mut record = DiagnosticsRecord::new("/videos/a.mp4?width=640");
        record.origin_name = Some("videos".to_string());
        let html = render_debug_view(&record);
        assert!(html.contains("\"originalUrl\":\"/videos/a.mp4?width=640\""));
        assert!(!html.contains("__DIAGNOSTICS_JSON__"));
    }

    #[test]
    fn headers_mode_includes_origin_fields() {
        let mut record = DiagnosticsRecord::new("/x");
        record.origin_name = Some("videos".to_string());
        record.source_type = Some("bucket".to_string());
        let headers = diagnostic_headers(&record, "headers");
        assert!(headers.iter().any(|(k, v)| *k == "X-Origin-Name" && v == "videos"));
    }

    #[test]
    fn no_mode_means_no_headers() {
        let record = DiagnosticsRecord::new("/x");
        assert!(diagnostic_headers(&record, "").is_empty());
    }
}
