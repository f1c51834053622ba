//! Configuration document consumed by the gateway (spec §6).
//!
//! Loading the JSON document from durable KV on cold start is an external
//! collaborator; this module only parses and validates an already-fetched
//! document, the way the teacher's `ImageKitConfig` validated a flat
//! struct built from environment variables.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub origins: Vec<OriginConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    pub name: String,
    pub matcher: String,
    #[serde(default, rename = "captureGroups")]
    pub capture_groups: Vec<Option<String>>,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default, rename = "transformDefaults")]
    pub transform_defaults: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Bucket {
        priority: i32,
        #[serde(default, rename = "path")]
        path_template: Option<String>,
        #[serde(rename = "bucketBinding")]
        bucket_binding: String,
    },
    Remote {
        priority: i32,
        #[serde(default, rename = "path")]
        path_template: Option<String>,
        url: String,
        #[serde(default)]
        auth: Option<SourceAuth>,
    },
    Fallback {
        priority: i32,
        #[serde(default, rename = "path")]
        path_template: Option<String>,
        url: String,
        #[serde(default)]
        auth: Option<SourceAuth>,
    },
}

impl SourceConfig {
    pub fn priority(&self) -> i32 {
        match self {
            SourceConfig::Bucket { priority, .. } => *priority,
            SourceConfig::Remote { priority, .. } => *priority,
            SourceConfig::Fallback { priority, .. } => *priority,
        }
    }

    pub fn path_template(&self) -> Option<&str> {
        match self {
            SourceConfig::Bucket { path_template, .. } => path_template.as_deref(),
            SourceConfig::Remote { path_template, .. } => path_template.as_deref(),
            SourceConfig::Fallback { path_template, .. } => path_template.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Bucket { .. } => "bucket",
            SourceConfig::Remote { .. } => "remote",
            SourceConfig::Fallback { .. } => "fallback",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceAuth {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtlConfig {
    #[serde(default = "default_ttl_ok")]
    pub ok: u64,
    #[serde(default)]
    pub redirects: u64,
    #[serde(rename = "clientError", default)]
    pub client_error: u64,
    #[serde(rename = "serverError", default)]
    pub server_error: u64,
}

fn default_ttl_ok() -> u64 {
    300
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            ok: default_ttl_ok(),
            redirects: 0,
            client_error: 0,
            server_error: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(rename = "defaultMaxAge", default = "default_ttl_ok")]
    pub default_max_age: u64,
    #[serde(rename = "enableCacheTags", default)]
    pub enable_cache_tags: bool,
    #[serde(rename = "cacheTagPrefix", default = "default_tag_prefix")]
    pub cache_tag_prefix: String,
    #[serde(rename = "enableKVCache", default = "default_true")]
    pub enable_kv_cache: bool,
    #[serde(rename = "storeIndefinitely", default)]
    pub store_indefinitely: bool,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub bypass_query_keys: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_tag_prefix() -> String {
    "video".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            default_max_age: default_ttl_ok(),
            enable_cache_tags: false,
            cache_tag_prefix: default_tag_prefix(),
            enable_kv_cache: true,
            store_indefinitely: false,
            fallback: FallbackConfig::default(),
            bypass_query_keys: vec!["nocache".to_string(), "bypass".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "badRequestOnly", default)]
    pub bad_request_only: bool,
    #[serde(rename = "preserveHeaders", default = "default_preserve_headers")]
    pub preserve_headers: Vec<String>,
}

fn default_preserve_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Content-Length".to_string()]
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VideoConfig {
    #[serde(default)]
    pub defaults: HashMap<String, Value>,
    #[serde(rename = "validOptions", default)]
    pub valid_options: Vec<String>,
    #[serde(default)]
    pub derivatives: HashMap<String, HashMap<String, Value>>,
}

impl VideoConfig {
    /// Flatten `derivatives` into plain string maps for the options
    /// resolver, which works in the post-translation string dialect.
    pub fn derivatives_as_strings(&self) -> std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>> {
        self.derivatives
            .iter()
            .map(|(name, fields)| {
                let flat = fields
                    .iter()
                    .map(|(k, v)| {
                        let s = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string().trim_matches('"').to_string(),
                        };
                        (k.clone(), s)
                    })
                    .collect();
                (name.clone(), flat)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(rename = "includeHeaders", default)]
    pub include_headers: bool,
    #[serde(rename = "includePerformance", default)]
    pub include_performance: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verbose: false,
            include_headers: false,
            include_performance: false,
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration document, normalizing legacy top-level keys
    /// (`pathPatterns`/`pathTransforms`/`storage`) into `origins` first.
    pub fn from_json(raw: &str) -> Result<Self, ConfigurationError> {
        let mut value: Value = serde_json::from_str(raw)
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        normalize_legacy_keys(&mut value);
        serde_json::from_value(value).map_err(|e| ConfigurationError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.origins.is_empty() {
            return Err(ConfigurationError::MissingProperty("origins".to_string()));
        }
        for origin in &self.origins {
            if origin.sources.is_empty() {
                return Err(ConfigurationError::Invalid(format!(
                    "origin {} has no sources",
                    origin.name
                )));
            }
        }
        Ok(())
    }
}

/// Converts the legacy `pathPatterns`/`pathTransforms`/`storage` document
/// shape into the `origins` array the rest of the gateway understands.
/// `pathPatterns` entries become one origin each: `{pattern, ...}` becomes
/// `{name, matcher, sources: [{type: bucket, priority: 0, bucketBinding:
/// storage}]}`. A present `origins` key always wins and this is a no-op.
fn normalize_legacy_keys(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    if obj.contains_key("origins") {
        return;
    }
    let Some(patterns) = obj.remove("pathPatterns").and_then(|v| v.as_array().cloned()) else {
        return;
    };
    let transforms = obj
        .remove("pathTransforms")
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let storage_binding = obj
        .remove("storage")
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "STORAGE".to_string());

    let mut origins = Vec::new();
    for (idx, pattern) in patterns.into_iter().enumerate() {
        let Some(matcher) = pattern.get("pattern").and_then(|v| v.as_str()) else {
            continue;
        };
        let name = pattern
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("legacy-{}", idx));
        let transform_defaults = transforms.get(&name).cloned();
        origins.push(serde_json::json!({
            "name": name,
            "matcher": matcher,
            "sources": [{
                "type": "bucket",
                "priority": 0,
                "bucketBinding": storage_binding,
            }],
            "transformDefaults": transform_defaults,
        }));
    }
    obj.insert("origins".to_string(), Value::Array(origins));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_origins() {
        let cfg = GatewayConfig {
            origins: vec![],
            cache: CacheConfig::default(),
            video: VideoConfig::default(),
            debug: DebugConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_minimal_origins_document() {
        let raw = r#"{
            "origins": [{
                "name": "videos",
                "matcher": "^/videos/(.+)$",
                "sources": [{"type": "bucket", "priority": 0, "bucketBinding": "VIDEOS"}]
            }]
        }"#;
        let cfg = GatewayConfig::from_json(raw).unwrap();
        assert_eq!(cfg.origins.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn normalizes_legacy_path_patterns() {
        let raw = r#"{
            "pathPatterns": [{"name": "videos", "pattern": "^/videos/(.+)$"}],
            "storage": "VIDEOS"
        }"#;
        let cfg = GatewayConfig::from_json(raw).unwrap();
        assert_eq!(cfg.origins.len(), 1);
        assert_eq!(cfg.origins[0].name, "videos");
        assert_eq!(cfg.origins[0].sources[0].kind(), "bucket");
    }
}
