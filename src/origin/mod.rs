//! Module C — Origin Resolver.
//!
//! Matches a request path against the ordered origin table, extracts
//! captures, and picks a source by ascending priority.

use crate::config::{GatewayConfig, OriginConfig, SourceConfig};
use crate::error::OriginError;
use regex::Regex;
use std::collections::BTreeMap;

/// A matched origin plus its path captures, positional and named.
#[derive(Debug, Clone)]
pub struct OriginMatch {
    pub origin_name: String,
    pub matcher: String,
    pub captures: BTreeMap<String, String>,
    pub capture_groups: Vec<Option<String>>,
}

/// The resolved physical location for a request.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub source_type: &'static str,
    pub resolved_path: String,
    /// Full URL for remote/fallback sources; `None` for bucket sources,
    /// whose handle resolution is an external collaborator.
    pub url: Option<String>,
    pub bucket_binding: Option<String>,
}

/// Find the first origin whose matcher matches `path`, in declaration
/// order (spec §4.C). Returns `None` rather than erroring, so the caller
/// decides whether strict-mode `OriginNotFound` applies.
pub fn match_origin(config: &GatewayConfig, path: &str) -> Result<Option<OriginMatch>, OriginError> {
    for origin in &config.origins {
        let re = compile_matcher(origin)?;
        if let Some(caps) = re.captures(path) {
            let mut captures = BTreeMap::new();
            for i in 1..caps.len() {
                if let Some(m) = caps.get(i) {
                    captures.insert(i.to_string(), m.as_str().to_string());
                    if let Some(Some(name)) = origin.capture_groups.get(i - 1) {
                        captures.insert(name.clone(), m.as_str().to_string());
                    }
                }
            }
            return Ok(Some(OriginMatch {
                origin_name: origin.name.clone(),
                matcher: origin.matcher.clone(),
                captures,
                capture_groups: origin.capture_groups.clone(),
            }));
        }
    }
    Ok(None)
}

/// Require a match, raising `OriginNotFound` when the caller needs strict
/// behavior (the gateway's top-level handler always does).
pub fn match_origin_strict(config: &GatewayConfig, path: &str) -> Result<OriginMatch, OriginError> {
    match_origin(config, path)?.ok_or_else(|| OriginError::OriginNotFound {
        path: path.to_string(),
    })
}

fn compile_matcher(origin: &OriginConfig) -> Result<Regex, OriginError> {
    Regex::new(&origin.matcher).map_err(|e| OriginError::PathResolutionFailed {
        origin: origin.name.clone(),
        reason: format!("invalid matcher regex: {}", e),
    })
}

/// Select the usable source with the lowest `priority`, optionally
/// restricted to one source type, then resolve its path template.
pub fn resolve_source(
    config: &GatewayConfig,
    origin_name: &str,
    captures: &BTreeMap<String, String>,
    matched_path: &str,
    want_type: Option<&str>,
) -> Result<ResolvedSource, OriginError> {
    let origin = config
        .origins
        .iter()
        .find(|o| o.name == origin_name)
        .ok_or_else(|| OriginError::SourceResolutionFailed {
            origin: origin_name.to_string(),
        })?;

    let mut candidates: Vec<&SourceConfig> = origin
        .sources
        .iter()
        .filter(|s| want_type.map(|t| s.kind() == t).unwrap_or(true))
        .collect();
    candidates.sort_by_key(|s| s.priority());

    if candidates.is_empty() {
        return Err(if want_type.is_some() {
            OriginError::SourceTypeNotSupported {
                origin: origin_name.to_string(),
                source_type: want_type.unwrap().to_string(),
            }
        } else {
            OriginError::SourceResolutionFailed {
                origin: origin_name.to_string(),
            }
        });
    }

    let source = candidates[0];
    let resolved_path = resolve_path_template(source.path_template(), captures, matched_path);

    match source {
        SourceConfig::Bucket { bucket_binding, .. } => Ok(ResolvedSource {
            source_type: "bucket",
            resolved_path,
            url: None,
            bucket_binding: Some(bucket_binding.clone()),
        }),
        SourceConfig::Remote { url, .. } | SourceConfig::Fallback { url, .. } => {
            let full = format!("{}/{}", url.trim_end_matches('/'), resolved_path.trim_start_matches('/'));
            Ok(ResolvedSource {
                source_type: source.kind(),
                resolved_path,
                url: Some(full),
                bucket_binding: None,
            })
        }
    }
}

/// Replace `$N` and `${name}` tokens in `template` using `captures`. With
/// no template, the matched path (sans leading slash) is used verbatim.
fn resolve_path_template(
    template: Option<&str>,
    captures: &BTreeMap<String, String>,
    matched_path: &str,
) -> String {
    let Some(template) = template else {
        return matched_path.trim_start_matches('/').to_string();
    };

    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '{' {
                if let Some(end) = chars[i..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + end].iter().collect();
                    if let Some(v) = captures.get(&name) {
                        out.push_str(v);
                    }
                    i += end + 1;
                    continue;
                }
            } else if chars[i + 1].is_ascii_digit() {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                let digits: String = chars[i + 1..j].iter().collect();
                if let Some(v) = captures.get(&digits) {
                    out.push_str(v);
                }
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, OriginConfig, TtlConfig};

    fn config_with(matcher: &str, sources: Vec<SourceConfig>) -> GatewayConfig {
        GatewayConfig {
            origins: vec![OriginConfig {
                name: "videos".to_string(),
                matcher: matcher.to_string(),
                capture_groups: vec![Some("id".to_string())],
                sources,
                ttl: TtlConfig::default(),
                transform_defaults: None,
            }],
            cache: Default::default(),
            video: Default::default(),
            debug: Default::default(),
        }
    }

    #[test]
    fn matches_and_captures_positionally_and_by_name() {
        let cfg = config_with(
            r"^/videos/(.+)$",
            vec![SourceConfig::Bucket {
                priority: 0,
                path_template: None,
                bucket_binding: "VIDEOS".to_string(),
            }],
        );
        let m = match_origin(&cfg, "/videos/a/b.mp4").unwrap().unwrap();
        assert_eq!(m.captures.get("1"), Some(&"a/b.mp4".to_string()));
        assert_eq!(m.captures.get("id"), Some(&"a/b.mp4".to_string()));
    }

    #[test]
    fn no_match_returns_none() {
        let cfg = config_with(
            r"^/images/(.+)$",
            vec![SourceConfig::Bucket {
                priority: 0,
                path_template: None,
                bucket_binding: "X".to_string(),
            }],
        );
        assert!(match_origin(&cfg, "/videos/a.mp4").unwrap().is_none());
        assert!(match_origin_strict(&cfg, "/videos/a.mp4").is_err());
    }

    #[test]
    fn selects_lowest_priority_source() {
        let cfg = config_with(
            r"^/videos/(.+)$",
            vec![
                SourceConfig::Remote {
                    priority: 5,
                    path_template: None,
                    url: "https://slow.example".to_string(),
                    auth: None,
                },
                SourceConfig::Bucket {
                    priority: 1,
                    path_template: None,
                    bucket_binding: "VIDEOS".to_string(),
                },
            ],
        );
        let mut caps = BTreeMap::new();
        caps.insert("1".to_string(), "a.mp4".to_string());
        let resolved = resolve_source(&cfg, "videos", &caps, "/videos/a.mp4", None).unwrap();
        assert_eq!(resolved.source_type, "bucket");
    }

    #[test]
    fn path_template_substitutes_positional_and_named() {
        let mut caps = BTreeMap::new();
        caps.insert("1".to_string(), "a.mp4".to_string());
        caps.insert("id".to_string(), "a.mp4".to_string());
        assert_eq!(resolve_path_template(Some("raw/$1"), &caps, "/x"), "raw/a.mp4");
        assert_eq!(
            resolve_path_template(Some("raw/${id}"), &caps, "/x"),
            "raw/a.mp4"
        );
    }

    #[test]
    fn remote_source_builds_full_url() {
        let cfg = config_with(
            r"^/videos/(.+)$",
            vec![SourceConfig::Remote {
                priority: 0,
                path_template: Some("$1".to_string()),
                url: "https://cdn.example".to_string(),
                auth: None,
            }],
        );
        let mut caps = BTreeMap::new();
        caps.insert("1".to_string(), "a.mp4".to_string());
        let resolved = resolve_source(&cfg, "videos", &caps, "/videos/a.mp4", None).unwrap();
        assert_eq!(resolved.url.as_deref(), Some("https://cdn.example/a.mp4"));
    }
}
