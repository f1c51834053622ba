//! Module D — Cache Key Builder.
//!
//! Pure deterministic function of `(path, options, query)`. Identical
//! keys MUST be produced here, in the coalescer (§4.E), and in the KV
//! layer (§4.F) — they all call this function, never synthesize a key
//! themselves.

use crate::options::TransformOptions;
use std::collections::BTreeMap;

/// Build the canonical cache key: `video:<path>[:derivative=][:width=]
/// [:height=][:imwidth=][:imheight=]:v<version>`.
pub fn build(path: &str, options: &TransformOptions, query: &BTreeMap<String, String>) -> String {
    let mut key = String::from("video:");
    key.push_str(path.trim_start_matches('/'));

    if let Some(d) = &options.derivative {
        key.push_str(":derivative=");
        key.push_str(d);
    }
    if let Some(w) = options.width {
        key.push_str(":width=");
        key.push_str(&w.to_string());
    }
    if let Some(h) = options.height {
        key.push_str(":height=");
        key.push_str(&h.to_string());
    }
    if let Some(imwidth) = query.get("imwidth") {
        key.push_str(":imwidth=");
        key.push_str(imwidth);
    }
    if let Some(imheight) = query.get("imheight") {
        key.push_str(":imheight=");
        key.push_str(imheight);
    }
    key.push_str(":v");
    key.push_str(&options.version.to_string());
    key
}

/// Sanitize a cache key for use in the version namespace (§4.I), which
/// may have a shorter key-length limit than the primary KV namespace.
pub fn sanitize_for_version_namespace(key: &str, max_len: usize) -> String {
    if key.len() <= max_len {
        return format!("version-{}", key);
    }
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("version-{}", hex::encode(hasher.finalize()))
}
