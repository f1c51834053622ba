//! Module B — Options Resolver.
//!
//! Layers origin defaults, a named derivative preset, and explicit
//! request parameters into one `TransformOptions`, then applies the
//! responsive-sizing heuristic when neither width nor height was given
//! explicitly but viewport hints were present.

use crate::config::OriginConfig;
use crate::error::ValidationError;
use crate::options::model::TransformOptions;
use std::collections::BTreeMap;

/// A breakpoint -> derivative mapping. The exact table is deployment
/// specific (spec §9 open question); this is a reasonable built-in
/// default used when the origin config names no derivatives of its own.
const BREAKPOINTS: &[(u32, &str)] = &[
    (320, "mobile"),
    (768, "tablet"),
    (1280, "desktop"),
    (1920, "desktop-hd"),
];

pub struct ResolveInput<'a> {
    pub origin: &'a OriginConfig,
    /// Canonical params already translated from the request (§4.A output).
    pub canonical_params: &'a BTreeMap<String, String>,
    /// Synthetic client-hints headers merged in by the translator, plus
    /// any native client-hints headers from the request.
    pub client_hints: &'a BTreeMap<String, String>,
    pub derivatives: &'a BTreeMap<String, BTreeMap<String, String>>,
}

/// Build and validate the final `TransformOptions` for a request.
pub fn resolve(input: &ResolveInput) -> Result<TransformOptions, ValidationError> {
    // 1. origin defaults
    let mut opts = input
        .origin
        .transform_defaults
        .as_ref()
        .map(|defaults| TransformOptions::from_str_map(&json_map_to_strings(defaults)))
        .unwrap_or_default();
    opts.version = 1;

    // 2. named derivative preset, if the request names one
    if let Some(name) = input.canonical_params.get("derivative") {
        if let Some(preset) = input.derivatives.get(name) {
            opts = opts.overlay(&TransformOptions::from_str_map(preset));
        }
        opts.derivative = Some(name.clone());
    }

    // 3. explicit request parameters, already canonical
    opts = opts.overlay(&TransformOptions::from_str_map(input.canonical_params));

    // 4. responsive-sizing heuristic
    if opts.width.is_none() && opts.height.is_none() {
        if let Some(derivative_name) = pick_responsive_derivative(input.client_hints) {
            if let Some(preset) = input.derivatives.get(&derivative_name) {
                opts = opts.overlay(&TransformOptions::from_str_map(preset));
            }
            if opts.derivative.is_none() {
                opts.derivative = Some(derivative_name);
            }
        }
    }

    opts.validate()?;
    Ok(opts)
}

fn json_map_to_strings(
    defaults: &std::collections::HashMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    defaults
        .iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string().trim_matches('"').to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

/// Pick the named derivative whose breakpoint is the closest standard
/// width to the effective viewport width (viewport * device-pixel-ratio),
/// ties broken by smallest positive percent-difference (spec §4.B).
fn pick_responsive_derivative(client_hints: &BTreeMap<String, String>) -> Option<String> {
    let viewwidth: f64 = client_hints
        .get("x-im-viewwidth")
        .or_else(|| client_hints.get("x-viewwidth"))
        .and_then(|v| v.parse().ok())?;
    let dpr: f64 = client_hints
        .get("x-im-density")
        .or_else(|| client_hints.get("x-dpr"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0);
    let effective_width = viewwidth * dpr;

    BREAKPOINTS
        .iter()
        .min_by(|(a, _), (b, _)| {
            let pa = percent_diff(effective_width, *a as f64);
            let pb = percent_diff(effective_width, *b as f64);
            pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(_, name)| name.to_string())
}

fn percent_diff(effective: f64, breakpoint: f64) -> f64 {
    ((effective - breakpoint).abs() / breakpoint).max(0.0)
}
