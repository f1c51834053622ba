//! Module A — Parameter Translator.
//!
//! Maps the "legacy dialect" query parameters (Akamai-style `im*` hints,
//! `w`/`h`/`mute`/`obj-fit`, …) onto the canonical dialect consumed by
//! the rest of the pipeline. Pure function of its input map; records its
//! own outcome for the diagnostics record (§3 `DiagnosticsRecord`).

use std::collections::BTreeMap;

/// One declarative translation rule: legacy name -> canonical name, with
/// an optional value remapper for the handful of parameters whose values
/// (not just names) differ between dialects.
struct Rule {
    legacy: &'static str,
    canonical: &'static str,
    remap: Option<fn(&str) -> String>,
}

fn invert_bool(v: &str) -> String {
    match v {
        "true" | "1" => "false".to_string(),
        "false" | "0" => "true".to_string(),
        other => other.to_string(),
    }
}

fn obj_fit_value(v: &str) -> String {
    match v {
        "crop" => "cover".to_string(),
        "fill" => "contain".to_string(),
        other => other.to_string(),
    }
}

/// The static declarative table from spec §4.A.
fn rules() -> &'static [Rule] {
    const RULES: &[Rule] = &[
        Rule { legacy: "w", canonical: "width", remap: None },
        Rule { legacy: "h", canonical: "height", remap: None },
        Rule { legacy: "q", canonical: "quality", remap: None },
        Rule { legacy: "f", canonical: "format", remap: None },
        Rule { legacy: "start", canonical: "time", remap: None },
        Rule { legacy: "dur", canonical: "duration", remap: None },
        Rule { legacy: "mute", canonical: "audio", remap: Some(invert_bool) },
        Rule { legacy: "obj-fit", canonical: "fit", remap: Some(obj_fit_value) },
        Rule { legacy: "bitrate", canonical: "bitrate", remap: None },
        Rule { legacy: "fps", canonical: "fps", remap: None },
        Rule { legacy: "speed", canonical: "speed", remap: None },
        Rule { legacy: "crop", canonical: "crop", remap: None },
        Rule { legacy: "rotate", canonical: "rotate", remap: None },
        Rule { legacy: "compress", canonical: "compression", remap: None },
        Rule { legacy: "loop", canonical: "loop", remap: None },
        Rule { legacy: "preload", canonical: "preload", remap: None },
        Rule { legacy: "autoplay", canonical: "autoplay", remap: None },
        Rule { legacy: "muted", canonical: "muted", remap: None },
        Rule { legacy: "im-viewwidth", canonical: "viewwidth", remap: None },
        Rule { legacy: "im-viewheight", canonical: "viewheight", remap: None },
        Rule { legacy: "im-density", canonical: "dpr", remap: None },
    ];
    RULES
}

/// Responsive-hint parameters that feed both canonical width/height and
/// a synthetic client-hints header map (§4.A).
const RESPONSIVE_HINTS: &[&str] = &["imwidth", "imheight", "im-viewwidth", "im-viewheight", "im-density"];

/// Outcome of a translation pass, recorded verbatim into the
/// diagnostics record.
#[derive(Debug, Clone, Default)]
pub struct TranslationOutcome {
    pub original: BTreeMap<String, String>,
    pub translated: BTreeMap<String, String>,
    /// Synthetic client-hints headers derived from responsive params.
    pub client_hints: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub used_im_query: bool,
}

/// Translate a legacy-dialect parameter map into canonical form.
///
/// Unknown legacy parameter names are dropped and recorded as warnings.
/// `imwidth`/`imheight` map into both canonical `width`/`height` *and*
/// the synthetic client-hints map.
pub fn translate(original: &BTreeMap<String, String>) -> TranslationOutcome {
    let mut out = TranslationOutcome {
        original: original.clone(),
        ..Default::default()
    };

    let table = rules();

    for (key, value) in original {
        if key == "url" || key == "sig" || key == "derivative" {
            // Pass-through keys understood natively by both dialects.
            out.translated.insert(key.clone(), value.clone());
            continue;
        }

        if key == "imwidth" || key == "imheight" {
            let canonical_name = if key == "imwidth" { "width" } else { "height" };
            out.translated.insert(canonical_name.to_string(), value.clone());
            out.client_hints.insert(format!("x-{}", key), value.clone());
            out.used_im_query = true;
            continue;
        }

        if RESPONSIVE_HINTS.contains(&key.as_str()) {
            out.client_hints.insert(format!("x-{}", key), value.clone());
            out.used_im_query = true;
        }

        if let Some(rule) = table.iter().find(|r| r.legacy == key) {
            let v = match rule.remap {
                Some(f) => f(value),
                None => value.clone(),
            };
            out.translated.insert(rule.canonical.to_string(), v);
            if rule.legacy.starts_with("im-") {
                out.used_im_query = true;
            }
            continue;
        }

        // Already-canonical names pass through unchanged.
        const CANONICAL_NAMES: &[&str] = &[
            "width", "height", "quality", "format", "time", "duration", "audio", "fit",
            "compression", "loop", "preload", "autoplay", "muted", "mode", "version",
        ];
        if CANONICAL_NAMES.contains(&key.as_str()) {
            out.translated.insert(key.clone(), value.clone());
            continue;
        }

        out.warnings
            .push(format!("unknown legacy parameter dropped: {}", key));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn mute_inverts_to_audio() {
        let out = translate(&map(&[("mute", "true")]));
        assert_eq!(out.translated.get("audio"), Some(&"false".to_string()));

        let out = translate(&map(&[("mute", "false")]));
        assert_eq!(out.translated.get("audio"), Some(&"true".to_string()));
    }

    #[test]
    fn obj_fit_values_translate() {
        let out = translate(&map(&[("obj-fit", "crop")]));
        assert_eq!(out.translated.get("fit"), Some(&"cover".to_string()));

        let out = translate(&map(&[("obj-fit", "fill")]));
        assert_eq!(out.translated.get("fit"), Some(&"contain".to_string()));

        let out = translate(&map(&[("obj-fit", "weird")]));
        assert_eq!(out.translated.get("fit"), Some(&"weird".to_string()));
    }

    #[test]
    fn s6_legacy_dialect_scenario() {
        let out = translate(&map(&[
            ("w", "800"),
            ("h", "600"),
            ("mute", "true"),
            ("obj-fit", "crop"),
        ]));
        assert_eq!(out.translated.get("width"), Some(&"800".to_string()));
        assert_eq!(out.translated.get("height"), Some(&"600".to_string()));
        assert_eq!(out.translated.get("audio"), Some(&"false".to_string()));
        assert_eq!(out.translated.get("fit"), Some(&"cover".to_string()));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn unknown_param_recorded_as_warning() {
        let out = translate(&map(&[("bogus", "1")]));
        assert_eq!(out.warnings.len(), 1);
        assert!(!out.translated.contains_key("bogus"));
    }

    #[test]
    fn imwidth_produces_client_hint_and_canonical_width() {
        let out = translate(&map(&[("imwidth", "750")]));
        assert_eq!(out.translated.get("width"), Some(&"750".to_string()));
        assert_eq!(out.client_hints.get("x-imwidth"), Some(&"750".to_string()));
        assert!(out.used_im_query);
    }
}
