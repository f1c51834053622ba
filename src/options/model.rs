//! Canonical `TransformOptions` (spec §3) and its validation invariants.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Video,
    Frame,
    Spritesheet,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Video => write!(f, "video"),
            Mode::Frame => write!(f, "frame"),
            Mode::Spritesheet => write!(f, "spritesheet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fit {
    Contain,
    Cover,
    ScaleDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Low,
    Medium,
    High,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preload {
    None,
    Metadata,
    Auto,
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Minimum and maximum valid pixel dimension, per spec §3.
pub const MIN_DIMENSION: u32 = 10;
pub const MAX_DIMENSION: u32 = 2000;

/// Canonical transformation options, after translation (§4.A),
/// derivative/preset resolution, and request-parameter overlay (§4.B).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformOptions {
    pub mode: Option<Mode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Option<Fit>,
    pub format: Option<String>,
    pub time: Option<String>,
    pub duration: Option<String>,
    pub audio: Option<bool>,
    pub bitrate: Option<u32>,
    pub fps: Option<u32>,
    pub speed: Option<f64>,
    pub crop: Option<String>,
    pub rotate: Option<i32>,
    pub quality: Option<Quality>,
    pub compression: Option<Compression>,
    pub r#loop: Option<bool>,
    pub autoplay: Option<bool>,
    pub muted: Option<bool>,
    pub preload: Option<Preload>,
    pub derivative: Option<String>,
    pub version: u32,
}

impl TransformOptions {
    pub fn new() -> Self {
        Self {
            version: 1,
            ..Default::default()
        }
    }

    /// Overlay `other`'s explicit fields on top of `self`, returning the
    /// merged result. Used to layer origin defaults -> derivative preset
    /// -> explicit request parameters (§4.B step 1-3).
    pub fn overlay(mut self, other: &TransformOptions) -> Self {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take!(mode);
        take!(width);
        take!(height);
        take!(fit);
        take!(format);
        take!(time);
        take!(duration);
        take!(audio);
        take!(bitrate);
        take!(fps);
        take!(speed);
        take!(crop);
        take!(rotate);
        take!(quality);
        take!(compression);
        take!(r#loop);
        take!(autoplay);
        take!(muted);
        take!(preload);
        take!(derivative);
        if other.version > 0 {
            self.version = other.version;
        }
        self
    }

    /// Validate the invariants from spec §3:
    /// - `mode=frame` requires `time`
    /// - `mode=spritesheet` forbids playback/quality/compression/format
    /// - width/height, when present, lie in `[MIN_DIMENSION, MAX_DIMENSION]`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(w) = self.width {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&w) {
                return Err(ValidationError::InvalidDimension {
                    field: "width",
                    value: w as i64,
                });
            }
        }
        if let Some(h) = self.height {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&h) {
                return Err(ValidationError::InvalidDimension {
                    field: "height",
                    value: h as i64,
                });
            }
        }

        match self.mode {
            Some(Mode::Frame) => {
                if self.time.is_none() {
                    return Err(ValidationError::MissingRequiredParameter("time"));
                }
            }
            Some(Mode::Spritesheet) => {
                if self.audio.is_some()
                    || self.autoplay.is_some()
                    || self.r#loop.is_some()
                    || self.muted.is_some()
                    || self.quality.is_some()
                    || self.compression.is_some()
                    || self.format.is_some()
                {
                    return Err(ValidationError::InvalidOptionCombination(
                        "spritesheet mode forbids playback/quality/compression/format options"
                            .to_string(),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Best-effort parse of a string-valued param map (post-translation,
    /// canonical names) into a `TransformOptions`. Unparseable values for
    /// a field are dropped rather than erroring; `validate()` catches the
    /// ones that matter.
    pub fn from_str_map(map: &BTreeMap<String, String>) -> Self {
        let mut opts = Self::default();
        opts.version = 1;
        for (k, v) in map {
            match k.as_str() {
                "mode" => {
                    opts.mode = match v.as_str() {
                        "video" => Some(Mode::Video),
                        "frame" => Some(Mode::Frame),
                        "spritesheet" => Some(Mode::Spritesheet),
                        _ => None,
                    }
                }
                "width" => opts.width = v.parse().ok(),
                "height" => opts.height = v.parse().ok(),
                "fit" => {
                    opts.fit = match v.as_str() {
                        "contain" => Some(Fit::Contain),
                        "cover" => Some(Fit::Cover),
                        "scale-down" => Some(Fit::ScaleDown),
                        _ => None,
                    }
                }
                "format" => opts.format = Some(v.clone()),
                "time" => opts.time = Some(v.clone()),
                "duration" => opts.duration = Some(v.clone()),
                "audio" => opts.audio = parse_bool(v),
                "bitrate" => opts.bitrate = v.parse().ok(),
                "fps" => opts.fps = v.parse().ok(),
                "speed" => opts.speed = v.parse().ok(),
                "crop" => opts.crop = Some(v.clone()),
                "rotate" => opts.rotate = v.parse().ok(),
                "quality" => {
                    opts.quality = match v.as_str() {
                        "low" => Some(Quality::Low),
                        "medium" => Some(Quality::Medium),
                        "high" => Some(Quality::High),
                        "auto" => Some(Quality::Auto),
                        _ => None,
                    }
                }
                "compression" => {
                    opts.compression = match v.as_str() {
                        "low" => Some(Compression::Low),
                        "medium" => Some(Compression::Medium),
                        "high" => Some(Compression::High),
                        "auto" => Some(Compression::Auto),
                        _ => None,
                    }
                }
                "loop" => opts.r#loop = parse_bool(v),
                "autoplay" => opts.autoplay = parse_bool(v),
                "muted" => opts.muted = parse_bool(v),
                "preload" => {
                    opts.preload = match v.as_str() {
                        "none" => Some(Preload::None),
                        "metadata" => Some(Preload::Metadata),
                        "auto" => Some(Preload::Auto),
                        _ => None,
                    }
                }
                "derivative" => opts.derivative = Some(v.clone()),
                "version" => {
                    if let Ok(n) = v.parse() {
                        opts.version = n;
                    }
                }
                _ => {}
            }
        }
        opts
    }

    /// Flatten into a sorted key=value map, used by the cache key builder
    /// (§4.D) and the backend URL synthesizer (§4.J). Only fields that
    /// participate in either are included; callers select by key set.
    pub fn as_param_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        if let Some(m) = self.mode {
            map.insert("mode", m.to_string());
        }
        if let Some(w) = self.width {
            map.insert("width", w.to_string());
        }
        if let Some(h) = self.height {
            map.insert("height", h.to_string());
        }
        if let Some(fit) = self.fit {
            map.insert(
                "fit",
                match fit {
                    Fit::Contain => "contain",
                    Fit::Cover => "cover",
                    Fit::ScaleDown => "scale-down",
                }
                .to_string(),
            );
        }
        if let Some(f) = &self.format {
            map.insert("format", f.clone());
        }
        if let Some(t) = &self.time {
            map.insert("time", t.clone());
        }
        if let Some(d) = &self.duration {
            map.insert("duration", d.clone());
        }
        if let Some(a) = self.audio {
            map.insert("audio", a.to_string());
        }
        if let Some(b) = self.bitrate {
            map.insert("bitrate", b.to_string());
        }
        if let Some(f) = self.fps {
            map.insert("fps", f.to_string());
        }
        if let Some(s) = self.speed {
            map.insert("speed", s.to_string());
        }
        if let Some(c) = &self.crop {
            map.insert("crop", c.clone());
        }
        if let Some(r) = self.rotate {
            map.insert("rotate", r.to_string());
        }
        if let Some(q) = self.quality {
            map.insert(
                "quality",
                match q {
                    Quality::Low => "low",
                    Quality::Medium => "medium",
                    Quality::High => "high",
                    Quality::Auto => "auto",
                }
                .to_string(),
            );
        }
        if let Some(c) = self.compression {
            map.insert(
                "compression",
                match c {
                    Compression::Low => "low",
                    Compression::Medium => "medium",
                    Compression::High => "high",
                    Compression::Auto => "auto",
                }
                .to_string(),
            );
        }
        if let Some(l) = self.r#loop {
            map.insert("loop", l.to_string());
        }
        if let Some(a) = self.autoplay {
            map.insert("autoplay", a.to_string());
        }
        if let Some(m) = self.muted {
            map.insert("muted", m.to_string());
        }
        if let Some(p) = self.preload {
            map.insert(
                "preload",
                match p {
                    Preload::None => "none",
                    Preload::Metadata => "metadata",
                    Preload::Auto => "auto",
                }
                .to_string(),
            );
        }
        map
    }
}
