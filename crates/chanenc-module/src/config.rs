//! Module parameters: registration, defaults and the validation gate.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::warn;

use chanenc_encoder::PreprocessMode;

use crate::error::ConfigError;

/// String-keyed parameters handed over by the pipeline framework.
pub type ModuleParamSet = HashMap<String, String>;

/// Keys that must be present before the module is opened.
pub const REQUIRED_KEYS: [&str; 7] = [
    "dst_width",
    "dst_height",
    "frame_rate",
    "bit_rate",
    "gop_size",
    "device_id",
    "pre_type",
];

/// Alternate spelling accepted for `pre_type`.
pub const PRE_TYPE_ALIAS: &str = "preprocessing_mode";

const NUMERIC_KEYS: [&str; 6] = [
    "dst_width",
    "dst_height",
    "frame_rate",
    "bit_rate",
    "gop_size",
    "device_id",
];

/// Keys whose value must be strictly positive.
const POSITIVE_KEYS: [&str; 5] = ["dst_width", "dst_height", "frame_rate", "bit_rate", "gop_size"];

pub const DEFAULT_DST_WIDTH: u32 = 960;
pub const DEFAULT_DST_HEIGHT: u32 = 540;
pub const DEFAULT_FRAME_RATE: u32 = 25;
/// Used verbatim; explicit values are kilobits and get scaled.
pub const DEFAULT_BIT_RATE: u32 = 0x100000;
pub const DEFAULT_GOP_SIZE: u32 = 10;
pub const DEFAULT_DEVICE_ID: i32 = 0;
pub const DEFAULT_PRE_TYPE: &str = "opencv";

/// Registered parameters and their descriptions.
pub struct ParamRegistry {
    module_desc: &'static str,
    params: Vec<(&'static str, &'static str)>,
}

impl ParamRegistry {
    /// Parameters understood by the encode module.
    pub fn encoder() -> Self {
        Self {
            module_desc: "Encodes each channel of decoded video into its own stream.",
            params: vec![
                ("dst_width", "The image width of the output."),
                ("dst_height", "The image height of the output."),
                ("frame_rate", "Frame rate of the encoded video."),
                (
                    "bit_rate",
                    "The amount of data encoded per unit of time, in kilobits. \
                     A higher bitrate means a higher quality video.",
                ),
                (
                    "gop_size",
                    "Group of pictures: the number of frames between two I-frames.",
                ),
                (
                    "device_id",
                    "Which device will be used. With a single device this is 0.",
                ),
                (
                    "pre_type",
                    "Resize and colorspace convert type: opencv, ffmpeg or mlu.",
                ),
                (PRE_TYPE_ALIAS, "Alias of pre_type."),
            ],
        }
    }

    /// Returns true if `key` is a known parameter.
    pub fn is_registered(&self, key: &str) -> bool {
        self.params.iter().any(|(name, _)| *name == key)
    }

    /// Help text listing every parameter.
    pub fn describe(&self) -> String {
        let mut out = String::from(self.module_desc);
        out.push('\n');
        for (key, desc) in &self.params {
            let _ = writeln!(out, "  {key:<20}{desc}");
        }
        out
    }

    /// Log a warning for every unregistered key.
    pub fn warn_unknown(&self, params: &ModuleParamSet) {
        for key in params.keys() {
            if !self.is_registered(key) {
                warn!(key = %key, "Unknown param");
            }
        }
    }
}

/// Map a `pre_type` token to a preprocessing mode.
///
/// `opencv` and `ffmpeg` hand over an upstream BGR matrix, `mlu` the raw
/// planes. Anything else is [`PreprocessMode::Unknown`].
pub fn parse_pre_type(token: &str) -> PreprocessMode {
    match token.trim() {
        "opencv" | "ffmpeg" => PreprocessMode::Matrix,
        "mlu" => PreprocessMode::RawPlanar,
        _ => PreprocessMode::Unknown,
    }
}

fn pre_type_value(params: &ModuleParamSet) -> Option<&String> {
    params.get("pre_type").or_else(|| params.get(PRE_TYPE_ALIAS))
}

/// Resolved encoding parameters. Read-only once the module is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub dst_width: u32,
    pub dst_height: u32,
    pub frame_rate: u32,
    /// Bytes per second as handed to the engine.
    pub bit_rate: u32,
    pub gop_size: u32,
    pub device_id: i32,
    pub preprocess: PreprocessMode,
    /// Token the mode was derived from.
    pub pre_type: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            dst_width: DEFAULT_DST_WIDTH,
            dst_height: DEFAULT_DST_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            bit_rate: DEFAULT_BIT_RATE,
            gop_size: DEFAULT_GOP_SIZE,
            device_id: DEFAULT_DEVICE_ID,
            preprocess: PreprocessMode::Matrix,
            pre_type: DEFAULT_PRE_TYPE.to_string(),
        }
    }
}

impl Configuration {
    /// Build a configuration, falling back to defaults for absent keys.
    ///
    /// Values that do not parse also fall back, with a warning; rejecting
    /// them is [`check_param_set`]'s job.
    pub fn from_params(params: &ModuleParamSet) -> Self {
        ParamRegistry::encoder().warn_unknown(params);

        let defaults = Self::default();
        let pre_type = pre_type_value(params)
            .cloned()
            .unwrap_or(defaults.pre_type);

        Self {
            dst_width: positive(params, "dst_width", defaults.dst_width),
            dst_height: positive(params, "dst_height", defaults.dst_height),
            frame_rate: positive(params, "frame_rate", defaults.frame_rate),
            bit_rate: match params.get("bit_rate") {
                Some(_) => positive(params, "bit_rate", DEFAULT_BIT_RATE / 1024).saturating_mul(1024),
                None => defaults.bit_rate,
            },
            gop_size: positive(params, "gop_size", defaults.gop_size),
            device_id: params
                .get("device_id")
                .and_then(|v| parse_or_warn::<i32>("device_id", v))
                .unwrap_or(defaults.device_id),
            preprocess: parse_pre_type(&pre_type),
            pre_type,
        }
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value, "Unparseable value, using default");
            None
        }
    }
}

fn positive(params: &ModuleParamSet, key: &str, default: u32) -> u32 {
    match params.get(key).and_then(|v| parse_or_warn::<u32>(key, v)) {
        Some(0) => {
            warn!(key, "Value must be positive, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

/// Outcome of the validation gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamCheck {
    /// Required keys that are absent.
    pub missing: Vec<String>,

    /// Numeric keys whose value is not a valid integer.
    pub malformed: Vec<String>,
}

impl ParamCheck {
    /// Returns true if the parameter set may be opened.
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.malformed.is_empty()
    }

    /// Human-readable summary naming every offending key.
    pub fn diagnostic(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("must specify [{}]", self.missing.join("], [")));
        }
        if !self.malformed.is_empty() {
            parts.push(format!("not an integer: [{}]", self.malformed.join("], [")));
        }
        if parts.is_empty() {
            "ok".to_string()
        } else {
            parts.join("; ")
        }
    }

    /// Convert to a result. Missing keys are reported before malformed ones.
    pub fn into_result(self) -> Result<(), ConfigError> {
        if !self.missing.is_empty() {
            Err(ConfigError::Missing(self.missing))
        } else if !self.malformed.is_empty() {
            Err(ConfigError::Malformed(self.malformed))
        } else {
            Ok(())
        }
    }
}

/// Check that every required key is present and every numeric key parses.
pub fn check_param_set(params: &ModuleParamSet) -> ParamCheck {
    ParamRegistry::encoder().warn_unknown(params);

    let mut check = ParamCheck::default();

    for key in REQUIRED_KEYS {
        let present = if key == "pre_type" {
            pre_type_value(params).is_some()
        } else {
            params.contains_key(key)
        };
        if !present {
            check.missing.push(key.to_string());
        }
    }

    for key in NUMERIC_KEYS {
        let Some(value) = params.get(key) else {
            continue;
        };
        let valid = match value.trim().parse::<i64>() {
            Ok(v) if POSITIVE_KEYS.contains(&key) => v > 0 && v <= u32::MAX as i64,
            Ok(v) => i32::try_from(v).is_ok(),
            Err(_) => false,
        };
        if !valid {
            check.malformed.push(key.to_string());
        }
    }

    check
}
