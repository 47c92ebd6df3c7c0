//! Package-level options: join strategy and hardware encoding flags.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How clips are joined into a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Pairwise timed crossfade (waterfall)
    #[default]
    Crossfade,
    /// Straight concatenation, no transitions
    Concat,
}

impl JoinStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStrategy::Crossfade => "crossfade",
            JoinStrategy::Concat => "concat",
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JoinStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crossfade" | "fade" | "xfade" => Ok(JoinStrategy::Crossfade),
            "concat" | "no_fade" | "nofade" => Ok(JoinStrategy::Concat),
            _ => Err(format!("Unknown join strategy: {}", s)),
        }
    }
}

/// Frame size in pixels, written `W:H` (or `WxH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Canonical vertical package frame.
    pub const VERTICAL: Resolution = Resolution {
        width: 1080,
        height: 1920,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (w, h) = s
            .split_once(':')
            .or_else(|| s.split_once('x'))
            .ok_or_else(|| format!("Invalid resolution: {}", s))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("Invalid width: {}", s))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("Invalid height: {}", s))?;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(format!("Resolution must be positive and even: {}", s));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(resolution: Resolution) -> Self {
        resolution.to_string()
    }
}

impl JsonSchema for Resolution {
    fn schema_name() -> String {
        "Resolution".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// Hardware-accelerated encoding requested per transform stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct HardwareFlags {
    #[serde(default)]
    pub crop: bool,
    #[serde(default)]
    pub join: bool,
    #[serde(default)]
    pub overlay: bool,
}

impl HardwareFlags {
    /// Whether any stage asks for hardware encoding.
    pub fn any(&self) -> bool {
        self.crop || self.join || self.overlay
    }
}
