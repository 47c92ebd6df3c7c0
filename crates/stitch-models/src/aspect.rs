//! Target aspect ratios for reframing.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Aspect ratios supported by the crop track builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AspectRatio {
    /// Standard portrait (9:16) for Shorts/Reels
    Portrait,
    /// Instagram portrait (4:5)
    InstagramPortrait,
    /// Square (1:1)
    Square,
}

impl AspectRatio {
    /// Ratio components as (width, height).
    pub const fn components(&self) -> (u32, u32) {
        match self {
            AspectRatio::Portrait => (9, 16),
            AspectRatio::InstagramPortrait => (4, 5),
            AspectRatio::Square => (1, 1),
        }
    }

    /// Returns the aspect ratio as a decimal.
    pub fn as_f64(&self) -> f64 {
        let (w, h) = self.components();
        w as f64 / h as f64
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::Portrait
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.components();
        write!(f, "{}:{}", w, h)
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.as_str() {
            "9:16" => Ok(AspectRatio::Portrait),
            "4:5" => Ok(AspectRatio::InstagramPortrait),
            "1:1" => Ok(AspectRatio::Square),
            _ if normalized.split(':').count() != 2 => {
                Err(AspectRatioParseError::InvalidFormat(s.to_string()))
            }
            _ => Err(AspectRatioParseError::Unsupported(s.to_string())),
        }
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = AspectRatioParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(ratio: AspectRatio) -> Self {
        ratio.to_string()
    }
}

impl JsonSchema for AspectRatio {
    fn schema_name() -> String {
        "AspectRatio".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Unsupported aspect ratio: {0}, expected 9:16, 4:5 or 1:1")]
    Unsupported(String),
}
