//! Storage locators for clips, overlay assets and package outputs.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// URI scheme used for object store locators.
pub const OBJECT_SCHEME: &str = "s3://";

/// Where a media file lives.
///
/// Serialized as a plain string: `s3://bucket/key` for objects, anything else
/// is taken as a local filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// Object in a remote bucket
    Object { bucket: String, key: String },
    /// File on the local filesystem
    File(PathBuf),
}

impl Locator {
    /// Create an object locator.
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Object {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create a local file locator.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Whether this locator needs a transfer before local tools can read it.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Object { .. })
    }

    /// Final path segment, used to name local copies.
    pub fn file_name(&self) -> String {
        match self {
            Self::Object { key, .. } => key
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| key.replace('/', "_")),
            Self::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().replace('/', "_")),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object { bucket, key } => write!(f, "{}{}/{}", OBJECT_SCHEME, bucket, key),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocatorParseError::Empty);
        }

        let Some(rest) = s.strip_prefix(OBJECT_SCHEME) else {
            return Ok(Self::File(PathBuf::from(s)));
        };

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| LocatorParseError::MissingKey(s.to_string()))?;
        if bucket.is_empty() {
            return Err(LocatorParseError::MissingBucket(s.to_string()));
        }
        if key.is_empty() {
            return Err(LocatorParseError::MissingKey(s.to_string()));
        }

        Ok(Self::object(bucket, key))
    }
}

impl TryFrom<String> for Locator {
    type Error = LocatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

impl JsonSchema for Locator {
    fn schema_name() -> String {
        "Locator".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorParseError {
    #[error("Locator cannot be empty")]
    Empty,
    #[error("Object locator has no bucket: {0}")]
    MissingBucket(String),
    #[error("Object locator has no key: {0}")]
    MissingKey(String),
}
