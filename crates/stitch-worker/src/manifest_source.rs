//! Manifest loading from inline values, local files or HTTP(S) URLs.

use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use stitch_models::{ManifestError, ManifestKind, ManifestResult, OBJECT_SCHEME};
use tracing::debug;

use crate::request::ManifestSource;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves manifest references to JSON documents.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    http: Client,
}

impl ManifestLoader {
    pub fn new() -> ManifestResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("stitch-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ManifestError::unreadable(ManifestKind::Request, "http client", e.to_string())
            })?;
        Ok(Self { http })
    }

    pub async fn load(&self, kind: ManifestKind, source: &ManifestSource) -> ManifestResult<Value> {
        match source {
            ManifestSource::Inline(value) => Ok(value.clone()),
            ManifestSource::Reference(reference) => self.load_reference(kind, reference).await,
        }
    }

    /// Load and parse the JSON document behind `reference`.
    pub async fn load_reference(&self, kind: ManifestKind, reference: &str) -> ManifestResult<Value> {
        let reference = reference.trim();
        let text = if is_http(reference) {
            self.fetch_url(kind, reference).await?
        } else if reference.starts_with(OBJECT_SCHEME) {
            return Err(ManifestError::unreadable(
                kind,
                reference,
                "object store references are not supported for manifests",
            ));
        } else {
            read_file(kind, Path::new(reference)).await?
        };

        debug!(%kind, reference, bytes = text.len(), "Loaded manifest");
        serde_json::from_str(&text).map_err(|e| ManifestError::json(kind, e))
    }

    async fn fetch_url(&self, kind: ManifestKind, url: &str) -> ManifestResult<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ManifestError::unreadable(kind, url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManifestError::unreadable(kind, url, format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| ManifestError::unreadable(kind, url, e.to_string()))
    }
}

fn is_http(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

async fn read_file(kind: ManifestKind, path: &Path) -> ManifestResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ManifestError::unreadable(kind, path.display().to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_inline_and_file_sources() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crop.json");
        tokio::fs::write(&path, r#"{"frames": [{"frame": 1, "xMin": 0, "xMax": 10}]}"#)
            .await
            .unwrap();
        let loader = ManifestLoader::new().unwrap();

        let inline = loader
            .load(ManifestKind::Clips, &ManifestSource::inline(json!(["a.mp4"])))
            .await
            .unwrap();
        assert_eq!(inline, json!(["a.mp4"]));

        let loaded = loader
            .load_reference(ManifestKind::Crop, path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(loaded["frames"][0]["xMax"], 10);
    }

    #[tokio::test]
    async fn test_unreadable_and_malformed() {
        let dir = TempDir::new().unwrap();
        let loader = ManifestLoader::new().unwrap();

        let missing = dir.path().join("missing.json");
        let err = loader
            .load_reference(ManifestKind::Crop, missing.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Unreadable { kind: ManifestKind::Crop, .. }));

        let broken = dir.path().join("broken.json");
        tokio::fs::write(&broken, "{not json").await.unwrap();
        let err = loader
            .load_reference(ManifestKind::Overlay, broken.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Json { kind: ManifestKind::Overlay, .. }));
    }

    #[test]
    fn test_http_detection() {
        assert!(is_http("https://cdn.example.com/aspect.json"));
        assert!(is_http("HTTP://host/a.json"));
        assert!(!is_http("/data/aspect.json"));
    }
}
