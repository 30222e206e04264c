use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use crate::staging::StagedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// A stored asset on the media host.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaAsset {
    pub url: String,
}

/// Thin client for the external media host.
///
/// One round trip per upload, no retry; callers abort their enclosing
/// operation on failure and discard the staged artifact.
pub struct MediaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MediaClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    pub async fn upload(&self, staged: &StagedFile, kind: MediaKind) -> Result<MediaAsset> {
        let data = tokio::fs::read(&staged.path)
            .await
            .context("staged file vanished before upload")?;

        let file_name = staged
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data).file_name(file_name));

        let resp = self
            .http
            .post(format!("{}/upload", self.base_url))
            .query(&[("kind", kind.as_str())])
            .bearer_auth(&self.api_key)
            .header("x-content-sha256", &staged.sha256)
            .multipart(form)
            .send()
            .await
            .context("media host unreachable")?;

        if !resp.status().is_success() {
            bail!("media host rejected upload: {}", resp.status());
        }

        let asset: MediaAsset = resp
            .json()
            .await
            .context("malformed media host response")?;

        info!("Uploaded {} bytes ({}) to media host: {}", staged.len, kind.as_str(), asset.url);
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::Staging;
    use bytes::Bytes;

    #[test]
    fn kind_maps_to_query_value() {
        assert_eq!(MediaKind::Image.as_str(), "image");
        assert_eq!(MediaKind::Video.as_str(), "video");
    }

    #[tokio::test]
    async fn unreachable_host_fails_and_store_discards_artifact() {
        let dir = std::env::temp_dir().join(format!("reel-client-test-{}", uuid::Uuid::new_v4()));
        let staging = Staging::new(dir.clone()).await.unwrap();
        // Reserved port, nothing listening.
        let client = MediaClient::new("http://127.0.0.1:1".into(), "test-key".into());

        let result = crate::store(&staging, &client, Bytes::from_static(b"clip"), MediaKind::Video).await;
        assert!(result.is_err());

        // The staged temp file must be gone even though the upload failed.
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
