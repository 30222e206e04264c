use anyhow::Result;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Local staging area for inbound multipart payloads.
///
/// Each payload lands in its own file under the staging dir and is removed
/// once the media-host round trip finishes, whichever way it went.
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media staging directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Write the payload to a fresh temp file and record its SHA-256.
    pub async fn stage(&self, data: Bytes) -> Result<StagedFile> {
        let path = self.dir.join(Uuid::new_v4().to_string());

        let mut hasher = Sha256::new();
        hasher.update(&data);
        let sha256 = hex::encode(hasher.finalize());

        let len = data.len() as u64;
        fs::write(&path, &data).await?;

        Ok(StagedFile {
            path,
            sha256,
            len,
            removed: false,
        })
    }
}

/// A payload parked on disk awaiting upload.
///
/// The artifact is removed on `discard`, and if the value is dropped without
/// one (a handler bailing out early, the request task getting cancelled) the
/// `Drop` impl removes it synchronously instead.
pub struct StagedFile {
    pub path: PathBuf,
    pub sha256: String,
    pub len: u64,
    removed: bool,
}

impl StagedFile {
    /// Remove the artifact. Best effort — a leftover temp file is a warning,
    /// not a failure of the enclosing operation.
    pub async fn discard(mut self) {
        self.removed = true;
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!("Failed to remove staged file {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged file {}: {}", self.path.display(), e);
            }
        }
    }
}
