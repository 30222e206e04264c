pub mod client;
pub mod staging;

pub use client::{MediaAsset, MediaClient, MediaKind};
pub use staging::{StagedFile, Staging};

use anyhow::Result;
use bytes::Bytes;

/// Stage a payload, push it to the media host, and remove the staged
/// artifact — on success and failure alike.
pub async fn store(
    staging: &Staging,
    client: &MediaClient,
    data: Bytes,
    kind: MediaKind,
) -> Result<MediaAsset> {
    let staged = staging.stage(data).await?;
    let uploaded = client.upload(&staged, kind).await;
    staged.discard().await;
    uploaded
}
