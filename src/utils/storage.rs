use std::{
    io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::Config, error::ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    /// Identifies the image by its leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageKind::Png)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageKind::Webp)
        } else {
            None
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PhotoError {
    #[error("Photo is empty")]
    Empty,
    #[error("Photo exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("Unsupported image type. Allowed: jpeg, png, webp")]
    Unsupported,
    #[error("Declared content type does not match the image data")]
    Mismatch,
}

impl From<PhotoError> for ApiError {
    fn from(e: PhotoError) -> Self {
        match e {
            PhotoError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

/// Checks an uploaded image and returns the detected kind.
///
/// Generic declared types (`application/octet-stream`, none at all) defer to
/// the sniffed kind; a specific image type that disagrees is refused.
pub fn validate_image(
    bytes: &[u8],
    declared: Option<&str>,
    max_bytes: usize,
) -> Result<ImageKind, PhotoError> {
    if bytes.is_empty() {
        return Err(PhotoError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(PhotoError::TooLarge { limit: max_bytes });
    }

    let kind = ImageKind::sniff(bytes).ok_or(PhotoError::Unsupported)?;

    if let Some(declared) = declared.filter(|d| d.starts_with("image/")) {
        match ImageKind::from_mime(declared) {
            Some(d) if d == kind => {}
            Some(_) => return Err(PhotoError::Mismatch),
            None => return Err(PhotoError::Unsupported),
        }
    }

    Ok(kind)
}

#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub key: String,
    pub url: String,
    pub kind: ImageKind,
    pub size: usize,
}

/// Photos on local disk, addressed by relative keys like `profile/42/<uuid>.png`.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
    public_base: String,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.media_root.clone(), config.public_media_url.clone())
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    /// Maps a key to a path under the root, refusing anything but plain segments.
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || key.contains('\\') {
            return None;
        }
        let path = Path::new(key);
        if !path.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(path))
    }

    pub async fn save(
        &self,
        folder: &str,
        owner_id: u64,
        kind: ImageKind,
        bytes: &[u8],
    ) -> io::Result<StoredPhoto> {
        let key = format!("{}/{}/{}.{}", folder, owner_id, Uuid::new_v4(), kind.extension());
        let path = self
            .resolve(&key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid storage key"))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(key = %key, size = bytes.len(), "Photo stored");

        Ok(StoredPhoto {
            url: self.url_for(&key),
            key,
            kind,
            size: bytes.len(),
        })
    }

    /// `Ok(None)` when the key is invalid or nothing is stored under it.
    pub async fn read(&self, key: &str) -> io::Result<Option<(ImageKind, Vec<u8>)>> {
        let Some(path) = self.resolve(key) else {
            return Ok(None);
        };
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageKind::from_extension)
        else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((kind, bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deleting a missing file is not an error.
    pub async fn delete(&self, key: &str) -> io::Result<()> {
        let Some(path) = self.resolve(key) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Removes every file stored for `owner_id` under `folder`.
    pub async fn delete_owner(&self, folder: &str, owner_id: u64) -> io::Result<()> {
        let Some(dir) = self.resolve(&format!("{folder}/{owner_id}")) else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(folder, owner_id, "Owner photos removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn discard_owner(&self, folder: &str, owner_id: u64) {
        if let Err(e) = self.delete_owner(folder, owner_id).await {
            warn!(error = %e, folder, owner_id, "Failed to remove stale photos");
        }
    }

    /// Best-effort cleanup used after the database no longer references `key`.
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.delete(key).await {
            warn!(error = %e, key = %key, "Failed to remove stale photo");
        }
    }
}

#[cfg(test)]
pub mod test_images {
    pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    pub const WEBP: &[u8] = b"RIFF\x24\0\0\0WEBPVP8 ";
}
