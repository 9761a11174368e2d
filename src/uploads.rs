//! Condition photo storage.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// URL prefix under which condition photos are served.
pub const CONDITION_PHOTO_PREFIX: &str = "/uploads/asset_condition_photo";

const UPLOADS_URL_ROOT: &str = "/uploads/";

#[derive(Debug, Error)]
pub enum PhotoStoreError {
    #[error("refusing to delete {url}: path escapes the uploads directory")]
    InvalidPath { url: String },

    #[error("failed to delete {url}: {message}")]
    Io { url: String, message: String },
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Deletes the photo behind `url`. A photo that is already gone counts as
    /// deleted.
    async fn delete(&self, url: &str) -> Result<(), PhotoStoreError>;
}

/// Photos kept on the local filesystem under the uploads directory.
#[derive(Debug, Clone)]
pub struct LocalPhotoStore {
    root: PathBuf,
}

impl LocalPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path of a condition photo URL, or `None` for URLs this
    /// store does not manage.
    fn resolve(&self, url: &str) -> Result<Option<PathBuf>, PhotoStoreError> {
        if !url.starts_with(CONDITION_PHOTO_PREFIX) {
            return Ok(None);
        }
        let relative = Path::new(&url[UPLOADS_URL_ROOT.len()..]);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PhotoStoreError::InvalidPath {
                url: url.to_string(),
            });
        }
        Ok(Some(self.root.join(relative)))
    }
}

#[async_trait]
impl PhotoStore for LocalPhotoStore {
    async fn delete(&self, url: &str) -> Result<(), PhotoStoreError> {
        let path = match self.resolve(url)? {
            Some(path) => path,
            None => {
                debug!(url = %url, "Skipping photo outside the condition photo directory");
                return Ok(());
            }
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Deleted condition photo");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Condition photo already gone");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not delete condition photo");
                Err(PhotoStoreError::Io {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
