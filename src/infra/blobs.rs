//! Filesystem storage for template images.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use chrono::{Datelike, Utc};
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob reference `{0}`")]
    InvalidPath(String),
    #[error("blob payload is empty")]
    EmptyPayload,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Metadata for a freshly written blob. `blob_ref` is what templates store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub blob_ref: String,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Blob directory owned by the template service. References are relative
/// paths of the form `YYYY/MM/DD/<uuid>-<slug>.<ext>`.
#[derive(Debug)]
pub struct BlobStorage {
    root: PathBuf,
}

impl BlobStorage {
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(&self, original_name: &str, data: Bytes) -> Result<StoredBlob, BlobError> {
        if data.is_empty() {
            return Err(BlobError::EmptyPayload);
        }

        let blob_ref = build_blob_ref(original_name);
        let absolute = self.resolve(&blob_ref)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(&data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(err.into());
        }
        file.flush().await?;

        Ok(StoredBlob {
            blob_ref,
            checksum: hex::encode(Sha256::digest(&data)),
            size_bytes: data.len() as u64,
        })
    }

    pub async fn read(&self, blob_ref: &str) -> Result<Bytes, BlobError> {
        let absolute = self.resolve(blob_ref)?;
        Ok(Bytes::from(fs::read(absolute).await?))
    }

    /// Missing files count as deleted.
    pub async fn delete(&self, blob_ref: &str) -> Result<(), BlobError> {
        let absolute = self.resolve(blob_ref)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, blob_ref: &str) -> Result<bool, BlobError> {
        let absolute = self.resolve(blob_ref)?;
        Ok(fs::try_exists(absolute).await?)
    }

    fn resolve(&self, blob_ref: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(blob_ref);
        let escapes = relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            });
        if blob_ref.is_empty() || escapes {
            return Err(BlobError::InvalidPath(blob_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn build_blob_ref(original_name: &str) -> String {
    let today = Utc::now().date_naive();
    format!(
        "{}/{:02}/{:02}/{}-{}",
        today.year(),
        today.month(),
        today.day(),
        Uuid::new_v4(),
        sanitize_filename(original_name)
    )
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .map(slugify)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "image".to_string());

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}
