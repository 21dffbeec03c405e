//! S3-compatible blob-store access.

use std::collections::HashSet;

use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Upper bound on identifiers handled per deletion batch.
const MAX_DELETE_BATCH: usize = 1000;

/// Client for the CDN-backed object store. All keys live under the
/// configured images folder; deleting that folder itself is refused.
pub struct BlobStore {
    bucket: Box<Bucket>,
    images_folder: String,
}

impl BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        images_folder: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            images_folder: images_folder.to_string(),
        })
    }

    /// List every key under `prefix`, paging through continuation tokens
    /// until the listing is exhausted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let (page, _) = self
                .bucket
                .list_page(prefix.to_string(), None, continuation, None, None)
                .await?;

            keys.extend(page.contents.into_iter().map(|object| object.key));

            match page.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(keys)
    }

    /// Like [`list`](Self::list), as a set for O(1) membership tests.
    pub async fn list_as_set(&self, prefix: &str) -> Result<HashSet<String>, StorageError> {
        Ok(self.list(prefix).await?.into_iter().collect())
    }

    /// True iff exactly one key matches `key` as a prefix. More than one
    /// match means the caller's key is ambiguous and is treated as absent.
    pub async fn exists(&self, key: &str) -> bool {
        match self.list(key).await {
            Ok(keys) if keys.len() == 1 => true,
            Ok(keys) if keys.len() > 1 => {
                tracing::warn!(key, matches = keys.len(), "prefix matches more than one object");
                false
            }
            Ok(_) => false,
            Err(e) => {
                tracing::error!(key, error = %e, "could not list objects");
                false
            }
        }
    }

    /// Store `bytes` at `key`; the content-type header is omitted when
    /// empty.
    pub async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        if content_type.is_empty() {
            self.bucket.put_object(key, bytes).await?;
        } else {
            self.bucket
                .put_object_with_content_type(key, bytes, content_type)
                .await?;
        }
        Ok(())
    }

    /// Delete everything under each prefix. The empty prefix and the images
    /// root are refused outright, before any network call. Identifiers are
    /// deleted in batches of at most [`MAX_DELETE_BATCH`]; failures
    /// accumulate and surface as one aggregate error.
    pub async fn delete(&self, prefixes: &[String]) -> Result<(), StorageError> {
        for prefix in prefixes {
            let trimmed = prefix.strip_suffix('/').unwrap_or(prefix);
            if trimmed.is_empty() || trimmed == self.images_folder {
                return Err(StorageError::NotImplemented(prefix.clone()));
            }
        }

        let mut identifiers = Vec::new();
        for prefix in prefixes {
            identifiers.extend(self.list(prefix).await?);
        }

        let mut failures = Vec::new();

        for chunk in identifiers.chunks(MAX_DELETE_BATCH) {
            let results =
                futures::future::join_all(chunk.iter().map(|key| self.bucket.delete_object(key)))
                    .await;

            for (key, result) in chunk.iter().zip(results) {
                if let Err(e) = result {
                    failures.push(format!("{key}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Delete(failures.join(" | ")))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("NOT_IMPLEMENTED: refusing to delete the images root: {0}")]
    NotImplemented(String),

    #[error("could not delete images: {0}")]
    Delete(String),
}
