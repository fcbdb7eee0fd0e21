// src/storage/mod.rs
//
// Object-storage collaborator contract. Uploads land under
// `temp/{batch}/…` via presigned URLs; confirming an issue's attachments
// moves (and renames by media type) the batch under `issues/{ticket}/`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_UPLOAD_BATCH: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSpec {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedUpload {
    pub file_name: String,
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
#[error("object storage error: {0}")]
pub struct StorageError(pub String);

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Moves every object under `source_prefix` to `target_prefix`,
    /// returning the new keys. An empty result means nothing was moved.
    async fn move_folder(
        &self,
        bucket: &str,
        source_prefix: &str,
        target_prefix: &str,
    ) -> Result<Vec<String>, StorageError>;

    async fn presign_uploads(
        &self,
        files: &[UploadSpec],
        batch_id: Uuid,
    ) -> Result<Vec<PresignedUpload>, StorageError>;

    async fn presign_download(&self, key: &str) -> Result<String, StorageError>;
}

/// Delegates to a sibling file service over HTTP (the service owns the
/// cloud credentials and the copy/delete mechanics).
pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStorage {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn move_folder(
        &self,
        bucket: &str,
        source_prefix: &str,
        target_prefix: &str,
    ) -> Result<Vec<String>, StorageError> {
        #[derive(Deserialize)]
        struct MovedKeys {
            keys: Vec<String>,
        }
        let url = format!("{}/move-folder", self.base_url);
        let body = serde_json::json!({
            "bucket": bucket,
            "source_prefix": source_prefix,
            "target_prefix": target_prefix,
        });
        let moved: MovedKeys = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError(e.to_string()))?
            .json()
            .await
            .map_err(|e| StorageError(e.to_string()))?;
        Ok(moved.keys)
    }

    async fn presign_uploads(
        &self,
        files: &[UploadSpec],
        batch_id: Uuid,
    ) -> Result<Vec<PresignedUpload>, StorageError> {
        let url = format!("{}/presign-uploads", self.base_url);
        let body = serde_json::json!({ "files": files, "batch_id": batch_id });
        let urls: Vec<PresignedUpload> = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError(e.to_string()))?
            .json()
            .await
            .map_err(|e| StorageError(e.to_string()))?;
        Ok(urls)
    }

    async fn presign_download(&self, key: &str) -> Result<String, StorageError> {
        #[derive(Deserialize)]
        struct Download {
            url: String,
        }
        let url = format!("{}/presign-download", self.base_url);
        let body = serde_json::json!({ "key": key });
        let download: Download = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError(e.to_string()))?
            .json()
            .await
            .map_err(|e| StorageError(e.to_string()))?;
        Ok(download.url)
    }
}

/// In-memory stand-in for tests and local runs. Keys are tracked per
/// prefix so `move_folder` behaves like the real recategorising move.
#[derive(Default)]
pub struct MemObjectStorage {
    objects: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning carries no invariant here; recover the data.
    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<String>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates a client uploading `file_names` under a prefix.
    pub fn put_batch(&self, prefix: &str, file_names: &[&str]) {
        self.objects().insert(
            prefix.to_string(),
            file_names.iter().map(|f| f.to_string()).collect(),
        );
    }
}

#[async_trait]
impl ObjectStorage for MemObjectStorage {
    async fn move_folder(
        &self,
        _bucket: &str,
        source_prefix: &str,
        target_prefix: &str,
    ) -> Result<Vec<String>, StorageError> {
        let mut objects = self.objects();
        let Some(files) = objects.remove(source_prefix) else {
            return Ok(vec![]);
        };
        let keys: Vec<String> = files
            .iter()
            .map(|f| format!("{target_prefix}{f}"))
            .collect();
        objects.insert(target_prefix.to_string(), files);
        Ok(keys)
    }

    async fn presign_uploads(
        &self,
        files: &[UploadSpec],
        batch_id: Uuid,
    ) -> Result<Vec<PresignedUpload>, StorageError> {
        Ok(files
            .iter()
            .map(|f| PresignedUpload {
                file_name: f.file_name.clone(),
                url: format!("mem://temp/{batch_id}/{}", f.file_name),
                fields: BTreeMap::new(),
            })
            .collect())
    }

    async fn presign_download(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("mem://{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn mem_storage_survives_a_poisoned_lock() {
        let storage = Arc::new(MemObjectStorage::new());

        let poisoner = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.objects.lock();
            panic!("poison the lock");
        })
        .join();

        storage.put_batch("temp/a/", &["panel.jpg"]);
        let moved = storage
            .move_folder("bucket", "temp/a/", "issues/2026-001/")
            .await
            .unwrap();
        assert_eq!(moved, vec!["issues/2026-001/panel.jpg".to_string()]);
    }
}
