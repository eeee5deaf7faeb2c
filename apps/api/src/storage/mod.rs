//! Prompt persistence.
//!
//! Prompts are stored as pretty-printed JSON blobs under `prompts/{id}_{version}.json`.
//! [`BlobStore`] abstracts the object store (S3/MinIO in production, memory for
//! local runs and tests); [`BlobPromptStore`] layers the prompt encoding on top and
//! is what the rest of the service sees through [`PromptStore`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::prompt::Prompt;

pub mod memory;
pub mod s3;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

const PROMPT_PREFIX: &str = "prompts/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Prompt not found: {id} version {version}")]
    NotFound { id: String, version: String },

    #[error("Invalid prompt data for {id} version {version}: {source}")]
    InvalidData {
        id: String,
        version: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode prompt: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Minimal object-store surface the prompt store needs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;

    /// Returns `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Returns `false` when the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read/write access to versioned prompt documents.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn save_prompt(&self, prompt: &Prompt) -> Result<(), StorageError>;

    async fn get_prompt(&self, id: &str, version: &str) -> Result<Prompt, StorageError>;

    async fn delete_prompt(&self, id: &str, version: &str) -> Result<(), StorageError>;

    /// Every readable, well-formed prompt. Unreadable blobs are skipped.
    async fn list_prompts(&self) -> Result<Vec<Prompt>, StorageError>;

    /// Versions stored for `id`, sorted ascending.
    async fn get_prompt_versions(&self, id: &str) -> Result<Vec<String>, StorageError>;

    async fn get_sub_prompts(&self, parent_id: &str) -> Result<Vec<Prompt>, StorageError> {
        Ok(self
            .list_prompts()
            .await?
            .into_iter()
            .filter(|p| p.parent_id.as_deref() == Some(parent_id))
            .collect())
    }
}

pub fn prompt_key(id: &str, version: &str) -> String {
    format!("{PROMPT_PREFIX}{id}_{version}.json")
}

/// [`PromptStore`] over any [`BlobStore`].
pub struct BlobPromptStore<B> {
    blobs: B,
}

impl<B: BlobStore> BlobPromptStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl<B: BlobStore> PromptStore for BlobPromptStore<B> {
    async fn save_prompt(&self, prompt: &Prompt) -> Result<(), StorageError> {
        let key = prompt_key(&prompt.id, &prompt.version);
        let body = serde_json::to_vec_pretty(prompt)?;
        self.blobs.put(&key, Bytes::from(body)).await.map_err(|e| {
            error!("Failed to save prompt {key}: {e}");
            e
        })
    }

    async fn get_prompt(&self, id: &str, version: &str) -> Result<Prompt, StorageError> {
        let key = prompt_key(id, version);
        let body = self
            .blobs
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                id: id.to_string(),
                version: version.to_string(),
            })?;

        serde_json::from_slice(&body).map_err(|source| {
            error!("Error parsing prompt file {key}: {source}");
            StorageError::InvalidData {
                id: id.to_string(),
                version: version.to_string(),
                source,
            }
        })
    }

    async fn delete_prompt(&self, id: &str, version: &str) -> Result<(), StorageError> {
        let key = prompt_key(id, version);
        if self.blobs.delete(&key).await? {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                id: id.to_string(),
                version: version.to_string(),
            })
        }
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, StorageError> {
        let keys = self.blobs.list(PROMPT_PREFIX).await?;
        let mut prompts = Vec::with_capacity(keys.len());

        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            match self.blobs.get(key).await {
                Ok(Some(body)) => match serde_json::from_slice::<Prompt>(&body) {
                    Ok(prompt) => prompts.push(prompt),
                    Err(e) => warn!("Skipping invalid prompt file {key}: {e}"),
                },
                Ok(None) => warn!("Prompt file {key} disappeared while listing"),
                Err(e) => warn!("Failed to read prompt file {key}: {e}"),
            }
        }

        Ok(prompts)
    }

    async fn get_prompt_versions(&self, id: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{PROMPT_PREFIX}{id}_");
        let mut versions: Vec<String> = self
            .blobs
            .list(&prefix)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.strip_suffix(".json"))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prompt(id: &str, version: &str, parent: Option<&str>) -> Prompt {
        serde_json::from_value(json!({
            "id": id,
            "version": version,
            "name": id,
            "content": "Hello {{name}}",
            "staticTags": [],
            "dynamicTags": [],
            "conditions": [],
            "supportedLanguages": ["en"],
            "parentId": parent
        }))
        .unwrap()
    }

    fn store() -> BlobPromptStore<MemoryBlobStore> {
        BlobPromptStore::new(MemoryBlobStore::default())
    }

    #[test]
    fn test_prompt_key_layout() {
        assert_eq!(prompt_key("greet", "v1"), "prompts/greet_v1.json");
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let store = store();
        let p = prompt("greet", "v1", None);
        store.save_prompt(&p).await.unwrap();
        assert_eq!(store.get_prompt("greet", "v1").await.unwrap(), p);
    }

    #[tokio::test]
    async fn test_missing_prompt_is_not_found() {
        let err = store().get_prompt("greet", "v9").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(err.to_string(), "Prompt not found: greet version v9");
    }

    #[tokio::test]
    async fn test_delete_missing_prompt_is_not_found() {
        let err = store().delete_prompt("greet", "v1").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_skips_invalid_blobs() {
        let blobs = MemoryBlobStore::default();
        blobs
            .put("prompts/broken_v1.json", Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        let store = BlobPromptStore::new(blobs);
        store.save_prompt(&prompt("greet", "v1", None)).await.unwrap();

        let listed = store.list_prompts().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "greet");
    }

    #[tokio::test]
    async fn test_versions_are_sorted_and_scoped_to_id() {
        let store = store();
        for v in ["v2", "v1"] {
            store.save_prompt(&prompt("greet", v, None)).await.unwrap();
        }
        store.save_prompt(&prompt("other", "v1", None)).await.unwrap();

        assert_eq!(
            store.get_prompt_versions("greet").await.unwrap(),
            vec!["v1".to_string(), "v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sub_prompts_follow_parent_id() {
        let store = store();
        store.save_prompt(&prompt("root", "v1", None)).await.unwrap();
        store
            .save_prompt(&prompt("child-a", "v1", Some("root")))
            .await
            .unwrap();
        store
            .save_prompt(&prompt("child-b", "v1", Some("other")))
            .await
            .unwrap();

        let children = store.get_sub_prompts("root").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "child-a");
    }
}
