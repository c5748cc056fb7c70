//! Catalog stored as a single JSON document on disk

use super::{CatalogDocument, ProfileStore, TargetCatalog};
use crate::error::{AppError, ErrorContext, Result};
use crate::models::{HostMapping, SpeedTestProfile, SpeedTestResult, Target};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// JSON file catalog; every write rewrites the whole file atomically
pub struct JsonFileCatalog {
    path: PathBuf,
    document: Mutex<CatalogDocument>,
}

impl JsonFileCatalog {
    /// Open a catalog file. A missing file starts an empty catalog.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => CatalogDocument::default(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse catalog {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogDocument::default(),
            Err(e) => {
                return Err(AppError::storage(format!(
                    "Failed to read catalog {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn document(&self) -> CatalogDocument {
        self.document.lock().await.clone()
    }

    /// Replace the whole document and persist it
    pub async fn replace(&self, document: CatalogDocument) -> Result<()> {
        let mut current = self.document.lock().await;
        self.save(&document).await?;
        *current = document;
        Ok(())
    }

    async fn save(&self, document: &CatalogDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::storage(format!("Failed to replace {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Apply a change to a copy, persist it, then publish it
    async fn update<F, T>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut CatalogDocument) -> T + Send,
        T: Send,
    {
        let mut current = self.document.lock().await;
        let mut next = current.clone();
        let out = change(&mut next);
        self.save(&next).await?;
        *current = next;
        Ok(out)
    }
}

#[async_trait]
impl TargetCatalog for JsonFileCatalog {
    async fn list_targets(&self, ids: Option<&[u64]>) -> Result<Vec<Target>> {
        Ok(self.document.lock().await.select_targets(ids))
    }

    async fn batch_update_speed_results(&self, rows: &[SpeedTestResult]) -> Result<()> {
        self.update(|doc| doc.apply_results(rows)).await
    }

    async fn batch_upsert_hosts(&self, hosts: &[HostMapping]) -> Result<usize> {
        self.update(|doc| doc.upsert_hosts(hosts)).await
    }
}

#[async_trait]
impl ProfileStore for JsonFileCatalog {
    async fn get_profile(&self, id: u64) -> Result<SpeedTestProfile> {
        self.document.lock().await.find_profile(id)
    }

    async fn list_profiles(&self) -> Result<Vec<SpeedTestProfile>> {
        Ok(self.document.lock().await.profiles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeResult;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonFileCatalog::open(dir.path().join("catalog.json")).await.unwrap();
        assert!(catalog.list_targets(None).await.unwrap().is_empty());
        assert!(catalog.list_profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.json");

        let catalog = JsonFileCatalog::open(&path).await.unwrap();
        catalog
            .replace(CatalogDocument {
                profiles: vec![SpeedTestProfile::new(1, "default")],
                targets: vec![Target::new(7, "a", "socks5://192.0.2.1:1080")],
                ..Default::default()
            })
            .await
            .unwrap();
        catalog
            .batch_update_speed_results(&[SpeedTestResult::latency_only(7, &NodeResult::success(12))])
            .await
            .unwrap();

        let reopened = JsonFileCatalog::open(&path).await.unwrap();
        let doc = reopened.document().await;
        assert_eq!(doc.targets.len(), 1);
        assert_eq!(doc.results.get(&7).map(|r| r.latency_ms), Some(12));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(reopened.get_profile(1).await.unwrap().name, "default");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileCatalog::open(&path).await.err().unwrap();
        assert_eq!(err.category(), "PARSE");
    }
}
