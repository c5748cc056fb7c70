//! Target catalog and profile storage

pub mod json;

use crate::error::{AppError, Result};
use crate::models::{HostMapping, SpeedTestProfile, SpeedTestResult, Target};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

pub use json::JsonFileCatalog;

/// Read targets at run start, write results once at run end
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    /// All targets, or only those with the given ids, in catalog order
    async fn list_targets(&self, ids: Option<&[u64]>) -> Result<Vec<Target>>;

    async fn batch_update_speed_results(&self, rows: &[SpeedTestResult]) -> Result<()>;

    /// Insert or replace mappings by hostname; returns how many were written
    async fn batch_upsert_hosts(&self, hosts: &[HostMapping]) -> Result<usize>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: u64) -> Result<SpeedTestProfile>;

    async fn list_profiles(&self) -> Result<Vec<SpeedTestProfile>>;
}

/// Everything a catalog stores
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub profiles: Vec<SpeedTestProfile>,
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Latest result per target id
    #[serde(default)]
    pub results: BTreeMap<u64, SpeedTestResult>,
    /// Host mappings by hostname
    #[serde(default)]
    pub hosts: BTreeMap<String, HostMapping>,
}

impl CatalogDocument {
    pub fn select_targets(&self, ids: Option<&[u64]>) -> Vec<Target> {
        match ids {
            None => self.targets.clone(),
            Some(ids) => self
                .targets
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect(),
        }
    }

    pub fn find_profile(&self, id: u64) -> Result<SpeedTestProfile> {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::config(format!("Speed test profile {} not found", id)))
    }

    pub fn apply_results(&mut self, rows: &[SpeedTestResult]) {
        for row in rows {
            self.results.insert(row.target_id, row.clone());
        }
    }

    pub fn upsert_hosts(&mut self, hosts: &[HostMapping]) -> usize {
        let mut written = 0;
        for host in hosts {
            if self.hosts.get(&host.hostname) != Some(host) {
                self.hosts.insert(host.hostname.clone(), host.clone());
                written += 1;
            }
        }
        written
    }
}

/// In-memory catalog for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    document: RwLock<CatalogDocument>,
    fail_writes: AtomicBool,
    result_writes: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new(profiles: Vec<SpeedTestProfile>, targets: Vec<Target>) -> Self {
        Self {
            document: RwLock::new(CatalogDocument {
                profiles,
                targets,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Make every subsequent write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful result batch writes
    pub fn result_writes(&self) -> usize {
        self.result_writes.load(Ordering::SeqCst)
    }

    pub async fn results(&self) -> Vec<SpeedTestResult> {
        self.document.read().await.results.values().cloned().collect()
    }

    pub async fn hosts(&self) -> Vec<HostMapping> {
        self.document.read().await.hosts.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage("catalog is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetCatalog for MemoryCatalog {
    async fn list_targets(&self, ids: Option<&[u64]>) -> Result<Vec<Target>> {
        Ok(self.document.read().await.select_targets(ids))
    }

    async fn batch_update_speed_results(&self, rows: &[SpeedTestResult]) -> Result<()> {
        self.check_writable()?;
        self.document.write().await.apply_results(rows);
        self.result_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_upsert_hosts(&self, hosts: &[HostMapping]) -> Result<usize> {
        self.check_writable()?;
        Ok(self.document.write().await.upsert_hosts(hosts))
    }
}

#[async_trait]
impl ProfileStore for MemoryCatalog {
    async fn get_profile(&self, id: u64) -> Result<SpeedTestProfile> {
        self.document.read().await.find_profile(id)
    }

    async fn list_profiles(&self) -> Result<Vec<SpeedTestProfile>> {
        Ok(self.document.read().await.profiles.clone())
    }
}
