//! Dataset catalog: in-memory metadata map with a durable on-disk mirror.
//!
//! Architecture role:
//! - records one immutable metadata entry per registered columnar dataset
//! - mirrors every entry to `{root}/{dataset_id}/meta.json` so a restart
//!   followed by [`DatasetCatalog::restore_from_disk`] reproduces `list()`
//! - serves row-group lists to the job coordinator and supports age-based
//!   eviction for the reaper
//!
//! Concurrency: one mutex guards the map; disk I/O happens outside the lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use elytra_common::{now_ms, ElytraError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod meta;

pub use meta::{DatasetMeta, DatasetSummary, RowGroupMeta};

const META_FILE: &str = "meta.json";
const DATASET_ID_LEN: usize = 10;

/// Inputs for one dataset registration, as delivered by the conversion
/// collaborator's notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDataset {
    /// Display label.
    pub name: String,
    /// Object key of the columnar artifact.
    pub storage_key: String,
    /// Bucket holding the artifact.
    pub storage_bucket: String,
    /// Public URL handed to workers verbatim.
    pub public_url: String,
    /// Row groups in the file's native order.
    pub row_groups: Vec<RowGroupMeta>,
}

/// In-memory dataset map with `{root}/{id}/meta.json` persistence.
#[derive(Debug)]
pub struct DatasetCatalog {
    root: PathBuf,
    datasets: Mutex<HashMap<String, DatasetMeta>>,
}

impl DatasetCatalog {
    /// Build an empty catalog rooted at `root`. No disk access happens here;
    /// call [`DatasetCatalog::restore_from_disk`] to load persisted entries.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            datasets: Mutex::new(HashMap::new()),
        }
    }

    /// Mirror root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate, persist, and install a new dataset entry.
    ///
    /// The entry is written to disk before it becomes visible in memory, so
    /// a registration that survives this call also survives a restart.
    pub fn register(&self, req: RegisterDataset) -> Result<DatasetMeta> {
        validate_row_groups(&req.row_groups)?;
        let id = self.fresh_dataset_id();
        let meta = DatasetMeta {
            id: id.clone(),
            name: req.name,
            timestamp: now_ms()?,
            storage_key: req.storage_key,
            storage_bucket: req.storage_bucket,
            public_url: req.public_url,
            format: "parquet".to_string(),
            row_groups: req.row_groups,
        };

        self.write_meta(&meta)?;

        let mut datasets = self.datasets.lock().expect("catalog lock poisoned");
        datasets.insert(id.clone(), meta.clone());
        drop(datasets);

        info!(
            dataset_id = %id,
            name = %meta.name,
            row_groups = meta.row_groups.len(),
            "dataset registered"
        );
        elytra_common::global_metrics().inc_datasets_registered();
        Ok(meta)
    }

    /// Look up one dataset by id.
    pub fn get(&self, id: &str) -> Option<DatasetMeta> {
        let datasets = self.datasets.lock().expect("catalog lock poisoned");
        datasets.get(id).cloned()
    }

    /// Summaries of every live dataset, newest first.
    pub fn list(&self) -> Vec<DatasetSummary> {
        let datasets = self.datasets.lock().expect("catalog lock poisoned");
        let mut out: Vec<DatasetSummary> = datasets.values().map(DatasetMeta::summary).collect();
        drop(datasets);
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        out
    }

    /// Remove a dataset entry and, best-effort, its mirror directory.
    ///
    /// Returns whether an entry existed. Directory removal failure is logged
    /// and swallowed: the caller wanted the entry gone, and it is.
    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut datasets = self.datasets.lock().expect("catalog lock poisoned");
            datasets.remove(id)
        };
        if removed.is_none() {
            return false;
        }
        let dir = self.root.join(id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(dataset_id = %id, path = %dir.display(), error = %e, "dataset directory unlink failed");
        }
        info!(dataset_id = %id, "dataset deleted");
        true
    }

    /// Load every parseable `{root}/*/meta.json` into memory.
    ///
    /// Unparseable entries are skipped with a warning and never partially
    /// loaded. Returns the number of entries restored.
    pub fn restore_from_disk(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut restored = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            match read_meta(&meta_path) {
                Ok(meta) => restored.push(meta),
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "skipping unparseable dataset entry");
                }
            }
        }

        let count = restored.len();
        let mut datasets = self.datasets.lock().expect("catalog lock poisoned");
        for meta in restored {
            datasets.insert(meta.id.clone(), meta);
        }
        drop(datasets);

        info!(restored = count, root = %self.root.display(), "catalog restored from disk");
        Ok(count)
    }

    /// Evict every dataset older than `max_age` through the delete path.
    ///
    /// Returns the eviction count and the mirror bytes reclaimed.
    pub fn evict_older_than(&self, max_age: Duration) -> Result<(usize, u64)> {
        let cutoff = now_ms()?.saturating_sub(max_age.as_millis() as u64);
        let expired: Vec<String> = {
            let datasets = self.datasets.lock().expect("catalog lock poisoned");
            datasets
                .values()
                .filter(|m| m.timestamp < cutoff)
                .map(|m| m.id.clone())
                .collect()
        };

        let mut reclaimed = 0_u64;
        let mut evicted = 0_usize;
        for id in expired {
            reclaimed += dir_size(&self.root.join(&id));
            if self.delete(&id) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            elytra_common::global_metrics().record_eviction(evicted as u64, reclaimed);
        }
        Ok((evicted, reclaimed))
    }

    fn fresh_dataset_id(&self) -> String {
        loop {
            let id: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(DATASET_ID_LEN)
                .map(char::from)
                .collect();
            if self.root.join(&id).exists() {
                continue;
            }
            let datasets = self.datasets.lock().expect("catalog lock poisoned");
            if !datasets.contains_key(&id) {
                return id;
            }
        }
    }

    /// Atomic metadata write: temp file in the dataset directory, then rename.
    fn write_meta(&self, meta: &DatasetMeta) -> Result<()> {
        let dir = self.root.join(&meta.id);
        fs::create_dir_all(&dir)?;
        let payload = serde_json::to_vec_pretty(meta)
            .map_err(|e| ElytraError::Internal(format!("metadata json encode failed: {e}")))?;

        let staged = dir.join(format!(".elytra_staged_{}.tmp", meta.timestamp));
        fs::write(&staged, payload)?;
        let target = dir.join(META_FILE);
        fs::rename(&staged, &target).map_err(|e| {
            let _ = fs::remove_file(&staged);
            ElytraError::Io(e)
        })?;
        Ok(())
    }
}

fn read_meta(path: &Path) -> Result<DatasetMeta> {
    let raw = fs::read_to_string(path)?;
    let meta: DatasetMeta = serde_json::from_str(&raw)
        .map_err(|e| ElytraError::Internal(format!("metadata json decode failed: {e}")))?;
    validate_row_groups(&meta.row_groups)?;
    Ok(meta)
}

/// Row groups must be non-empty, contiguous from 0, with positive counts.
fn validate_row_groups(row_groups: &[RowGroupMeta]) -> Result<()> {
    if row_groups.is_empty() {
        return Err(ElytraError::InvalidRequest(
            "rowGroups must be non-empty".to_string(),
        ));
    }
    for (idx, rg) in row_groups.iter().enumerate() {
        if rg.group_id != idx as u32 {
            return Err(ElytraError::InvalidRequest(format!(
                "rowGroups must be contiguous from 0; position {idx} has id {}",
                rg.group_id
            )));
        }
        if rg.row_count == 0 {
            return Err(ElytraError::InvalidRequest(format!(
                "row group {} has zero rows",
                rg.group_id
            )));
        }
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(md) if md.is_dir() => dir_size(&entry.path()),
            Ok(md) => md.len(),
            Err(_) => 0,
        })
        .sum()
}
