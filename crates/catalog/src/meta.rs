//! Dataset metadata records mirrored to disk.

use serde::{Deserialize, Serialize};

fn default_format() -> String {
    "parquet".to_string()
}

/// One row group of a columnar artifact; the unit of parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowGroupMeta {
    /// Row-group id in the file's native order.
    pub group_id: u32,
    /// Rows in the group; always positive.
    pub row_count: u64,
}

/// Immutable metadata for one registered dataset.
///
/// Created once at registration, mirrored to `meta.json`, never mutated,
/// destroyed on explicit delete or age-based eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMeta {
    /// Opaque short random id, unique for the process lifetime and mirror.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Creation epoch-milliseconds.
    pub timestamp: u64,
    /// Object key of the columnar artifact.
    pub storage_key: String,
    /// Bucket holding the artifact.
    pub storage_bucket: String,
    /// Public URL handed to workers verbatim.
    pub public_url: String,
    /// Columnar file format of the artifact.
    #[serde(default = "default_format")]
    pub format: String,
    /// Row groups in the file's native order, contiguous from 0.
    pub row_groups: Vec<RowGroupMeta>,
}

impl DatasetMeta {
    /// Listing row for this dataset.
    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            timestamp: self.timestamp,
            row_group_count: self.row_groups.len(),
            format: self.format.clone(),
        }
    }
}

/// Catalog listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    /// Dataset id.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Creation epoch-milliseconds.
    pub timestamp: u64,
    /// Number of row groups (and therefore tasks per job).
    pub row_group_count: usize,
    /// Columnar file format of the artifact.
    pub format: String,
}
