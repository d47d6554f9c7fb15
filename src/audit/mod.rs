//! Append-only audit sink, partitioned by feature id
//!
//! One newline-delimited JSON file per feature under the audit directory.
//! Records are written synchronously before the owning response returns, so
//! a successful call implies the record is already queryable. Appends go
//! through `O_APPEND` opens and are safe across multiple writers.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::audit::AuditRecord;
use crate::model::workflow::is_valid_feature_id;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// JSONL audit sink rooted at a directory
pub struct AuditSink {
    dir: PathBuf,
}

impl AuditSink {
    /// Open (and create) the audit directory
    pub fn new(dir: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| OrchestratorError::internal(format!("audit dir: {e}")))?;
        Ok(Self { dir })
    }

    fn partition_path(&self, feature_id: &str) -> OrchestratorResult<PathBuf> {
        // The pattern guard doubles as path-traversal protection: a feature
        // id can never contain separators or dots.
        if !is_valid_feature_id(feature_id) {
            return Err(OrchestratorError::internal(format!(
                "invalid feature id '{feature_id}' for audit partition"
            )));
        }
        Ok(self.dir.join(format!("{feature_id}.jsonl")))
    }

    /// Append one record to its feature partition
    pub fn append(&self, record: &AuditRecord) -> OrchestratorResult<()> {
        let path = self.partition_path(&record.feature_id)?;
        let line = serde_json::to_string(record)
            .map_err(|e| OrchestratorError::internal(format!("serialize audit record: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| OrchestratorError::internal(format!("open {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| OrchestratorError::internal(format!("append {}: {e}", path.display())))?;

        debug!(
            feature_id = %record.feature_id,
            record_id = %record.id,
            status = %record.status,
            "audit record written"
        );
        Ok(())
    }

    /// All records for a feature, in insertion order
    pub fn list(&self, feature_id: &str) -> OrchestratorResult<Vec<AuditRecord>> {
        let path = self.partition_path(feature_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_partition(&path)
    }

    /// Walk `parent_id` links from `record_id` back to the root and return
    /// the chain in chronological order. Unknown ids yield an empty chain.
    pub fn chain(
        &self,
        record_id: &str,
        feature_id: &str,
    ) -> OrchestratorResult<Vec<AuditRecord>> {
        let records = self.list(feature_id)?;
        let by_id: std::collections::HashMap<&str, &AuditRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();

        if !by_id.contains_key(record_id) {
            return Ok(Vec::new());
        }

        let mut chain = Vec::new();
        let mut current = Some(record_id);
        while let Some(id) = current {
            let Some(record) = by_id.get(id) else { break };
            chain.push((*record).clone());
            current = record.parent_id.as_deref();
        }
        chain.reverse();
        Ok(chain)
    }
}

fn read_partition(path: &Path) -> OrchestratorResult<Vec<AuditRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::internal(format!("read {}: {e}", path.display())))?;
    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(line).map_err(|e| {
            OrchestratorError::internal(format!(
                "corrupt audit line {} in {}: {e}",
                line_no + 1,
                path.display()
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}
