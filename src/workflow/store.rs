//! Durable workflow persistence
//!
//! One JSON document per workflow (state plus full history) under the state
//! directory. Every mutation is written through before the call returns, via
//! a temp-file rename so readers only ever observe committed documents.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{Workflow, WorkflowHistory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// A workflow and its append-only history, persisted as one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub workflow: Workflow,
    pub history: Vec<WorkflowHistory>,
}

/// File-backed workflow store with per-workflow locks
pub struct WorkflowStore {
    state_dir: PathBuf,
    entries: RwLock<HashMap<String, Arc<Mutex<StoredWorkflow>>>>,
}

impl WorkflowStore {
    /// Open (and create) the state directory
    pub fn open(state_dir: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)
            .map_err(|e| OrchestratorError::internal(format!("state dir: {e}")))?;
        Ok(Self {
            state_dir,
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn document_path(&self, workflow_id: &str) -> PathBuf {
        self.state_dir.join(format!("{workflow_id}.json"))
    }

    /// Write a document through to disk (temp file + rename)
    pub fn persist(&self, stored: &StoredWorkflow) -> OrchestratorResult<()> {
        let path = self.document_path(&stored.workflow.id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(stored)
            .map_err(|e| OrchestratorError::internal(format!("serialize workflow: {e}")))?;
        std::fs::write(&tmp, payload)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| OrchestratorError::internal(format!("write {}: {e}", path.display())))?;
        debug!(workflow_id = %stored.workflow.id, "workflow persisted");
        Ok(())
    }

    /// Register a new workflow, persisting it immediately
    pub async fn insert(&self, stored: StoredWorkflow) -> OrchestratorResult<()> {
        self.persist(&stored)?;
        self.entries
            .write()
            .await
            .insert(stored.workflow.id.clone(), Arc::new(Mutex::new(stored)));
        Ok(())
    }

    /// The lockable entry for a workflow, loading from disk on first touch.
    ///
    /// Holding the entry's mutex serializes all mutation for that workflow.
    pub async fn entry(&self, workflow_id: &str) -> OrchestratorResult<Arc<Mutex<StoredWorkflow>>> {
        if let Some(entry) = self.entries.read().await.get(workflow_id) {
            return Ok(entry.clone());
        }

        let stored = self.load(workflow_id)?;
        let mut entries = self.entries.write().await;
        // Another task may have loaded it while we read the file
        let entry = entries
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(stored)));
        Ok(entry.clone())
    }

    fn load(&self, workflow_id: &str) -> OrchestratorResult<StoredWorkflow> {
        let path = self.document_path(workflow_id);
        if !path.exists() {
            return Err(OrchestratorError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OrchestratorError::PersistenceCorrupted {
                workflow_id: workflow_id.to_string(),
                message: format!("unreadable document: {e}"),
            }
        })?;
        serde_json::from_str(&content).map_err(|e| OrchestratorError::PersistenceCorrupted {
            workflow_id: workflow_id.to_string(),
            message: format!("malformed document: {e}"),
        })
    }

    /// Committed snapshot of a workflow document
    pub async fn get(&self, workflow_id: &str) -> OrchestratorResult<StoredWorkflow> {
        let entry = self.entry(workflow_id).await?;
        let stored = entry.lock().await;
        Ok(stored.clone())
    }

    /// Every workflow id known to the store (disk and memory)
    pub async fn list_ids(&self) -> OrchestratorResult<Vec<String>> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.state_dir)
            .map_err(|e| OrchestratorError::internal(format!("scan state dir: {e}")))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(String::from)
            })
            .collect();
        for id in self.entries.read().await.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Highest `NNN` counter across all persisted feature ids
    pub async fn max_feature_number(&self) -> OrchestratorResult<u32> {
        let mut max = 0;
        for id in self.list_ids().await? {
            // Skip corrupt documents here; they surface on direct access
            if let Ok(stored) = self.load_or_cached(&id).await {
                if let Some(number) = feature_number(&stored.workflow.feature_id) {
                    max = max.max(number);
                }
            }
        }
        Ok(max)
    }

    async fn load_or_cached(&self, workflow_id: &str) -> OrchestratorResult<StoredWorkflow> {
        if let Some(entry) = self.entries.read().await.get(workflow_id) {
            return Ok(entry.lock().await.clone());
        }
        self.load(workflow_id)
    }

    /// Drop the in-memory cache; used to exercise reload-from-disk paths
    pub async fn evict_all(&self) {
        self.entries.write().await.clear();
    }
}

/// Parse the leading `NNN` counter out of a feature id
pub fn feature_number(feature_id: &str) -> Option<u32> {
    let digits = feature_id.get(..3)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
