//! Indexing task state machine and registry.
//!
//! A rebuild is tracked as a task moving `pending → processing →
//! {completed, failed}`. The registry is the process-wide owner of task
//! state: the rebuild worker is its only writer, pollers read snapshots by
//! task id. The core mutual-exclusion invariant lives in
//! [`TaskRegistry::begin`]: at most one task may be pending or processing
//! at any instant, and a second trigger is rejected with a busy conflict
//! (never queued silently) so task identity stays unambiguous to pollers.
//!
//! Progress is monotone non-decreasing and reaches exactly 100 only on
//! completion. Terminal tasks stay queryable for a bounded retention
//! window, then may be discarded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// What triggered a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildReason {
    Upload,
    Delete,
    Manual,
}

/// Pollable view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub reason: RebuildReason,
}

struct TaskEntry {
    status: TaskStatus,
    progress: u8,
    message: String,
    reason: RebuildReason,
    finished_at: Option<Instant>,
}

struct RegistryInner {
    tasks: HashMap<Uuid, TaskEntry>,
    active: Option<Uuid>,
}

pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    retention: Duration,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tasks: HashMap::new(),
                active: None,
            }),
            retention,
        }
    }

    /// Registers a new pending task, or rejects with a busy conflict while
    /// another task is pending/processing.
    pub fn begin(&self, reason: RebuildReason) -> Result<Uuid> {
        let mut inner = self.lock();
        Self::prune(&mut inner, self.retention);

        if let Some(active_id) = inner.active {
            let busy = inner
                .tasks
                .get(&active_id)
                .map(|t| !t.status.is_terminal())
                .unwrap_or(false);
            if busy {
                return Err(Error::conflict(format!(
                    "an index rebuild is already in progress (task {})",
                    active_id
                )));
            }
        }

        let id = Uuid::new_v4();
        inner.tasks.insert(
            id,
            TaskEntry {
                status: TaskStatus::Pending,
                progress: 0,
                message: "queued for rebuild".to_string(),
                reason,
                finished_at: None,
            },
        );
        inner.active = Some(id);
        Ok(id)
    }

    pub fn set_processing(&self, id: Uuid, message: impl Into<String>) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Processing;
                task.message = message.into();
            }
        }
    }

    /// Reports progress for a processing task. Progress never decreases and
    /// is capped at 99 until completion sets exactly 100.
    pub fn set_progress(&self, id: Uuid, progress: u8, message: impl Into<String>) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.progress = task.progress.max(progress.min(99));
                task.message = message.into();
            }
        }
    }

    pub fn complete(&self, id: Uuid, message: impl Into<String>) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.get_mut(&id) {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.message = message.into();
            task.finished_at = Some(Instant::now());
        }
    }

    pub fn fail(&self, id: Uuid, message: impl Into<String>) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.get_mut(&id) {
            task.status = TaskStatus::Failed;
            task.message = message.into();
            task.finished_at = Some(Instant::now());
        }
    }

    /// Snapshot of a task by id. Unknown ids are an error, not a default
    /// "not found" status.
    pub fn status(&self, id: Uuid) -> Result<TaskSnapshot> {
        let inner = self.lock();
        inner
            .tasks
            .get(&id)
            .map(|task| TaskSnapshot {
                id,
                status: task.status,
                progress: task.progress,
                message: task.message.clone(),
                reason: task.reason,
            })
            .ok_or_else(|| Error::not_found(format!("unknown task id: {}", id)))
    }

    /// True while a task is pending or processing.
    pub fn is_busy(&self) -> bool {
        let inner = self.lock();
        inner
            .active
            .and_then(|id| inner.tasks.get(&id))
            .map(|t| !t.status.is_terminal())
            .unwrap_or(false)
    }

    fn prune(inner: &mut RegistryInner, retention: Duration) {
        let now = Instant::now();
        inner.tasks.retain(|_, task| match task.finished_at {
            Some(finished) => now.duration_since(finished) < retention,
            None => true,
        });
        if let Some(active) = inner.active {
            if !inner.tasks.contains_key(&active) {
                inner.active = None;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        // Entries are plain values; a poisoned lock is still readable.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Duration::from_secs(600))
    }

    #[test]
    fn begin_then_complete_lifecycle() {
        let registry = registry();
        let id = registry.begin(RebuildReason::Upload).unwrap();

        let snap = registry.status(id).unwrap();
        assert_eq!(snap.status, TaskStatus::Pending);
        assert_eq!(snap.progress, 0);

        registry.set_processing(id, "extracting documents");
        registry.set_progress(id, 40, "embedding chunks");
        registry.complete(id, "indexed 12 chunks from 3 documents");

        let snap = registry.status(id).unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress, 100);
    }

    #[test]
    fn second_trigger_while_busy_is_a_conflict() {
        let registry = registry();
        let id = registry.begin(RebuildReason::Upload).unwrap();
        let err = registry.begin(RebuildReason::Delete).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        registry.set_processing(id, "working");
        let err = registry.begin(RebuildReason::Delete).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        registry.complete(id, "done");
        assert!(registry.begin(RebuildReason::Delete).is_ok());
    }

    #[test]
    fn progress_is_monotone_and_caps_below_100() {
        let registry = registry();
        let id = registry.begin(RebuildReason::Manual).unwrap();
        registry.set_processing(id, "working");

        registry.set_progress(id, 50, "half");
        registry.set_progress(id, 30, "stale update");
        assert_eq!(registry.status(id).unwrap().progress, 50);

        registry.set_progress(id, 100, "almost");
        assert_eq!(registry.status(id).unwrap().progress, 99);

        registry.complete(id, "done");
        assert_eq!(registry.status(id).unwrap().progress, 100);
    }

    #[test]
    fn failed_task_never_reports_100() {
        let registry = registry();
        let id = registry.begin(RebuildReason::Upload).unwrap();
        registry.set_processing(id, "working");
        registry.set_progress(id, 80, "embedding");
        registry.fail(id, "document unreadable: broken.pdf");

        let snap = registry.status(id).unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.progress < 100);
        assert!(snap.message.contains("broken.pdf"));
    }

    #[test]
    fn unknown_task_id_is_not_found() {
        let registry = registry();
        let err = registry.status(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn terminal_tasks_are_pruned_after_retention() {
        let registry = TaskRegistry::new(Duration::ZERO);
        let id = registry.begin(RebuildReason::Upload).unwrap();
        registry.complete(id, "done");

        // The next submission prunes expired terminal tasks.
        let id2 = registry.begin(RebuildReason::Delete).unwrap();
        assert!(registry.status(id).is_err());
        assert!(registry.status(id2).is_ok());
    }
}
