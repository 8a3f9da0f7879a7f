//! Single-slot undo for "mark task done".
//!
//! The record is written before the done patch goes out, and rolled back to
//! whatever was there if the patch fails. Undo clears it only after the
//! restoring patch succeeds.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::api::ReviewApi;
use crate::error::UndoError;
use crate::types::{Task, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub task_id: i64,
    pub prior_status: TaskStatus,
}

#[derive(Debug, Default)]
pub struct UndoBuffer {
    slot: Mutex<Option<UndoRecord>>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reinstate a record persisted by an earlier session.
    pub fn restore(&self, record: UndoRecord) {
        *self.slot.lock() = Some(record);
    }

    pub fn record(&self) -> Option<UndoRecord> {
        *self.slot.lock()
    }

    pub fn can_undo(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub async fn mark_done(&self, api: &dyn ReviewApi, task: &Task) -> Result<Task, UndoError> {
        let record = UndoRecord {
            task_id: task.id,
            prior_status: task.status,
        };
        let previous = self.slot.lock().replace(record);

        match api.patch_task(task.id, &TaskPatch::status(TaskStatus::Done)).await {
            Ok(updated) => {
                log::info!(
                    "Undo: task {} marked done (was {})",
                    task.id,
                    record.prior_status
                );
                Ok(updated)
            }
            Err(e) => {
                let mut slot = self.slot.lock();
                if *slot == Some(record) {
                    *slot = previous;
                }
                Err(e.into())
            }
        }
    }

    pub async fn undo(&self, api: &dyn ReviewApi) -> Result<Task, UndoError> {
        let record = self.record().ok_or(UndoError::NothingToUndo)?;

        let restored = api
            .patch_task(record.task_id, &TaskPatch::status(record.prior_status))
            .await?;

        let mut slot = self.slot.lock();
        if *slot == Some(record) {
            *slot = None;
        }
        log::info!(
            "Undo: task {} restored to {}",
            record.task_id,
            record.prior_status
        );
        Ok(restored)
    }
}
