//! Human review of extracted items.
//!
//! Approve/reject/edit each issue one `PATCH /items/{id}`. Approving an
//! action item first tries to turn it into a task; that step may fail without
//! blocking the approval. An item being mutated is marked busy until its
//! round trip finishes, and a second mutation on it fails fast.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::api::ReviewApi;
use crate::error::ReviewError;
use crate::types::{CreateTaskRequest, ExtractedItem, ItemKind, ItemPatch, ReviewStatus, Task};

pub const REASON_APPROVED: &str = "human_approved";
pub const REASON_REJECTED: &str = "human_rejected";
pub const REASON_EDITED: &str = "human_edit";

/// Explicit context for review operations that touch the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewContext {
    pub workspace_id: i64,
}

// =============================================================================
// Filtering
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReviewFilter {
    #[default]
    Pending,
    Approved,
    Rejected,
    All,
}

impl ReviewFilter {
    pub const VIEWS: [ReviewFilter; 4] = [
        ReviewFilter::Pending,
        ReviewFilter::Approved,
        ReviewFilter::Rejected,
        ReviewFilter::All,
    ];

    pub fn matches(self, item: &ExtractedItem) -> bool {
        match self {
            ReviewFilter::Pending => item.status == ReviewStatus::Pending,
            ReviewFilter::Approved => item.status == ReviewStatus::Approved,
            ReviewFilter::Rejected => item.status == ReviewStatus::Rejected,
            ReviewFilter::All => true,
        }
    }

    pub fn apply(self, items: &[ExtractedItem]) -> Vec<&ExtractedItem> {
        items.iter().filter(|i| self.matches(i)).collect()
    }

    pub fn count(self, items: &[ExtractedItem]) -> usize {
        items.iter().filter(|i| self.matches(i)).count()
    }
}

impl fmt::Display for ReviewFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewFilter::Pending => f.pad("pending"),
            ReviewFilter::Approved => f.pad("approved"),
            ReviewFilter::Rejected => f.pad("rejected"),
            ReviewFilter::All => f.pad("all"),
        }
    }
}

impl FromStr for ReviewFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReviewFilter::Pending),
            "approved" => Ok(ReviewFilter::Approved),
            "rejected" => Ok(ReviewFilter::Rejected),
            "all" => Ok(ReviewFilter::All),
            other => Err(format!(
                "unknown filter '{}' (expected pending, approved, rejected or all)",
                other
            )),
        }
    }
}

// =============================================================================
// Busy flags
// =============================================================================

/// In-flight flags keyed by item id.
#[derive(Debug, Clone, Default)]
pub struct BusySet {
    inner: Arc<DashMap<i64, ()>>,
}

impl BusySet {
    /// Mark `id` busy, or None if it already is. The flag clears when the
    /// guard drops.
    pub fn try_acquire(&self, id: i64) -> Option<BusyGuard> {
        match self.inner.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(BusyGuard {
                    inner: self.inner.clone(),
                    id,
                })
            }
        }
    }

    pub fn is_busy(&self, id: i64) -> bool {
        self.inner.contains_key(&id)
    }
}

pub struct BusyGuard {
    inner: Arc<DashMap<i64, ()>>,
    id: i64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.remove(&self.id);
    }
}

// =============================================================================
// Workflow
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub item: ExtractedItem,
    /// Task created from an approved action item.
    pub task: Option<Task>,
    /// Why task creation failed, when it was attempted and did.
    pub task_error: Option<String>,
}

pub struct ReviewWorkflow {
    api: Arc<dyn ReviewApi>,
    busy: BusySet,
}

impl ReviewWorkflow {
    pub fn new(api: Arc<dyn ReviewApi>) -> Self {
        Self {
            api,
            busy: BusySet::default(),
        }
    }

    pub fn is_busy(&self, item_id: i64) -> bool {
        self.busy.is_busy(item_id)
    }

    fn acquire(&self, item_id: i64) -> Result<BusyGuard, ReviewError> {
        self.busy
            .try_acquire(item_id)
            .ok_or(ReviewError::Busy(item_id))
    }

    pub async fn approve(
        &self,
        ctx: &ReviewContext,
        item: &ExtractedItem,
    ) -> Result<ApprovalOutcome, ReviewError> {
        let _guard = self.acquire(item.id)?;

        let mut task = None;
        let mut task_error = None;
        if item.kind == ItemKind::ActionItem {
            match self.api.create_task(&task_request(ctx, item)).await {
                Ok(created) => {
                    log::info!("Review: item {} became task {}", item.id, created.id);
                    task = Some(created);
                }
                Err(e) => {
                    log::warn!(
                        "Review: task creation for item {} failed, approving anyway: {}",
                        item.id,
                        e
                    );
                    task_error = Some(e.to_string());
                }
            }
        }

        let updated = self.api.patch_item(item.id, &approval_patch()).await?;
        Ok(ApprovalOutcome {
            item: updated,
            task,
            task_error,
        })
    }

    /// Reject with an optional free-text reason; blank reasons count as none.
    pub async fn reject(
        &self,
        item: &ExtractedItem,
        reason: Option<&str>,
    ) -> Result<ExtractedItem, ReviewError> {
        let _guard = self.acquire(item.id)?;
        let updated = self.api.patch_item(item.id, &rejection_patch(reason)).await?;
        Ok(updated)
    }

    pub async fn edit(
        &self,
        item_id: i64,
        mut patch: ItemPatch,
        reason: Option<&str>,
    ) -> Result<ExtractedItem, ReviewError> {
        let _guard = self.acquire(item_id)?;
        patch.edit_reason = Some(
            reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(REASON_EDITED)
                .to_string(),
        );
        let updated = self.api.patch_item(item_id, &patch).await?;
        Ok(updated)
    }
}

fn task_request(ctx: &ReviewContext, item: &ExtractedItem) -> CreateTaskRequest {
    CreateTaskRequest {
        details: item.details.clone(),
        ..CreateTaskRequest::new(ctx.workspace_id, item.title.clone())
    }
}

fn approval_patch() -> ItemPatch {
    ItemPatch {
        status: Some(ReviewStatus::Approved),
        needs_review: Some(false),
        review_reasons: Some(Vec::new()),
        edit_reason: Some(REASON_APPROVED.to_string()),
        ..Default::default()
    }
}

fn rejection_patch(reason: Option<&str>) -> ItemPatch {
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(REASON_REJECTED);
    ItemPatch {
        status: Some(ReviewStatus::Rejected),
        needs_review: Some(true),
        review_reasons: Some(vec![reason.to_string()]),
        edit_reason: Some(REASON_REJECTED.to_string()),
        ..Default::default()
    }
}
