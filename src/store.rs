//! Workspace, meeting, member and task state for the active workspace.
//!
//! Every fetch completes before anything is committed, so a failed refresh
//! leaves the previous view intact.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::api::ReviewApi;
use crate::error::{ApiError, StateError};
use crate::types::{
    CreateMeetingRequest, CreateTaskRequest, Meeting, Task, TaskPatch, TaskStatus,
    TranscriptVersion, Workspace, WorkspaceMember,
};

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub workspaces: Vec<Workspace>,
    pub active_workspace: Option<i64>,
    pub active_meeting: Option<i64>,
    pub meetings: Vec<Meeting>,
    pub members: Vec<WorkspaceMember>,
    pub tasks: Vec<Task>,
}

impl StoreSnapshot {
    pub fn workspace(&self) -> Option<&Workspace> {
        let id = self.active_workspace?;
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn meeting(&self) -> Option<&Meeting> {
        let id = self.active_meeting?;
        self.meetings.iter().find(|m| m.id == id)
    }
}

pub struct WorkspaceStore {
    api: Arc<dyn ReviewApi>,
    inner: RwLock<StoreSnapshot>,
}

impl WorkspaceStore {
    pub fn new(api: Arc<dyn ReviewApi>) -> Self {
        Self {
            api,
            inner: RwLock::new(StoreSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().clone()
    }

    pub fn active_workspace_id(&self) -> Option<i64> {
        self.inner.read().active_workspace
    }

    pub fn active_meeting_id(&self) -> Option<i64> {
        self.inner.read().active_meeting
    }

    pub fn require_workspace(&self) -> Result<i64, StateError> {
        self.active_workspace_id()
            .ok_or(StateError::NoActiveWorkspace)
    }

    pub fn require_meeting(&self) -> Result<i64, StateError> {
        self.active_meeting_id().ok_or(StateError::NoActiveMeeting)
    }

    pub fn task(&self, task_id: i64) -> Option<Task> {
        self.inner.read().tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Seed the selection remembered from an earlier session. It is validated
    /// on the next `load_workspaces`.
    pub fn restore_selection(&self, workspace_id: Option<i64>, meeting_id: Option<i64>) {
        let mut inner = self.inner.write();
        inner.active_workspace = workspace_id;
        inner.active_meeting = meeting_id;
    }

    pub fn clear(&self) {
        *self.inner.write() = StoreSnapshot::default();
    }

    // =========================================================================
    // Workspaces
    // =========================================================================

    /// Fetch the caller's workspaces and load the active one. A missing or
    /// stale active workspace falls back to the first in the list.
    pub async fn load_workspaces(&self) -> Result<Vec<Workspace>, StateError> {
        let workspaces = self.api.list_workspaces().await?;

        let current = self.active_workspace_id();
        let target = current
            .filter(|id| workspaces.iter().any(|w| w.id == *id))
            .or_else(|| workspaces.first().map(|w| w.id));

        {
            let mut inner = self.inner.write();
            inner.workspaces = workspaces.clone();
            if target.is_none() {
                inner.active_workspace = None;
                inner.active_meeting = None;
                inner.meetings.clear();
                inner.members.clear();
                inner.tasks.clear();
            }
        }

        if let Some(id) = target {
            if current != Some(id) {
                log::info!("Store: active workspace falls back to {}", id);
            }
            self.select_workspace(id).await?;
        }
        Ok(workspaces)
    }

    /// Make `workspace_id` active and re-fetch its meetings, members and tasks.
    pub async fn select_workspace(&self, workspace_id: i64) -> Result<Workspace, StateError> {
        let workspace = self
            .inner
            .read()
            .workspaces
            .iter()
            .find(|w| w.id == workspace_id)
            .cloned()
            .ok_or(StateError::UnknownWorkspace(workspace_id))?;

        let (meetings, members, tasks) = tokio::try_join!(
            self.api.list_meetings(workspace_id),
            self.api.list_members(workspace_id),
            self.api.list_tasks(workspace_id, None),
        )?;

        let mut inner = self.inner.write();
        let keep_meeting = inner
            .active_meeting
            .filter(|id| meetings.iter().any(|m| m.id == *id));
        inner.active_workspace = Some(workspace_id);
        inner.active_meeting = keep_meeting;
        inner.meetings = meetings;
        inner.members = members;
        inner.tasks = tasks;
        log::debug!(
            "Store: workspace {} loaded ({} meetings, {} members, {} tasks)",
            workspace_id,
            inner.meetings.len(),
            inner.members.len(),
            inner.tasks.len()
        );
        Ok(workspace)
    }

    pub async fn create_workspace(&self, name: &str) -> Result<Workspace, StateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("Workspace name is required".to_string()).into());
        }
        let workspace = self.api.create_workspace(name).await?;
        log::info!("Store: created workspace {} ({})", workspace.id, workspace.name);
        self.inner.write().workspaces.push(workspace.clone());
        self.select_workspace(workspace.id).await
    }

    /// Set a member's display name in the active workspace. Blank clears it.
    pub async fn rename_member(
        &self,
        member_id: i64,
        display_name: &str,
    ) -> Result<WorkspaceMember, StateError> {
        let workspace_id = self.require_workspace()?;
        let display_name = Some(display_name.trim()).filter(|n| !n.is_empty());
        let member = self
            .api
            .update_member(workspace_id, member_id, display_name)
            .await?;

        let mut inner = self.inner.write();
        match inner.members.iter_mut().find(|m| m.id == member.id) {
            Some(slot) => *slot = member.clone(),
            None => inner.members.push(member.clone()),
        }
        Ok(member)
    }

    pub fn member_label(member: &WorkspaceMember) -> String {
        member.label().to_string()
    }

    // =========================================================================
    // Meetings
    // =========================================================================

    pub async fn create_meeting(
        &self,
        title: &str,
        meeting_date: Option<DateTime<Utc>>,
    ) -> Result<Meeting, StateError> {
        let workspace_id = self.require_workspace()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(ApiError::InvalidInput("Meeting title is required".to_string()).into());
        }
        let meeting = self
            .api
            .create_meeting(&CreateMeetingRequest {
                workspace_id,
                title: title.to_string(),
                meeting_date,
            })
            .await?;
        self.inner.write().meetings.insert(0, meeting.clone());
        Ok(meeting)
    }

    /// Look up a loaded meeting without changing the selection.
    pub fn find_meeting(&self, meeting_id: i64) -> Result<Meeting, StateError> {
        self.inner
            .read()
            .meetings
            .iter()
            .find(|m| m.id == meeting_id)
            .cloned()
            .ok_or(StateError::UnknownMeeting(meeting_id))
    }

    pub fn select_meeting(&self, meeting_id: i64) -> Result<Meeting, StateError> {
        let mut inner = self.inner.write();
        let meeting = inner
            .meetings
            .iter()
            .find(|m| m.id == meeting_id)
            .cloned()
            .ok_or(StateError::UnknownMeeting(meeting_id))?;
        inner.active_meeting = Some(meeting_id);
        Ok(meeting)
    }

    pub async fn upload_transcript(
        &self,
        meeting_id: i64,
        path: &Path,
    ) -> Result<TranscriptVersion, StateError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StateError::Io(format!("Not a file path: {}", path.display()))
            })?
            .to_string();
        let content = tokio::fs::read(path).await?;
        let version = self
            .api
            .upload_transcript(meeting_id, &file_name, content)
            .await?;
        log::info!(
            "Store: uploaded {} to meeting {} (version {})",
            file_name,
            meeting_id,
            version.id
        );
        Ok(version)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn refresh_tasks(&self, assignee: Option<&str>) -> Result<Vec<Task>, StateError> {
        let workspace_id = self.require_workspace()?;
        let tasks = self.api.list_tasks(workspace_id, assignee).await?;
        self.inner.write().tasks = tasks.clone();
        Ok(tasks)
    }

    pub async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task, StateError> {
        if req.title.trim().is_empty() {
            return Err(ApiError::InvalidInput("Task title is required".to_string()).into());
        }
        let task = self.api.create_task(req).await?;
        self.upsert_task(task.clone());
        Ok(task)
    }

    pub async fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<Task, StateError> {
        let task = self
            .api
            .patch_task(task_id, &TaskPatch::status(status))
            .await?;
        self.upsert_task(task.clone());
        Ok(task)
    }

    /// Replace a task in the list, or put a new one at the top.
    pub fn upsert_task(&self, task: Task) {
        let mut inner = self.inner.write();
        if inner.active_workspace != Some(task.workspace_id) {
            return;
        }
        match inner.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => inner.tasks.insert(0, task),
        }
    }
}
