//! Review backend REST surface.
//!
//! `ReviewApi` is the seam every workflow talks through. `HttpClient` is the
//! real implementation (reqwest with a cookie jar for the session); tests use
//! an in-memory fake.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{
    CreateInviteRequest, CreateMeetingRequest, CreateTaskRequest, Credentials, ExtractedItem,
    Extraction, Invite, ItemPatch, Meeting, StartExtractionRequest, Task, TaskPatch,
    TranscriptVersion, User, Workspace, WorkspaceMember,
};

pub use client::HttpClient;

/// Typed CRUD calls against the review backend.
///
/// Every call carries the session credentials held by the implementation.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    // Session
    async fn signup(&self, credentials: &Credentials) -> Result<User, ApiError>;
    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    async fn me(&self) -> Result<User, ApiError>;

    // Workspaces
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, ApiError>;
    async fn create_workspace(&self, name: &str) -> Result<Workspace, ApiError>;
    async fn list_members(&self, workspace_id: i64) -> Result<Vec<WorkspaceMember>, ApiError>;
    async fn update_member(
        &self,
        workspace_id: i64,
        member_id: i64,
        display_name: Option<&str>,
    ) -> Result<WorkspaceMember, ApiError>;

    // Meetings
    async fn list_meetings(&self, workspace_id: i64) -> Result<Vec<Meeting>, ApiError>;
    async fn create_meeting(&self, req: &CreateMeetingRequest) -> Result<Meeting, ApiError>;
    async fn upload_transcript(
        &self,
        meeting_id: i64,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<TranscriptVersion, ApiError>;

    // Extractions
    async fn start_extraction(
        &self,
        meeting_id: i64,
        req: &StartExtractionRequest,
    ) -> Result<Extraction, ApiError>;
    /// Newest first.
    async fn list_extractions(&self, meeting_id: i64) -> Result<Vec<Extraction>, ApiError>;
    async fn list_items(&self, extraction_id: i64) -> Result<Vec<ExtractedItem>, ApiError>;
    async fn patch_item(&self, item_id: i64, patch: &ItemPatch) -> Result<ExtractedItem, ApiError>;

    // Tasks
    async fn list_tasks(
        &self,
        workspace_id: i64,
        assignee_display_name: Option<&str>,
    ) -> Result<Vec<Task>, ApiError>;
    async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task, ApiError>;
    async fn patch_task(&self, task_id: i64, patch: &TaskPatch) -> Result<Task, ApiError>;

    // Invites
    async fn pending_invites(&self) -> Result<Vec<Invite>, ApiError>;
    async fn create_invite(&self, req: &CreateInviteRequest) -> Result<Invite, ApiError>;
    async fn accept_invite(&self, invite_id: i64) -> Result<Invite, ApiError>;
    async fn decline_invite(&self, invite_id: i64) -> Result<Invite, ApiError>;
}

/// The backend only ingests non-empty `.txt` transcripts.
pub fn validate_transcript(file_name: &str, content: &[u8]) -> Result<(), ApiError> {
    if !file_name.to_ascii_lowercase().ends_with(".txt") {
        return Err(ApiError::InvalidInput(format!(
            "Please upload a .txt file (got '{}')",
            file_name
        )));
    }
    if String::from_utf8_lossy(content).trim().is_empty() {
        return Err(ApiError::InvalidInput("Transcript file is empty".to_string()));
    }
    Ok(())
}
