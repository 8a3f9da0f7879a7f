//! HTTP client for the review backend.
//!
//! Uses reqwest with a shared cookie jar: the backend sets an
//! `access_token` cookie on signup/login and expects it on every call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use super::{validate_transcript, ReviewApi};
use crate::error::ApiError;
use crate::types::{
    CreateInviteRequest, CreateMeetingRequest, CreateTaskRequest, CreateWorkspaceRequest,
    Credentials, ExtractedItem, Extraction, Invite, ItemPatch, Meeting, MemberUpdateRequest,
    StartExtractionRequest, Task, TaskPatch, TranscriptVersion, User, Workspace, WorkspaceMember,
};

pub struct HttpClient {
    client: reqwest::Client,
    base: Url,
    jar: Arc<Jar>,
}

impl HttpClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, ApiError> {
        let base = normalize_base(base_url)?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base, jar })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Current session cookies as a `name=value; ...` header string.
    pub fn session_cookie(&self) -> Option<String> {
        self.jar
            .cookies(&self.base)
            .and_then(|value| value.to_str().ok().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    /// Seed the jar with a cookie header saved by a previous run.
    pub fn restore_session(&self, cookie_header: &str) {
        for cookie in cookie_header.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.jar.add_cookie_str(cookie, &self.base);
        }
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidInput(format!("Bad request path '{}': {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.url(path)?))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = ApiError::from_response(status.as_u16(), &body);
            log::debug!("API error {}: {}", status, err);
            return Err(err);
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::Decode(format!(
                "{}: {}",
                e,
                String::from_utf8_lossy(&bytes).chars().take(200).collect::<String>()
            ))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, path)?).await
    }

    async fn post<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    async fn patch<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::PATCH, path)?.json(body)).await
    }
}

#[async_trait]
impl ReviewApi for HttpClient {
    async fn signup(&self, credentials: &Credentials) -> Result<User, ApiError> {
        self.post("auth/signup", credentials).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        self.post("auth/login", credentials).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post("auth/logout", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn me(&self) -> Result<User, ApiError> {
        self.get("auth/me").await
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, ApiError> {
        self.get("workspaces").await
    }

    async fn create_workspace(&self, name: &str) -> Result<Workspace, ApiError> {
        self.post("workspaces", &CreateWorkspaceRequest { name }).await
    }

    async fn list_members(&self, workspace_id: i64) -> Result<Vec<WorkspaceMember>, ApiError> {
        self.get(&format!("workspaces/{}/members", workspace_id)).await
    }

    async fn update_member(
        &self,
        workspace_id: i64,
        member_id: i64,
        display_name: Option<&str>,
    ) -> Result<WorkspaceMember, ApiError> {
        self.patch(
            &format!("workspaces/{}/members/{}", workspace_id, member_id),
            &MemberUpdateRequest { display_name },
        )
        .await
    }

    async fn list_meetings(&self, workspace_id: i64) -> Result<Vec<Meeting>, ApiError> {
        let req = self
            .request(Method::GET, "meetings")?
            .query(&[("workspace_id", workspace_id)]);
        self.send(req).await
    }

    async fn create_meeting(&self, req: &CreateMeetingRequest) -> Result<Meeting, ApiError> {
        self.post("meetings", req).await
    }

    async fn upload_transcript(
        &self,
        meeting_id: i64,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<TranscriptVersion, ApiError> {
        validate_transcript(file_name, &content)?;

        let part = Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("text/plain")?;
        let form = Form::new().part("file", part);
        let req = self
            .request(Method::POST, &format!("meetings/{}/transcripts", meeting_id))?
            .multipart(form);
        self.send(req).await
    }

    async fn start_extraction(
        &self,
        meeting_id: i64,
        req: &StartExtractionRequest,
    ) -> Result<Extraction, ApiError> {
        self.post(&format!("meetings/{}/extract", meeting_id), req)
            .await
    }

    async fn list_extractions(&self, meeting_id: i64) -> Result<Vec<Extraction>, ApiError> {
        self.get(&format!("meetings/{}/extractions", meeting_id))
            .await
    }

    async fn list_items(&self, extraction_id: i64) -> Result<Vec<ExtractedItem>, ApiError> {
        self.get(&format!("extractions/{}/items", extraction_id))
            .await
    }

    async fn patch_item(&self, item_id: i64, patch: &ItemPatch) -> Result<ExtractedItem, ApiError> {
        self.patch(&format!("items/{}", item_id), patch).await
    }

    async fn list_tasks(
        &self,
        workspace_id: i64,
        assignee_display_name: Option<&str>,
    ) -> Result<Vec<Task>, ApiError> {
        let mut req = self
            .request(Method::GET, "tasks")?
            .query(&[("workspace_id", workspace_id)]);
        if let Some(name) = assignee_display_name.map(str::trim).filter(|n| !n.is_empty()) {
            req = req.query(&[("assignee_display_name", name)]);
        }
        self.send(req).await
    }

    async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task, ApiError> {
        self.post("tasks", req).await
    }

    async fn patch_task(&self, task_id: i64, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.patch(&format!("tasks/{}", task_id), patch).await
    }

    async fn pending_invites(&self) -> Result<Vec<Invite>, ApiError> {
        self.get("invites/pending").await
    }

    async fn create_invite(&self, req: &CreateInviteRequest) -> Result<Invite, ApiError> {
        self.post("invites", req).await
    }

    async fn accept_invite(&self, invite_id: i64) -> Result<Invite, ApiError> {
        self.post(&format!("invites/{}/accept", invite_id), &serde_json::json!({}))
            .await
    }

    async fn decline_invite(&self, invite_id: i64) -> Result<Invite, ApiError> {
        self.post(&format!("invites/{}/decline", invite_id), &serde_json::json!({}))
            .await
    }
}

/// Parse the configured base URL, making sure relative joins keep its path.
fn normalize_base(base_url: &str) -> Result<Url, ApiError> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid API URL '{}': {}", base_url, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::InvalidInput(format!(
            "Unsupported API URL scheme '{}'",
            other
        ))),
    }
}
