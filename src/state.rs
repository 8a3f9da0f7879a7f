//! Application state: one explicit context object that wires the session
//! gate, store, extraction controller, review workflow and undo buffer.
//!
//! Between CLI invocations the session cookie, the active workspace/meeting,
//! the selected run and the undo record are kept in ~/.recapdesk/session.json.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{HttpClient, ReviewApi};
use crate::config::{self, Config};
use crate::error::StateError;
use crate::extraction::ExtractionController;
use crate::invites::Invites;
use crate::review::{ApprovalOutcome, ReviewContext, ReviewWorkflow};
use crate::session::SessionGate;
use crate::store::WorkspaceStore;
use crate::types::{ExtractedItem, ItemPatch, Meeting, Task, User, Workspace};
use crate::undo::{UndoBuffer, UndoRecord};

/// What survives between runs of the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(default)]
    pub active_workspace: Option<i64>,
    #[serde(default)]
    pub active_meeting: Option<i64>,
    #[serde(default)]
    pub selected_run: Option<i64>,
    #[serde(default)]
    pub undo: Option<UndoRecord>,
}

pub fn session_path() -> Result<PathBuf, StateError> {
    Ok(config::state_dir()?.join("session.json"))
}

/// Missing or unreadable session files start a fresh session.
pub fn load_session_from(path: &Path) -> PersistedSession {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return PersistedSession::default(),
    };
    match serde_json::from_str(&content) {
        Ok(session) => session,
        Err(e) => {
            log::warn!("Ignoring corrupt session file {}: {}", path.display(), e);
            PersistedSession::default()
        }
    }
}

pub fn save_session_to(path: &Path, session: &PersistedSession) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(session)
        .map_err(|e| StateError::Io(format!("Serialize error: {}", e)))?;
    fs::write(path, content)?;

    // Holds the session cookie.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

pub struct AppState {
    pub config: Config,
    api: Arc<dyn ReviewApi>,
    /// Present when talking to a real backend; holds the cookie jar.
    http: Option<Arc<HttpClient>>,
    session_file: Option<PathBuf>,
    pub session: SessionGate,
    pub store: WorkspaceStore,
    pub invites: Invites,
    pub extraction: ExtractionController,
    pub review: ReviewWorkflow,
    pub undo: UndoBuffer,
    restored_run: parking_lot::Mutex<Option<i64>>,
    signed_out: parking_lot::Mutex<bool>,
}

impl AppState {
    /// Build state against the configured backend and restore the saved session.
    pub fn open(config: Config) -> Result<Self, StateError> {
        let http = Arc::new(
            HttpClient::new(&config.api_base_url, config.connect_timeout())
                .map_err(|e| StateError::Config(e.to_string()))?,
        );
        let path = session_path()?;
        let saved = load_session_from(&path);
        if let Some(cookie) = saved.cookie.as_deref() {
            http.restore_session(cookie);
        }

        let api: Arc<dyn ReviewApi> = http.clone();
        let state = Self::assemble(config, api, Some(http), Some(path));
        state.restore(saved);
        Ok(state)
    }

    /// Build state over any backend, optionally persisting to `session_file`.
    pub fn with_api(
        config: Config,
        api: Arc<dyn ReviewApi>,
        session_file: Option<PathBuf>,
    ) -> Self {
        let saved = session_file
            .as_deref()
            .map(load_session_from)
            .unwrap_or_default();
        let state = Self::assemble(config, api, None, session_file);
        state.restore(saved);
        state
    }

    fn assemble(
        config: Config,
        api: Arc<dyn ReviewApi>,
        http: Option<Arc<HttpClient>>,
        session_file: Option<PathBuf>,
    ) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            session: SessionGate::new(api.clone()),
            store: WorkspaceStore::new(api.clone()),
            invites: Invites::new(api.clone()),
            extraction: ExtractionController::new(api.clone(), poll_interval),
            review: ReviewWorkflow::new(api.clone()),
            undo: UndoBuffer::new(),
            config,
            api,
            http,
            session_file,
            restored_run: parking_lot::Mutex::new(None),
            signed_out: parking_lot::Mutex::new(false),
        }
    }

    fn restore(&self, saved: PersistedSession) {
        self.store
            .restore_selection(saved.active_workspace, saved.active_meeting);
        if let Some(record) = saved.undo {
            self.undo.restore(record);
        }
        *self.restored_run.lock() = saved.selected_run;
    }

    pub fn api(&self) -> &Arc<dyn ReviewApi> {
        &self.api
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            cookie: self
                .http
                .as_ref()
                .filter(|_| !*self.signed_out.lock())
                .and_then(|h| h.session_cookie()),
            active_workspace: self.store.active_workspace_id(),
            active_meeting: self.store.active_meeting_id(),
            selected_run: self
                .extraction
                .snapshot()
                .selected
                .or(*self.restored_run.lock()),
            undo: self.undo.record(),
        }
    }

    /// Write the session file, if this state has one.
    pub fn persist(&self) -> Result<(), StateError> {
        match &self.session_file {
            Some(path) => save_session_to(path, &self.to_persisted()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Confirm the session and load workspaces. Every workspace-scoped
    /// command goes through here first.
    pub async fn ensure_ready(&self) -> Result<User, StateError> {
        let user = self.session.require_user().await?;
        self.store.load_workspaces().await?;
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, StateError> {
        // A 401 here is a bad password, not a missing session.
        let user = self
            .session
            .login(email, password)
            .await
            .map_err(StateError::Api)?;
        *self.signed_out.lock() = false;
        self.store.load_workspaces().await?;
        Ok(user)
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<User, StateError> {
        let user = self
            .session
            .signup(email, password)
            .await
            .map_err(StateError::Api)?;
        *self.signed_out.lock() = false;
        self.store.load_workspaces().await?;
        Ok(user)
    }

    /// Drop all session-scoped state, then tell the backend.
    pub async fn logout(&self) -> Result<(), StateError> {
        self.extraction.clear();
        self.store.clear();
        self.undo.clear();
        *self.restored_run.lock() = None;
        *self.signed_out.lock() = true;
        let result = self.session.logout().await;
        if let Err(e) = &result {
            log::warn!("Logout request failed, local session cleared anyway: {}", e);
        }
        result.map_err(StateError::from)
    }

    // =========================================================================
    // Workspaces and meetings
    // =========================================================================

    pub async fn select_workspace(&self, workspace_id: i64) -> Result<Workspace, StateError> {
        let before = self.store.active_meeting_id();
        let workspace = self.store.select_workspace(workspace_id).await?;
        if self.store.active_meeting_id() != before {
            self.extraction.clear();
            *self.restored_run.lock() = None;
        }
        Ok(workspace)
    }

    /// Make a meeting active and load its most recent run. The selection
    /// only moves once the runs are loaded.
    pub async fn select_meeting(&self, meeting_id: i64) -> Result<Meeting, StateError> {
        self.store.find_meeting(meeting_id)?;
        self.extraction.select_meeting(meeting_id).await?;
        let meeting = self.store.select_meeting(meeting_id)?;
        *self.restored_run.lock() = None;
        Ok(meeting)
    }

    /// Load the active meeting's runs, reselecting the run remembered from
    /// the last session when it still exists.
    pub async fn open_active_meeting(&self) -> Result<Meeting, StateError> {
        let meeting_id = self.store.require_meeting()?;
        let meeting = self
            .store
            .snapshot()
            .meeting()
            .cloned()
            .ok_or(StateError::UnknownMeeting(meeting_id))?;

        self.extraction.select_meeting(meeting_id).await?;
        let remembered = self.restored_run.lock().take();
        if let Some(run_id) = remembered {
            let current = self.extraction.snapshot();
            if current.selected != Some(run_id) && current.runs.iter().any(|r| r.id == run_id) {
                self.extraction.select_run(run_id).await?;
            }
        }
        Ok(meeting)
    }

    // =========================================================================
    // Review
    // =========================================================================

    pub fn review_context(&self) -> Result<ReviewContext, StateError> {
        Ok(ReviewContext {
            workspace_id: self.store.require_workspace()?,
        })
    }

    fn loaded_item(&self, item_id: i64) -> Result<ExtractedItem, StateError> {
        self.extraction
            .item(item_id)
            .ok_or(StateError::UnknownItem(item_id))
    }

    /// Approve an item; a task derived from it shows up in the task list.
    pub async fn approve(&self, item_id: i64) -> Result<ApprovalOutcome, StateError> {
        let ctx = self.review_context()?;
        let item = self.loaded_item(item_id)?;
        let outcome = self.review.approve(&ctx, &item).await?;
        self.extraction.replace_item(outcome.item.clone());
        if let Some(task) = &outcome.task {
            self.store.upsert_task(task.clone());
        }
        Ok(outcome)
    }

    pub async fn reject(
        &self,
        item_id: i64,
        reason: Option<&str>,
    ) -> Result<ExtractedItem, StateError> {
        let item = self.loaded_item(item_id)?;
        let updated = self.review.reject(&item, reason).await?;
        self.extraction.replace_item(updated.clone());
        Ok(updated)
    }

    pub async fn edit(
        &self,
        item_id: i64,
        patch: ItemPatch,
        reason: Option<&str>,
    ) -> Result<ExtractedItem, StateError> {
        self.loaded_item(item_id)?;
        let updated = self.review.edit(item_id, patch, reason).await?;
        self.extraction.replace_item(updated.clone());
        Ok(updated)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn mark_task_done(&self, task_id: i64) -> Result<Task, StateError> {
        let task = self
            .store
            .task(task_id)
            .ok_or(StateError::UnknownTask(task_id))?;
        let updated = self.undo.mark_done(self.api.as_ref(), &task).await?;
        self.store.upsert_task(updated.clone());
        Ok(updated)
    }

    pub async fn undo_task(&self) -> Result<Task, StateError> {
        let restored = self.undo.undo(self.api.as_ref()).await?;
        self.store.upsert_task(restored.clone());
        Ok(restored)
    }
}
