//! In-memory backend used by unit tests.
//!
//! Mirrors the backend's observable behaviour closely enough for the
//! workflows: session checks, newest-first run lists, partial item patches.
//! Any operation can be made to fail or to stall for a while.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use super::{validate_transcript, ReviewApi};
use crate::error::ApiError;
use crate::types::{
    CreateInviteRequest, CreateMeetingRequest, CreateTaskRequest, Credentials, ExtractedItem,
    Extraction, ExtractionStatus, Invite, InviteStatus, ItemKind, ItemPatch, Meeting, MemberRole,
    ReviewStatus, StartExtractionRequest, Task, TaskPatch, TaskStatus, TranscriptVersion, User,
    Workspace, WorkspaceMember,
};

#[derive(Default)]
pub(crate) struct FakeState {
    next_id: i64,
    pub user: Option<User>,
    pub accounts: Vec<(Credentials, User)>,
    pub workspaces: Vec<Workspace>,
    pub members: Vec<(i64, WorkspaceMember)>,
    pub meetings: Vec<Meeting>,
    pub transcripts: Vec<TranscriptVersion>,
    pub extractions: Vec<Extraction>,
    pub items: Vec<ExtractedItem>,
    pub tasks: Vec<Task>,
    pub invites: Vec<Invite>,
    pub item_patches: Vec<(i64, ItemPatch)>,
    failures: HashMap<&'static str, u16>,
    delays: HashMap<&'static str, Duration>,
    calls: HashMap<&'static str, usize>,
    in_flight: HashMap<&'static str, usize>,
    max_in_flight: HashMap<&'static str, usize>,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn stamp(id: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + id * 60, 0).unwrap_or_default()
}

pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    /// A backend with one registered account that is already logged in.
    pub fn logged_in() -> Self {
        let fake = Self::new();
        {
            let mut st = fake.state();
            let id = st.next_id();
            let user = User {
                id,
                email: "owner@example.com".into(),
            };
            st.accounts.push((
                Credentials {
                    email: user.email.clone(),
                    password: "hunter22".into(),
                },
                user.clone(),
            ));
            st.user = Some(user);
        }
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    pub fn fail(&self, op: &'static str, status: u16) {
        self.state().failures.insert(op, status);
    }

    pub fn recover(&self, op: &'static str) {
        self.state().failures.remove(op);
    }

    pub fn delay(&self, op: &'static str, by: Duration) {
        self.state().delays.insert(op, by);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Highest number of concurrent calls observed for `op`.
    pub fn max_in_flight(&self, op: &'static str) -> usize {
        self.state().max_in_flight.get(op).copied().unwrap_or(0)
    }

    pub fn seed_workspace(&self, name: &str) -> Workspace {
        let mut st = self.state();
        let id = st.next_id();
        let ws = Workspace {
            id,
            name: name.into(),
        };
        st.workspaces.push(ws.clone());
        if let Some(user) = st.user.clone() {
            let member_id = st.next_id();
            st.members.push((
                id,
                WorkspaceMember {
                    id: member_id,
                    user_id: user.id,
                    email: user.email,
                    role: MemberRole::Owner,
                    display_name: None,
                },
            ));
        }
        ws
    }

    pub fn seed_meeting(&self, workspace_id: i64, title: &str) -> Meeting {
        let mut st = self.state();
        let id = st.next_id();
        let meeting = Meeting {
            id,
            workspace_id,
            title: title.into(),
            meeting_date: None,
            created_at: stamp(id),
        };
        st.meetings.push(meeting.clone());
        meeting
    }

    pub fn seed_extraction(&self, meeting_id: i64, status: ExtractionStatus) -> Extraction {
        let mut st = self.state();
        let id = st.next_id();
        let ex = Extraction {
            id,
            meeting_id,
            transcript_version_id: 0,
            status,
            model: Some("fake-model".into()),
            error: None,
            created_at: stamp(id),
        };
        st.extractions.push(ex.clone());
        ex
    }

    pub fn seed_item(&self, extraction_id: i64, kind: ItemKind, title: &str) -> ExtractedItem {
        let mut st = self.state();
        let id = st.next_id();
        let item = ExtractedItem {
            id,
            extraction_id,
            kind,
            title: title.into(),
            details: Some(format!("details for {}", title)),
            status: ReviewStatus::Pending,
            confidence: Some(0.7),
            field_confidence: None,
            evidence: vec![],
            speaker: None,
            timestamp_start: None,
            timestamp_end: None,
            needs_review: true,
            review_reasons: vec!["low_confidence".into()],
            created_at: Some(stamp(id)),
        };
        st.items.push(item.clone());
        item
    }

    pub fn seed_task(&self, workspace_id: i64, title: &str, status: TaskStatus) -> Task {
        let mut st = self.state();
        let id = st.next_id();
        let user_id = st.user.as_ref().map(|u| u.id).unwrap_or(0);
        let task = Task {
            id,
            workspace_id,
            user_id,
            title: title.into(),
            details: None,
            due_at: None,
            status,
            created_at: stamp(id),
        };
        st.tasks.push(task.clone());
        task
    }

    pub fn seed_invite(&self, workspace_id: i64, email: &str) -> Invite {
        let mut st = self.state();
        let id = st.next_id();
        let workspace_name = st
            .workspaces
            .iter()
            .find(|w| w.id == workspace_id)
            .map(|w| w.name.clone())
            .unwrap_or_default();
        let invite = Invite {
            id,
            workspace_id,
            workspace_name,
            email: email.into(),
            status: InviteStatus::Pending,
            invited_by_email: Some("someone@example.com".into()),
            created_at: stamp(id),
        };
        st.invites.push(invite.clone());
        invite
    }

    pub fn set_extraction_status(&self, extraction_id: i64, status: ExtractionStatus) {
        let mut st = self.state();
        if let Some(ex) = st.extractions.iter_mut().find(|e| e.id == extraction_id) {
            ex.status = status;
        }
    }

    pub fn remove_extraction(&self, extraction_id: i64) {
        self.state().extractions.retain(|e| e.id != extraction_id);
    }

    pub fn task(&self, task_id: i64) -> Option<Task> {
        self.state().tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Record the call, apply any configured delay, then fail if asked to.
    async fn enter(&self, op: &'static str, needs_session: bool) -> Result<(), ApiError> {
        let (delay, failure, logged_in) = {
            let mut st = self.state();
            *st.calls.entry(op).or_insert(0) += 1;
            let now = {
                let n = st.in_flight.entry(op).or_insert(0);
                *n += 1;
                *n
            };
            let max = st.max_in_flight.entry(op).or_insert(0);
            *max = (*max).max(now);
            (
                st.delays.get(op).copied(),
                st.failures.get(op).copied(),
                st.user.is_some(),
            )
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(n) = self.state().in_flight.get_mut(op) {
            *n = n.saturating_sub(1);
        }
        if let Some(status) = failure {
            return Err(ApiError::Status {
                status,
                message: format!("{} failed", op),
            });
        }
        if needs_session && !logged_in {
            return Err(ApiError::Status {
                status: 401,
                message: "Not authenticated".into(),
            });
        }
        Ok(())
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{} not found", what),
    }
}

fn apply_item_patch(item: &mut ExtractedItem, patch: &ItemPatch) {
    if let Some(v) = &patch.title {
        item.title = v.clone();
    }
    if let Some(v) = &patch.details {
        item.details = Some(v.clone());
    }
    if let Some(v) = &patch.speaker {
        item.speaker = Some(v.clone());
    }
    if let Some(v) = &patch.timestamp_start {
        item.timestamp_start = Some(v.clone());
    }
    if let Some(v) = &patch.timestamp_end {
        item.timestamp_end = Some(v.clone());
    }
    if let Some(v) = patch.status {
        item.status = v;
    }
    if let Some(v) = patch.needs_review {
        item.needs_review = v;
    }
    if let Some(v) = &patch.review_reasons {
        item.review_reasons = v.clone();
    }
}

#[async_trait]
impl ReviewApi for FakeApi {
    async fn signup(&self, credentials: &Credentials) -> Result<User, ApiError> {
        self.enter("signup", false).await?;
        let mut st = self.state();
        if st.accounts.iter().any(|(c, _)| c.email == credentials.email) {
            return Err(ApiError::Status {
                status: 400,
                message: "Email already in use".into(),
            });
        }
        let id = st.next_id();
        let user = User {
            id,
            email: credentials.email.clone(),
        };
        st.accounts.push((credentials.clone(), user.clone()));
        st.user = Some(user.clone());
        Ok(user)
    }

    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        self.enter("login", false).await?;
        let mut st = self.state();
        let user = st
            .accounts
            .iter()
            .find(|(c, _)| c == credentials)
            .map(|(_, u)| u.clone())
            .ok_or(ApiError::Status {
                status: 401,
                message: "Invalid email or password".into(),
            })?;
        st.user = Some(user.clone());
        Ok(user)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.enter("logout", false).await?;
        self.state().user = None;
        Ok(())
    }

    async fn me(&self) -> Result<User, ApiError> {
        self.enter("me", true).await?;
        self.state().user.clone().ok_or_else(|| not_found("User"))
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, ApiError> {
        self.enter("list_workspaces", true).await?;
        Ok(self.state().workspaces.clone())
    }

    async fn create_workspace(&self, name: &str) -> Result<Workspace, ApiError> {
        self.enter("create_workspace", true).await?;
        Ok(self.seed_workspace(name))
    }

    async fn list_members(&self, workspace_id: i64) -> Result<Vec<WorkspaceMember>, ApiError> {
        self.enter("list_members", true).await?;
        Ok(self
            .state()
            .members
            .iter()
            .filter(|(ws, _)| *ws == workspace_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn update_member(
        &self,
        workspace_id: i64,
        member_id: i64,
        display_name: Option<&str>,
    ) -> Result<WorkspaceMember, ApiError> {
        self.enter("update_member", true).await?;
        let mut st = self.state();
        let (_, member) = st
            .members
            .iter_mut()
            .find(|(ws, m)| *ws == workspace_id && m.id == member_id)
            .ok_or_else(|| not_found("Member"))?;
        member.display_name = display_name.map(str::to_string);
        Ok(member.clone())
    }

    async fn list_meetings(&self, workspace_id: i64) -> Result<Vec<Meeting>, ApiError> {
        self.enter("list_meetings", true).await?;
        let mut meetings: Vec<Meeting> = self
            .state()
            .meetings
            .iter()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect();
        meetings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(meetings)
    }

    async fn create_meeting(&self, req: &CreateMeetingRequest) -> Result<Meeting, ApiError> {
        self.enter("create_meeting", true).await?;
        let mut meeting = self.seed_meeting(req.workspace_id, &req.title);
        meeting.meeting_date = req.meeting_date;
        let mut st = self.state();
        if let Some(m) = st.meetings.iter_mut().find(|m| m.id == meeting.id) {
            m.meeting_date = req.meeting_date;
        }
        Ok(meeting)
    }

    async fn upload_transcript(
        &self,
        meeting_id: i64,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<TranscriptVersion, ApiError> {
        self.enter("upload_transcript", true).await?;
        validate_transcript(file_name, &content)?;
        let mut st = self.state();
        if !st.meetings.iter().any(|m| m.id == meeting_id) {
            return Err(not_found("Meeting"));
        }
        let id = st.next_id();
        let tv = TranscriptVersion {
            id,
            meeting_id,
            checksum: format!("{:016x}", content.len()),
            created_at: stamp(id),
        };
        st.transcripts.push(tv.clone());
        Ok(tv)
    }

    async fn start_extraction(
        &self,
        meeting_id: i64,
        req: &StartExtractionRequest,
    ) -> Result<Extraction, ApiError> {
        self.enter("start_extraction", true).await?;
        let mut st = self.state();
        let tv_id = match req.transcript_version_id {
            Some(id) => id,
            None => st
                .transcripts
                .iter()
                .filter(|t| t.meeting_id == meeting_id)
                .map(|t| t.id)
                .max()
                .ok_or(ApiError::Status {
                    status: 400,
                    message: "No transcript uploaded for this meeting".into(),
                })?,
        };
        let id = st.next_id();
        let ex = Extraction {
            id,
            meeting_id,
            transcript_version_id: tv_id,
            status: ExtractionStatus::Processing,
            model: req.model.clone(),
            error: None,
            created_at: stamp(id),
        };
        st.extractions.push(ex.clone());
        Ok(ex)
    }

    async fn list_extractions(&self, meeting_id: i64) -> Result<Vec<Extraction>, ApiError> {
        self.enter("list_extractions", true).await?;
        let mut runs: Vec<Extraction> = self
            .state()
            .extractions
            .iter()
            .filter(|e| e.meeting_id == meeting_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn list_items(&self, extraction_id: i64) -> Result<Vec<ExtractedItem>, ApiError> {
        self.enter("list_items", true).await?;
        let st = self.state();
        if !st.extractions.iter().any(|e| e.id == extraction_id) {
            return Err(not_found("Extraction"));
        }
        Ok(st
            .items
            .iter()
            .filter(|i| i.extraction_id == extraction_id)
            .cloned()
            .collect())
    }

    async fn patch_item(&self, item_id: i64, patch: &ItemPatch) -> Result<ExtractedItem, ApiError> {
        self.enter("patch_item", true).await?;
        let mut st = self.state();
        st.item_patches.push((item_id, patch.clone()));
        let item = st
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| not_found("Item"))?;
        apply_item_patch(item, patch);
        Ok(item.clone())
    }

    async fn list_tasks(
        &self,
        workspace_id: i64,
        _assignee_display_name: Option<&str>,
    ) -> Result<Vec<Task>, ApiError> {
        self.enter("list_tasks", true).await?;
        let mut tasks: Vec<Task> = self
            .state()
            .tasks
            .iter()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task, ApiError> {
        self.enter("create_task", true).await?;
        let mut task = self.seed_task(req.workspace_id, &req.title, TaskStatus::Todo);
        task.details = req.details.clone();
        task.due_at = req.due_at;
        let mut st = self.state();
        if let Some(t) = st.tasks.iter_mut().find(|t| t.id == task.id) {
            *t = task.clone();
        }
        Ok(task)
    }

    async fn patch_task(&self, task_id: i64, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.enter("patch_task", true).await?;
        let mut st = self.state();
        let task = st
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| not_found("Task"))?;
        if let Some(v) = &patch.title {
            task.title = v.clone();
        }
        if let Some(v) = &patch.details {
            task.details = Some(v.clone());
        }
        if let Some(v) = patch.due_at {
            task.due_at = Some(v);
        }
        if let Some(v) = patch.status {
            task.status = v;
        }
        Ok(task.clone())
    }

    async fn pending_invites(&self) -> Result<Vec<Invite>, ApiError> {
        self.enter("pending_invites", true).await?;
        let st = self.state();
        let email = st.user.as_ref().map(|u| u.email.clone()).unwrap_or_default();
        Ok(st
            .invites
            .iter()
            .filter(|i| i.email == email && i.status == InviteStatus::Pending)
            .cloned()
            .collect())
    }

    async fn create_invite(&self, req: &CreateInviteRequest) -> Result<Invite, ApiError> {
        self.enter("create_invite", true).await?;
        let dup = self.state().invites.iter().any(|i| {
            i.workspace_id == req.workspace_id
                && i.email == req.email
                && i.status == InviteStatus::Pending
        });
        if dup {
            return Err(ApiError::Status {
                status: 400,
                message: "An invite for that email is already pending".into(),
            });
        }
        Ok(self.seed_invite(req.workspace_id, &req.email))
    }

    async fn accept_invite(&self, invite_id: i64) -> Result<Invite, ApiError> {
        self.enter("accept_invite", true).await?;
        let mut st = self.state();
        let user = st.user.clone().ok_or_else(|| not_found("User"))?;
        let invite = st
            .invites
            .iter_mut()
            .find(|i| i.id == invite_id)
            .ok_or_else(|| not_found("Invite"))?;
        invite.status = InviteStatus::Accepted;
        let accepted = invite.clone();

        let ws = st
            .workspaces
            .iter()
            .find(|w| w.id == accepted.workspace_id)
            .cloned();
        if ws.is_some() {
            let member_id = st.next_id();
            st.members.push((
                accepted.workspace_id,
                WorkspaceMember {
                    id: member_id,
                    user_id: user.id,
                    email: user.email,
                    role: MemberRole::Member,
                    display_name: None,
                },
            ));
        }
        Ok(accepted)
    }

    async fn decline_invite(&self, invite_id: i64) -> Result<Invite, ApiError> {
        self.enter("decline_invite", true).await?;
        let mut st = self.state();
        let invite = st
            .invites
            .iter_mut()
            .find(|i| i.id == invite_id)
            .ok_or_else(|| not_found("Invite"))?;
        invite.status = InviteStatus::Declined;
        Ok(invite.clone())
    }
}
