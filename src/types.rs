//! Wire types shared by the API client, the stores and the CLI.
//!
//! Decoding is lenient where the backend is loose: review status defaults to
//! pending, confidence outside 0..=1 is dropped, null lists become empty and
//! timestamps may come with or without an offset.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Owner => f.pad("owner"),
            MemberRole::Member => f.pad("member"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    pub role: MemberRole,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl WorkspaceMember {
    /// Display name when set and non-blank, else the email.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.email,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == MemberRole::Owner
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateWorkspaceRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MemberUpdateRequest<'a> {
    pub display_name: Option<&'a str>,
}

// =============================================================================
// Meetings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    pub workspace_id: i64,
    pub title: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub meeting_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateMeetingRequest {
    pub workspace_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptVersion {
    pub id: i64,
    pub meeting_id: i64,
    pub checksum: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Extractions
// =============================================================================

/// Lifecycle of one extraction run. `processing` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Processing,
    #[serde(alias = "ready")]
    Complete,
    Failed,
}

impl ExtractionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExtractionStatus::Processing)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Processing => f.pad("processing"),
            ExtractionStatus::Complete => f.pad("complete"),
            ExtractionStatus::Failed => f.pad("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub id: i64,
    pub meeting_id: i64,
    pub transcript_version_id: i64,
    pub status: ExtractionStatus,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartExtractionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_version_id: Option<i64>,
}

// =============================================================================
// Extracted items
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ItemKind {
    Summary,
    Decision,
    ActionItem,
    OpenQuestion,
    Estimate,
    Risk,
    Note,
}

impl From<String> for ItemKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "summary" | "summary_topic" => ItemKind::Summary,
            "decision" => ItemKind::Decision,
            "action_item" => ItemKind::ActionItem,
            "open_question" => ItemKind::OpenQuestion,
            "estimate" => ItemKind::Estimate,
            "risk" => ItemKind::Risk,
            _ => ItemKind::Note,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemKind::Summary => "summary",
            ItemKind::Decision => "decision",
            ItemKind::ActionItem => "action_item",
            ItemKind::OpenQuestion => "open_question",
            ItemKind::Estimate => "estimate",
            ItemKind::Risk => "risk",
            ItemKind::Note => "note",
        };
        f.pad(s)
    }
}

/// Human review classification, independent of model confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    /// Absent, null and unknown values all normalise to pending.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("approved") => ReviewStatus::Approved,
            Some("rejected") => ReviewStatus::Rejected,
            Some("pending") | None | Some("") => ReviewStatus::Pending,
            Some(other) => {
                log::debug!("Unknown review status '{}', treating as pending", other);
                ReviewStatus::Pending
            }
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Pending => f.pad("pending"),
            ReviewStatus::Approved => f.pad("approved"),
            ReviewStatus::Rejected => f.pad("rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub id: i64,
    pub extraction_id: i64,
    #[serde(rename = "item_type")]
    pub kind: ItemKind,
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, deserialize_with = "lenient_review_status")]
    pub status: ReviewStatus,
    #[serde(default, deserialize_with = "unit_interval")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub field_confidence: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, alias = "evidence_snippets", deserialize_with = "null_as_empty")]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub timestamp_start: Option<String>,
    #[serde(default)]
    pub timestamp_end: Option<String>,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub review_reasons: Vec<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExtractedItem {
    /// "12:01–12:04", "12:01", or None when the item carries no span.
    pub fn time_span(&self) -> Option<String> {
        match (self.timestamp_start.as_deref(), self.timestamp_end.as_deref()) {
            (Some(start), Some(end)) => Some(format!("{}–{}", start, end)),
            (Some(t), None) | (None, Some(t)) => Some(t.to_string()),
            (None, None) => None,
        }
    }
}

/// Partial update for `PATCH /items/{id}`. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReviewStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_review: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reasons: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_reason: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        let ItemPatch {
            title,
            details,
            speaker,
            timestamp_start,
            timestamp_end,
            status,
            needs_review,
            review_reasons,
            edit_reason: _,
        } = self;
        title.is_none()
            && details.is_none()
            && speaker.is_none()
            && timestamp_start.is_none()
            && timestamp_end.is_none()
            && status.is_none()
            && needs_review.is_none()
            && review_reasons.is_none()
    }
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => f.pad("todo"),
            TaskStatus::InProgress => f.pad("in_progress"),
            TaskStatus::Done => f.pad("done"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "doing" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!(
                "unknown task status '{}' (expected todo, in_progress or done)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTaskRequest {
    pub workspace_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_user_id: Option<i64>,
}

impl CreateTaskRequest {
    pub fn new(workspace_id: i64, title: impl Into<String>) -> Self {
        Self {
            workspace_id,
            title: title.into(),
            details: None,
            due_at: None,
            assignee_display_name: None,
            assignee_user_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

// =============================================================================
// Invites
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InviteStatus::Pending => f.pad("pending"),
            InviteStatus::Accepted => f.pad("accepted"),
            InviteStatus::Declined => f.pad("declined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub id: i64,
    pub workspace_id: i64,
    pub workspace_name: String,
    pub email: String,
    pub status: InviteStatus,
    #[serde(default)]
    pub invited_by_email: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInviteRequest {
    pub workspace_id: i64,
    pub email: String,
}

// =============================================================================
// Lenient decoders
// =============================================================================

fn lenient_review_status<'de, D>(deserializer: D) -> Result<ReviewStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(ReviewStatus::normalize(raw.as_deref()))
}

fn unit_interval<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|c| c.is_finite() && (0.0..=1.0).contains(c)))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    /// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
            _ => Ok(None),
        }
    }
}
