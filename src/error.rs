//! Error types for talking to the review backend
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, 5xx responses
//! - RequiresUserAction: not logged in, forbidden
//! - NonRetryable: everything else (bad input, 4xx detail from the server)

use thiserror::Error;

/// Errors surfaced by the REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response. `message` is the server-provided detail or a generic
    /// status-coded message.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Rejected locally before any request was sent.
    #[error("{0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Build a status error from a response body.
    ///
    /// The backend replies `{"detail": "..."}` for handled errors and
    /// `{"detail": [{"msg": "..."}, ...]}` for validation failures.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = extract_detail(body).unwrap_or_else(|| format!("Request failed ({})", status));
        ApiError::Status { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 401: the session is missing or expired.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Returns true if the same request may succeed when retried
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Server-supplied human-readable message, if any.
    pub fn detail(&self) -> String {
        self.to_string()
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ApiError::Status { status: 401, .. } => "Run 'recapdesk login' to start a session.",
            ApiError::Status { status: 403, .. } => {
                "Ask a workspace owner for access to this workspace."
            }
            ApiError::Status { status, .. } if *status >= 500 => {
                "The server had a problem. Try again shortly."
            }
            ApiError::Status { .. } => "Check the request and try again.",
            ApiError::Network(_) => "Check that the API URL is reachable and try again.",
            ApiError::Decode(_) => "The server sent an unexpected response. Check the API version.",
            ApiError::InvalidInput(_) => "Fix the input and try again.",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

fn extract_detail(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    match json.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(entries) => {
            let msgs: Vec<&str> = entries
                .iter()
                .filter_map(|e| e.get("msg").and_then(|m| m.as_str()))
                .collect();
            if msgs.is_empty() {
                None
            } else {
                Some(msgs.join("; "))
            }
        }
        _ => None,
    }
}

/// Errors from the review workflow.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Item {0} is already being updated")]
    Busy(i64),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors from the undo buffer.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("Nothing to undo")]
    NothingToUndo,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors raised by application-level operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Not logged in")]
    LoginRequired,

    #[error("No workspace selected")]
    NoActiveWorkspace,

    #[error("No meeting selected")]
    NoActiveMeeting,

    #[error("Workspace not found: {0}")]
    UnknownWorkspace(i64),

    #[error("Meeting not found: {0}")]
    UnknownMeeting(i64),

    #[error("Extraction run not found: {0}")]
    UnknownRun(i64),

    #[error("Item not found: {0}")]
    UnknownItem(i64),

    #[error("Task not found: {0}")]
    UnknownTask(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Undo(#[from] UndoError),
}

impl From<ApiError> for StateError {
    fn from(err: ApiError) -> Self {
        if err.is_unauthorized() {
            StateError::LoginRequired
        } else {
            StateError::Api(err)
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Io(err.to_string())
    }
}

impl StateError {
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            StateError::LoginRequired
                | StateError::Review(ReviewError::Api(ApiError::Status { status: 401, .. }))
                | StateError::Undo(UndoError::Api(ApiError::Status { status: 401, .. }))
        )
    }
}
