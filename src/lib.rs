//! recapdesk: client for a meeting-transcript review service.
//!
//! Upload a transcript, run an extraction, then approve, reject or edit the
//! summaries, decisions and action items it produced. Approved action items
//! become tasks; marking a task done can be undone once.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod invites;
pub mod review;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
pub mod undo;

pub use api::{HttpClient, ReviewApi};
pub use config::Config;
pub use error::{ApiError, ReviewError, StateError, UndoError};
pub use state::AppState;
