//! Workspace invitations addressed to or sent by the caller.

use std::sync::Arc;

use crate::api::ReviewApi;
use crate::error::ApiError;
use crate::types::{CreateInviteRequest, Invite};

pub struct Invites {
    api: Arc<dyn ReviewApi>,
}

impl Invites {
    pub fn new(api: Arc<dyn ReviewApi>) -> Self {
        Self { api }
    }

    pub async fn pending(&self) -> Result<Vec<Invite>, ApiError> {
        self.api.pending_invites().await
    }

    /// Invite `email` to a workspace. Only owners may invite; the backend
    /// enforces that.
    pub async fn send(&self, workspace_id: i64, email: &str) -> Result<Invite, ApiError> {
        let email = normalize_email(email)?;
        let invite = self
            .api
            .create_invite(&CreateInviteRequest {
                workspace_id,
                email,
            })
            .await?;
        log::info!(
            "Invites: invited {} to workspace {}",
            invite.email,
            invite.workspace_id
        );
        Ok(invite)
    }

    /// Callers should reload workspaces afterwards to pick up the new one.
    pub async fn accept(&self, invite_id: i64) -> Result<Invite, ApiError> {
        let invite = self.api.accept_invite(invite_id).await?;
        log::info!("Invites: joined workspace {}", invite.workspace_name);
        Ok(invite)
    }

    pub async fn decline(&self, invite_id: i64) -> Result<Invite, ApiError> {
        self.api.decline_invite(invite_id).await
    }
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput(format!(
            "'{}' is not a valid email address",
            raw.trim()
        )));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::types::InviteStatus;

    #[tokio::test]
    async fn test_send_normalizes_email() {
        let fake = Arc::new(FakeApi::logged_in());
        let ws = fake.seed_workspace("Alpha");
        let invites = Invites::new(fake.clone());

        let invite = invites.send(ws.id, "  Dana@Example.COM ").await.unwrap();
        assert_eq!(invite.email, "dana@example.com");
        assert_eq!(invite.workspace_name, "Alpha");

        let err = invites.send(ws.id, "dana@example.com").await.unwrap_err();
        assert_eq!(err.status(), Some(400));

        assert!(matches!(
            invites.send(ws.id, "   ").await,
            Err(ApiError::InvalidInput(_))
        ));
        assert_eq!(fake.calls("create_invite"), 2);
    }

    #[tokio::test]
    async fn test_forbidden_send_surfaces_status() {
        let fake = Arc::new(FakeApi::logged_in());
        let ws = fake.seed_workspace("Alpha");
        fake.fail("create_invite", 403);
        let invites = Invites::new(fake);
        let err = invites.send(ws.id, "x@example.com").await.unwrap_err();
        assert!(err.requires_user_action());
    }

    #[tokio::test]
    async fn test_accept_and_decline() {
        let fake = Arc::new(FakeApi::logged_in());
        let team = fake.seed_workspace("Team");
        let other = fake.seed_workspace("Other");
        let a = fake.seed_invite(team.id, "owner@example.com");
        let b = fake.seed_invite(other.id, "owner@example.com");
        fake.seed_invite(other.id, "someone-else@example.com");
        let invites = Invites::new(fake.clone());

        let pending = invites.pending().await.unwrap();
        assert_eq!(pending.len(), 2);

        let accepted = invites.accept(a.id).await.unwrap();
        assert_eq!(accepted.status, InviteStatus::Accepted);
        let declined = invites.decline(b.id).await.unwrap();
        assert_eq!(declined.status, InviteStatus::Declined);

        assert!(invites.pending().await.unwrap().is_empty());
        let members = fake.state().members.iter().filter(|(ws, _)| *ws == team.id).count();
        assert_eq!(members, 2);
    }
}
