//! Session gate: who is logged in, and whether workspace operations may run.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::ReviewApi;
use crate::error::{ApiError, StateError};
use crate::types::{Credentials, User};

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Granted(User),
    /// No valid session; the caller should log in before continuing.
    LoginRequired,
}

pub struct SessionGate {
    api: Arc<dyn ReviewApi>,
    user: RwLock<Option<User>>,
}

impl SessionGate {
    pub fn new(api: Arc<dyn ReviewApi>) -> Self {
        Self {
            api,
            user: RwLock::new(None),
        }
    }

    /// Last user confirmed by the backend in this process.
    pub fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    /// Ask the backend who we are. A 401 means login is required; other
    /// failures propagate.
    pub async fn check(&self) -> Result<Access, ApiError> {
        match self.api.me().await {
            Ok(user) => {
                *self.user.write() = Some(user.clone());
                Ok(Access::Granted(user))
            }
            Err(e) if e.is_unauthorized() => {
                log::debug!("Session: not authenticated");
                *self.user.write() = None;
                Ok(Access::LoginRequired)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn require_user(&self) -> Result<User, StateError> {
        if let Some(user) = self.current_user() {
            return Ok(user);
        }
        match self.check().await? {
            Access::Granted(user) => Ok(user),
            Access::LoginRequired => Err(StateError::LoginRequired),
        }
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let credentials = credentials(email, password)?;
        let user = self.api.signup(&credentials).await?;
        log::info!("Session: signed up as {}", user.email);
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let credentials = credentials(email, password)?;
        let user = self.api.login(&credentials).await?;
        log::info!("Session: logged in as {}", user.email);
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    /// The local session is dropped even if the backend call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        *self.user.write() = None;
        self.api.logout().await
    }
}

fn credentials(email: &str, password: &str) -> Result<Credentials, ApiError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput("Enter a valid email address".to_string()));
    }
    if password.is_empty() {
        return Err(ApiError::InvalidInput("Password is required".to_string()));
    }
    Ok(Credentials {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;

    #[tokio::test]
    async fn test_check_without_session() {
        let fake = Arc::new(FakeApi::new());
        let gate = SessionGate::new(fake);
        assert_eq!(gate.check().await.unwrap(), Access::LoginRequired);
        assert!(matches!(
            gate.require_user().await,
            Err(StateError::LoginRequired)
        ));
    }

    #[tokio::test]
    async fn test_check_with_session() {
        let fake = Arc::new(FakeApi::logged_in());
        let gate = SessionGate::new(fake.clone());
        match gate.check().await.unwrap() {
            Access::Granted(user) => assert_eq!(user.email, "owner@example.com"),
            other => panic!("unexpected {:?}", other),
        }

        gate.require_user().await.unwrap();
        assert_eq!(fake.calls("me"), 1);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let fake = Arc::new(FakeApi::logged_in());
        fake.fail("me", 502);
        let gate = SessionGate::new(fake);
        let err = gate.check().await.unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn test_signup_login_logout() {
        let fake = Arc::new(FakeApi::new());
        let gate = SessionGate::new(fake.clone());

        let user = gate.signup(" new@example.com ", "pw123456").await.unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(gate.current_user(), Some(user.clone()));

        gate.logout().await.unwrap();
        assert!(gate.current_user().is_none());
        assert_eq!(gate.check().await.unwrap(), Access::LoginRequired);

        let err = gate.login("new@example.com", "wrong").await.unwrap_err();
        assert!(err.is_unauthorized());
        let again = gate.login("new@example.com", "pw123456").await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_signup_reports_detail() {
        let fake = Arc::new(FakeApi::logged_in());
        let gate = SessionGate::new(fake);
        let err = gate.signup("owner@example.com", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "Email already in use");
    }

    #[tokio::test]
    async fn test_credentials_checked_locally() {
        let fake = Arc::new(FakeApi::new());
        let gate = SessionGate::new(fake.clone());
        assert!(matches!(
            gate.login("not-an-email", "pw").await,
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(
            gate.login("a@example.com", "").await,
            Err(ApiError::InvalidInput(_))
        ));
        assert_eq!(fake.calls("login"), 0);
    }
}
