use crate::{Time, UserId};

#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

/// Identity handed out by the auth provider
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionUser {
    pub id: UserId,
    pub email: Option<String>,

    /// Display name from the provider's user metadata, if any
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Session {
    pub access_token: AuthToken,
    pub refresh_token: Option<String>,
    pub expires_at: Option<Time>,
    pub user: SessionUser,
}

impl Session {
    pub fn is_expired(&self, now: Time) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

/// The hosted auth provider
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, crate::Error>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, crate::Error>;
    async fn sign_out(&self) -> Result<(), crate::Error>;

    /// Stream of session changes, ending when the provider goes away
    fn events(&self) -> futures::stream::BoxStream<'static, AuthEvent>;
}

#[async_trait::async_trait]
impl<T: AuthProvider + ?Sized> AuthProvider for std::sync::Arc<T> {
    async fn current_session(&self) -> Result<Option<Session>, crate::Error> {
        (**self).current_session().await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, crate::Error> {
        (**self).sign_in(email, password).await
    }

    async fn sign_out(&self) -> Result<(), crate::Error> {
        (**self).sign_out().await
    }

    fn events(&self) -> futures::stream::BoxStream<'static, AuthEvent> {
        (**self).events()
    }
}
