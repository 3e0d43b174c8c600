use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use sage_api::{AuthEvent, AuthProvider, AuthToken, Error, Session, SessionUser, UserId, Uuid};

/// In-memory auth provider: email/password accounts and a single current session
pub struct MockAuth(Mutex<AuthState>);

#[derive(Debug, Default)]
struct AuthState {
    users: Vec<MockUser>,
    current: Option<Session>,
    feeds: Vec<mpsc::UnboundedSender<AuthEvent>>,
}

#[derive(Debug)]
struct MockUser {
    user: SessionUser,
    password: String,
}

impl AuthState {
    fn relay(&mut self, e: AuthEvent) {
        self.feeds.retain(|f| f.unbounded_send(e.clone()).is_ok());
    }
}

fn new_session(user: SessionUser) -> Session {
    Session {
        access_token: AuthToken(Uuid::new_v4().to_string()),
        refresh_token: Some(Uuid::new_v4().to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        user,
    }
}

impl MockAuth {
    pub fn new() -> MockAuth {
        MockAuth(Mutex::new(AuthState::default()))
    }

    pub fn test_add_user(&self, email: &str, password: &str, display_name: Option<&str>) -> UserId {
        let id = UserId(Uuid::new_v4().to_string());
        self.0.lock().users.push(MockUser {
            user: SessionUser {
                id: id.clone(),
                email: Some(String::from(email)),
                display_name: display_name.map(String::from),
                avatar_url: None,
            },
            password: String::from(password),
        });
        id
    }

    /// Rotate the current session's token, as the provider does before expiry
    pub fn test_refresh_token(&self) -> Result<Session, Error> {
        let mut state = self.0.lock();
        let user = state
            .current
            .as_ref()
            .ok_or(Error::NotAuthenticated)?
            .user
            .clone();
        let session = new_session(user);
        state.current = Some(session.clone());
        state.relay(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    pub fn test_update_display_name(&self, name: &str) -> Result<Session, Error> {
        let mut state = self.0.lock();
        let session = state.current.as_mut().ok_or(Error::NotAuthenticated)?;
        session.user.display_name = Some(String::from(name));
        let session = session.clone();
        state.relay(AuthEvent::UserUpdated(session.clone()));
        Ok(session)
    }

    /// Ends every event stream handed out so far
    pub fn test_close_feeds(&self) {
        self.0.lock().feeds.clear();
    }
}

impl Default for MockAuth {
    fn default() -> MockAuth {
        MockAuth::new()
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn current_session(&self) -> Result<Option<Session>, Error> {
        Ok(self.0.lock().current.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        let mut state = self.0.lock();
        let user = state
            .users
            .iter()
            .find(|u| u.user.email.as_deref() == Some(email) && u.password == password)
            .ok_or(Error::PermissionDenied)?
            .user
            .clone();
        let session = new_session(user);
        state.current = Some(session.clone());
        state.relay(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        let mut state = self.0.lock();
        if state.current.take().is_some() {
            state.relay(AuthEvent::SignedOut);
        }
        Ok(())
    }

    fn events(&self) -> BoxStream<'static, AuthEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.0.lock().feeds.push(sender);
        receiver.boxed()
    }
}
