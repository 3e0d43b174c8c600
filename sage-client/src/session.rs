use futures::{channel::oneshot, select, stream::BoxStream, StreamExt};
use tokio::sync::watch;

use crate::{
    api::{AuthEvent, AuthProvider, Error, RemoteStore, Session, UserProfile},
    Gateway,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CurrentUser {
    pub session: Session,
    pub profile: UserProfile,
}

/// Tracks who is signed in, following the auth provider's events.
///
/// There is one per application, handed to whoever needs the viewer.
pub struct SessionManager<A, S> {
    auth: A,
    gateway: Gateway<S>,
    state: watch::Sender<Option<CurrentUser>>,
}

fn profile_from_session(session: &Session) -> UserProfile {
    UserProfile {
        id: session.user.id.clone(),
        display_name: session.user.display_name.clone(),
        avatar_url: session.user.avatar_url.clone(),
    }
}

impl<A: AuthProvider, S: RemoteStore> SessionManager<A, S> {
    pub fn new(auth: A, gateway: Gateway<S>) -> SessionManager<A, S> {
        let (state, _) = watch::channel(None);
        SessionManager {
            auth,
            gateway,
            state,
        }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.state.borrow().clone()
    }

    /// Profile of the signed-in user, as comment stores expect their viewer
    pub fn viewer(&self) -> Option<UserProfile> {
        self.state.borrow().as_ref().map(|u| u.profile.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.state.subscribe()
    }

    /// Picks up the session the provider already has, if any
    pub async fn init(&self) -> Result<Option<CurrentUser>, Error> {
        match self.auth.current_session().await? {
            Some(session) => self.set_session(session, true).await,
            None => {
                self.state.send_replace(None);
            }
        }
        Ok(self.current_user())
    }

    /// Looks up the profile row, falling back to the provider's metadata
    async fn load_profile(&self, session: &Session) -> UserProfile {
        match self.gateway.fetch_profile(&session.user.id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::debug!(user = %session.user.id, "no profile row, using session metadata");
                profile_from_session(session)
            }
            Err(error) => {
                tracing::warn!(user = %session.user.id, %error, "failed loading profile");
                profile_from_session(session)
            }
        }
    }

    async fn set_session(&self, session: Session, reload_profile: bool) {
        let known = self
            .state
            .borrow()
            .as_ref()
            .filter(|u| u.session.user.id == session.user.id)
            .map(|u| u.profile.clone());
        let profile = match known {
            Some(p) if !reload_profile => p,
            _ => self.load_profile(&session).await,
        };
        self.state.send_replace(Some(CurrentUser { session, profile }));
    }

    pub async fn handle(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                tracing::info!(user = %session.user.id, "signed in");
                self.set_session(session, true).await;
            }
            AuthEvent::TokenRefreshed(session) => {
                tracing::debug!(user = %session.user.id, "session token refreshed");
                self.set_session(session, false).await;
            }
            AuthEvent::UserUpdated(session) => {
                tracing::info!(user = %session.user.id, "user updated");
                self.set_session(session, true).await;
            }
            AuthEvent::SignedOut => {
                tracing::info!("signed out");
                self.state.send_replace(None);
            }
        }
    }

    /// Follows `events` until the stream ends or `shutdown` fires, then
    /// forgets the current user
    pub async fn run(&self, events: BoxStream<'static, AuthEvent>, shutdown: oneshot::Receiver<()>) {
        let mut events = events.fuse();
        let mut shutdown = shutdown;
        loop {
            select! {
                e = events.next() => match e {
                    Some(e) => self.handle(e).await,
                    None => break,
                },
                _ = shutdown => break,
            }
        }
        tracing::debug!("session manager stopped");
        self.state.send_replace(None);
    }

    /// `run` on the provider's own event stream
    pub async fn listen(&self, shutdown: oneshot::Receiver<()>) {
        self.run(self.auth.events(), shutdown).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<CurrentUser, Error> {
        let session = self.auth.sign_in(email, password).await?;
        self.handle(AuthEvent::SignedIn(session)).await;
        self.current_user().ok_or(Error::NotAuthenticated)
    }

    pub async fn sign_out(&self) -> Result<(), Error> {
        self.auth.sign_out().await?;
        self.handle(AuthEvent::SignedOut).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sage_mock_server::{MockAuth, MockServer};
    use serde_json::json;

    use super::*;
    use crate::{
        api::{AuthToken, SessionUser, Table},
        test_utils::*,
    };

    type Manager = SessionManager<Arc<MockAuth>, Arc<MockServer>>;

    fn setup() -> (Arc<MockAuth>, Arc<MockServer>, Manager) {
        init_tracing();
        let auth = Arc::new(MockAuth::new());
        let server = Arc::new(MockServer::new());
        let manager = SessionManager::new(auth.clone(), Gateway::new(server.clone()));
        (auth, server, manager)
    }

    #[tokio::test]
    async fn profile_row_wins_over_metadata() {
        let (auth, server, manager) = setup();
        let id = auth.test_add_user("ann@example.com", "hunter2", Some("ann from metadata"));
        server.test_seed(
            Table::UserProfiles,
            json!({ "id": id, "display_name": "Ann", "avatar_url": "https://cdn.example/ann.png" }),
        );

        assert_eq!(manager.init().await.unwrap(), None);
        assert_eq!(
            manager.sign_in("ann@example.com", "wrong").await,
            Err(Error::PermissionDenied)
        );
        let user = manager.sign_in("ann@example.com", "hunter2").await.unwrap();
        assert_eq!(user.profile.display_name(), "Ann");
        assert_eq!(manager.viewer().map(|p| p.id), Some(id));

        manager.sign_out().await.unwrap();
        assert_eq!(manager.current_user(), None);
    }

    #[tokio::test]
    async fn missing_profile_uses_metadata() {
        let (auth, server, manager) = setup();
        auth.test_add_user("bo@example.com", "pw", Some("Bo"));
        auth.sign_in("bo@example.com", "pw").await.unwrap();

        // existing session picked up on startup
        let user = manager.init().await.unwrap().unwrap();
        assert_eq!(user.profile.display_name.as_deref(), Some("Bo"));

        server.set_offline(true);
        auth.test_add_user("cy@example.com", "pw", None);
        manager.handle(AuthEvent::SignedIn(auth.sign_in("cy@example.com", "pw").await.unwrap())).await;
        assert_eq!(manager.viewer().unwrap().display_name(), "Anonymous");
    }

    #[tokio::test]
    async fn follows_provider_events() {
        let (auth, server, manager) = setup();
        let id = auth.test_add_user("di@example.com", "pw", Some("Di"));
        let events = auth.events();
        let mut rx = manager.subscribe();
        let (stop, shutdown) = oneshot::channel();

        let driver = async {
            auth.sign_in("di@example.com", "pw").await.unwrap();
            rx.changed().await.unwrap();
            let first = rx.borrow_and_update().clone().unwrap();
            assert_eq!(first.session.user.id, id);

            // a refresh keeps the profile it already has
            server.test_seed(Table::UserProfiles, json!({ "id": id, "display_name": "Diane" }));
            let refreshed = auth.test_refresh_token().unwrap();
            rx.changed().await.unwrap();
            let user = rx.borrow_and_update().clone().unwrap();
            assert_eq!(user.session, refreshed);
            assert_eq!(user.profile.display_name(), "Di");

            // an update reloads it
            auth.test_update_display_name("Dee").unwrap();
            rx.changed().await.unwrap();
            assert_eq!(
                rx.borrow_and_update().as_ref().unwrap().profile.display_name(),
                "Diane"
            );

            auth.sign_out().await.unwrap();
            rx.changed().await.unwrap();
            assert_eq!(*rx.borrow_and_update(), None);

            auth.sign_in("di@example.com", "pw").await.unwrap();
            rx.changed().await.unwrap();
            assert!(rx.borrow_and_update().is_some());
            stop.send(()).unwrap();
        };
        tokio::join!(manager.run(events, shutdown), driver);
        assert_eq!(manager.current_user(), None, "state is torn down on exit");
    }

    #[tokio::test]
    async fn stops_when_the_provider_goes_away() {
        let (auth, _server, manager) = setup();
        let (_stop, shutdown) = oneshot::channel::<()>();
        auth.test_add_user("ed@example.com", "pw", None);
        let (_, ()) = tokio::join!(manager.listen(shutdown), async {
            tokio::task::yield_now().await;
            auth.sign_in("ed@example.com", "pw").await.unwrap();
            auth.test_close_feeds();
        });
        assert_eq!(manager.current_user(), None);
    }

    #[tokio::test]
    async fn user_updates_reload_the_profile() {
        let (_auth, server, manager) = setup();
        let name = "Fay";
        let id = seed_profile(&server, name);
        let session = Session {
            access_token: AuthToken(String::from("t")),
            refresh_token: None,
            expires_at: Some(at(0)),
            user: SessionUser {
                id: id.clone(),
                email: None,
                display_name: None,
                avatar_url: None,
            },
        };
        assert!(session.is_expired(at(1)));
        manager.handle(AuthEvent::UserUpdated(session)).await;
        let viewer = manager.viewer().unwrap();
        assert_eq!(viewer.display_name(), name);
        assert_eq!(viewer.avatar_url.as_deref(), Some("https://cdn.example/Fay.png"));
    }
}
