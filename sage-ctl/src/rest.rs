use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, StatusCode};
use sage_api::{
    AuthEvent, AuthProvider, AuthToken, Error, RemoteStore, Select, Session, SessionUser, Table,
    UserId,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Where the hosted store lives and how to talk to it
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub host: String,
    pub anon_key: String,
}

impl Endpoint {
    fn request(&self, client: &reqwest::Client, method: Method, path: &str, token: Option<&AuthToken>) -> RequestBuilder {
        let bearer = token.map(|t| t.0.as_str()).unwrap_or(&self.anon_key);
        client
            .request(method, format!("{}{}", self.host.trim_end_matches('/'), path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }
}

async fn send_raw(req: RequestBuilder) -> anyhow::Result<(StatusCode, Vec<u8>)> {
    let resp = req.send().await.context("sending request")?;
    let status = resp.status();
    let body = resp.bytes().await.context("reading response body")?;
    Ok((status, body.to_vec()))
}

/// Sends a request, normalizing every failure
async fn send<R: DeserializeOwned>(req: RequestBuilder) -> Result<R, Error> {
    let (status, body) = send_raw(req)
        .await
        .map_err(|e| Error::Network(format!("{e:#}")))?;
    if !status.is_success() {
        return Err(Error::from_store_response(status, &body));
    }
    if body.is_empty() {
        return serde_json::from_value(Value::Null).map_err(|e| Error::Malformed(e.to_string()));
    }
    serde_json::from_slice(&body).map_err(|e| Error::Malformed(e.to_string()))
}

/// PostgREST-backed store
pub struct RestStore {
    client: reqwest::Client,
    endpoint: Endpoint,
    token: Mutex<Option<AuthToken>>,
}

impl RestStore {
    pub fn new(client: reqwest::Client, endpoint: Endpoint) -> RestStore {
        RestStore {
            client,
            endpoint,
            token: Mutex::new(None),
        }
    }

    /// Requests are anonymous until a token is set
    pub fn set_token(&self, token: Option<AuthToken>) {
        *self.token.lock() = token;
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        let token = self.token.lock().clone();
        self.endpoint.request(
            &self.client,
            method,
            &format!("/rest/v1/{}", table.name()),
            token.as_ref(),
        )
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, Error> {
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row);
        let mut rows: Vec<Value> = send(req).await?;
        rows.pop()
            .ok_or_else(|| Error::Malformed(format!("insert into {} returned no row", table.name())))
    }

    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Value>, Error> {
        let mut params = vec![(String::from("select"), String::from("*"))];
        params.extend(query.to_postgrest());
        send(self.request(Method::GET, table).query(&params)).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, Error> {
        let req = self
            .request(Method::PATCH, table)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let mut rows: Vec<Value> = send(req).await?;
        rows.pop()
            .ok_or_else(|| Error::Unknown(format!("no row {id} in {}", table.name())))
    }
}

#[derive(serde::Deserialize)]
struct UserMetadata {
    display_name: Option<String>,
    full_name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(serde::Deserialize)]
struct RemoteUser {
    id: UserId,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

impl From<RemoteUser> for SessionUser {
    fn from(u: RemoteUser) -> SessionUser {
        let meta = u.user_metadata;
        SessionUser {
            id: u.id,
            email: u.email,
            display_name: meta
                .as_ref()
                .and_then(|m| m.display_name.clone().or_else(|| m.full_name.clone())),
            avatar_url: meta.and_then(|m| m.avatar_url),
        }
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: RemoteUser,
}

/// Password sign-in against the hosted auth server
pub struct RestAuth {
    client: reqwest::Client,
    endpoint: Endpoint,
    state: Mutex<RestAuthState>,
}

#[derive(Default)]
struct RestAuthState {
    /// Token handed in from outside, resolved into a session on first use
    token: Option<AuthToken>,
    current: Option<Session>,
    feeds: Vec<mpsc::UnboundedSender<AuthEvent>>,
}

impl RestAuthState {
    fn relay(&mut self, e: AuthEvent) {
        self.feeds.retain(|f| f.unbounded_send(e.clone()).is_ok());
    }
}

impl RestAuth {
    pub fn new(client: reqwest::Client, endpoint: Endpoint, token: Option<AuthToken>) -> RestAuth {
        RestAuth {
            client,
            endpoint,
            state: Mutex::new(RestAuthState {
                token,
                ..RestAuthState::default()
            }),
        }
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
    async fn current_session(&self) -> Result<Option<Session>, Error> {
        let token = {
            let state = self.state.lock();
            if let Some(s) = &state.current {
                return Ok(Some(s.clone()));
            }
            match &state.token {
                Some(t) => t.clone(),
                None => return Ok(None),
            }
        };
        let req = self
            .endpoint
            .request(&self.client, Method::GET, "/auth/v1/user", Some(&token));
        let user: RemoteUser = send(req).await?;
        let session = Session {
            access_token: token,
            refresh_token: None,
            expires_at: None,
            user: user.into(),
        };
        self.state.lock().current = Some(session.clone());
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        let req = self
            .endpoint
            .request(&self.client, Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let resp: TokenResponse = send(req).await?;
        let session = Session {
            access_token: AuthToken(resp.access_token),
            refresh_token: resp.refresh_token,
            expires_at: resp
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            user: resp.user.into(),
        };
        let mut state = self.state.lock();
        state.token = Some(session.access_token.clone());
        state.current = Some(session.clone());
        state.relay(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        let token = match self.state.lock().token.clone() {
            Some(t) => t,
            None => return Ok(()),
        };
        let req = self
            .endpoint
            .request(&self.client, Method::POST, "/auth/v1/logout", Some(&token));
        let _: Value = send(req).await?;
        let mut state = self.state.lock();
        state.token = None;
        state.current = None;
        state.relay(AuthEvent::SignedOut);
        Ok(())
    }

    fn events(&self) -> BoxStream<'static, AuthEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().feeds.push(sender);
        receiver.boxed()
    }
}
