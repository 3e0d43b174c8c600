use anyhow::{anyhow, Context};
use serde_json::json;

use crate::CommentId;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Conflicting row already exists: {0}")]
    Conflict(String),

    #[error("Malformed row returned by the store: {0}")]
    Malformed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Comment content is empty")]
    EmptyContent,

    #[error("Comment content is too long ({0} characters)")]
    ContentTooLong(usize),

    #[error("Invalid email address {0:?}")]
    InvalidEmail(String),

    #[error("Parent comment {0} does not belong to this post")]
    ParentMismatch(CommentId),

    #[error("Comment {0} is still being created")]
    PendingCreate(CommentId),

    #[error("Unknown comment {0}")]
    UnknownComment(CommentId),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Malformed(_) => StatusCode::BAD_GATEWAY,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::ContentTooLong(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::InvalidEmail(_) => StatusCode::BAD_REQUEST,
            Error::ParentMismatch(_) => StatusCode::BAD_REQUEST,
            Error::PendingCreate(_) => StatusCode::CONFLICT,
            Error::UnknownComment(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Whether the failure is worth retrying by hand, as opposed to bad input
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Unknown(_))
    }

    pub fn contents(&self) -> serde_json::Value {
        let message = self.to_string();
        match self {
            Error::Unknown(what) => json!({
                "message": message,
                "type": "unknown",
                "details": what,
            }),
            Error::Network(what) => json!({
                "message": message,
                "type": "network",
                "details": what,
            }),
            Error::PermissionDenied => json!({ "message": message, "type": "permission-denied" }),
            Error::NotAuthenticated => json!({ "message": message, "type": "not-authenticated" }),
            Error::Conflict(what) => json!({
                "message": message,
                "type": "conflict",
                "details": what,
            }),
            Error::Malformed(what) => json!({
                "message": message,
                "type": "malformed",
                "details": what,
            }),
            Error::NullByteInString(s) => json!({
                "message": message,
                "type": "null-byte",
                "string": s,
            }),
            Error::EmptyContent => json!({ "message": message, "type": "empty-content" }),
            Error::ContentTooLong(len) => json!({
                "message": message,
                "type": "content-too-long",
                "length": len,
            }),
            Error::InvalidEmail(e) => json!({
                "message": message,
                "type": "invalid-email",
                "email": e,
            }),
            Error::ParentMismatch(id) => json!({
                "message": message,
                "type": "parent-mismatch",
                "comment_id": id,
            }),
            Error::PendingCreate(id) => json!({
                "message": message,
                "type": "pending-create",
                "comment_id": id,
            }),
            Error::UnknownComment(id) => json!({
                "message": message,
                "type": "unknown-comment",
                "comment_id": id,
            }),
        }
    }

    /// Parses back the output of `contents`
    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let field = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error is missing its {name:?} field"))
        };
        let comment_id = || field("comment_id").map(CommentId::new);
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(field("details")?),
                "network" => Error::Network(field("details")?),
                "permission-denied" => Error::PermissionDenied,
                "not-authenticated" => Error::NotAuthenticated,
                "conflict" => Error::Conflict(field("details")?),
                "malformed" => Error::Malformed(field("details")?),
                "null-byte" => Error::NullByteInString(field("string")?),
                "empty-content" => Error::EmptyContent,
                "content-too-long" => Error::ContentTooLong(
                    data.get("length")
                        .and_then(|l| l.as_u64())
                        .and_then(|l| usize::try_from(l).ok())
                        .ok_or_else(|| anyhow!("error is a content-too-long without a length"))?,
                ),
                "invalid-email" => Error::InvalidEmail(field("email")?),
                "parent-mismatch" => Error::ParentMismatch(comment_id()?),
                "pending-create" => Error::PendingCreate(comment_id()?),
                "unknown-comment" => Error::UnknownComment(comment_id()?),
                _ => return Err(anyhow!("error contents has unknown type: {data:?}")),
            },
        )
    }

    /// Maps an error response of the hosted store (PostgREST or its auth
    /// server) onto the local taxonomy
    pub fn from_store_response(status: http::StatusCode, body: &[u8]) -> Error {
        use http::StatusCode;
        let data: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
        let field = |name: &str| data.get(name).and_then(|v| v.as_str());
        let message = field("message")
            .or_else(|| field("msg"))
            .or_else(|| field("error_description"))
            .map(String::from)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        // 23505 is postgres' unique_violation
        if field("code") == Some("23505") || status == StatusCode::CONFLICT {
            return Error::Conflict(field("details").map(String::from).unwrap_or(message));
        }
        match status {
            StatusCode::UNAUTHORIZED => Error::NotAuthenticated,
            StatusCode::FORBIDDEN => Error::PermissionDenied,
            s if s.is_server_error() => Error::Network(format!("{s}: {message}")),
            s => Error::Unknown(format!("{s}: {message}")),
        }
    }
}
