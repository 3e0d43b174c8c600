use chrono::Utc;

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod auth;
pub use auth::{AuthEvent, AuthProvider, AuthToken, Session, SessionUser};

mod comment;
pub use comment::{Comment, CommentPatch, NewComment};

mod db;
pub use db::RemoteStore;

mod error;
pub use error::Error;

mod like;
pub use like::{Like, LikeStats, NewLike};

pub mod query;
pub use query::{Filter, Order, Page, Select, Table};

mod reaction;
pub use reaction::{NewReaction, Reaction, ReactionKind, ReactionSummary};

mod subscription;
pub use subscription::{EmailSubscription, NewSubscription, SubscribeOutcome};

mod user;
pub use user::{UserProfile, ANONYMOUS_NAME};

/// Longest comment body accepted, in characters
pub const MAX_CONTENT_LEN: usize = 5000;

const TEMPORARY_PREFIX: &str = "temp-";

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Clone,
            Debug,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            serde::Deserialize,
            serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> $name {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> $name {
                $name(id.to_string())
            }
        }
    };
}

string_id!(CommentId);
string_id!(PostId);
string_id!(UserId);
string_id!(LikeId);
string_id!(ReactionId);
string_id!(SubscriptionId);

impl CommentId {
    /// Locally-allocated id for a comment the server has not acknowledged yet
    pub fn temporary() -> CommentId {
        CommentId(format!("{}{}", TEMPORARY_PREFIX, Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }
}

pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Trims a comment body and checks it can be stored
pub fn normalize_content(content: &str) -> Result<String, Error> {
    validate_string(content)?;
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_LEN {
        return Err(Error::ContentTooLong(len));
    }
    Ok(String::from(content))
}

/// Trims and lowercases an email address, rejecting obviously invalid ones
pub fn normalize_email(email: &str) -> Result<String, Error> {
    validate_string(email)?;
    let email = email.trim().to_lowercase();
    let invalid = || Error::InvalidEmail(email.clone());
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || email.contains(char::is_whitespace)
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(email)
}
