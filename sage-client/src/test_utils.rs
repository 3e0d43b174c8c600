use chrono::Utc;
use sage_mock_server::MockServer;
use serde_json::json;

use crate::api::{CommentId, PostId, Table, Time, UserId};

/// Logs to the test output when `RUST_LOG` is set
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// `minute` minutes after a fixed instant in the past
pub fn at(minute: i64) -> Time {
    chrono::DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + chrono::Duration::minutes(minute)
}

pub fn seed_profile(server: &MockServer, name: &str) -> UserId {
    let row = server.test_seed(
        Table::UserProfiles,
        json!({ "display_name": name, "avatar_url": format!("https://cdn.example/{name}.png") }),
    );
    UserId::new(row["id"].as_str().unwrap())
}

pub fn seed_comment(
    server: &MockServer,
    post: &PostId,
    parent: Option<&CommentId>,
    user: &UserId,
    content: &str,
    minute: i64,
) -> CommentId {
    let row = server.test_seed(
        Table::Comments,
        json!({
            "post_id": post,
            "parent_id": parent,
            "user_id": user,
            "content": content,
            "created_at": at(minute),
            "updated_at": at(minute),
        }),
    );
    CommentId::new(row["id"].as_str().unwrap())
}

pub fn seed_like(server: &MockServer, comment: &CommentId, user: &UserId) {
    server.test_seed(
        Table::CommentLikes,
        json!({ "comment_id": comment, "user_id": user }),
    );
}
