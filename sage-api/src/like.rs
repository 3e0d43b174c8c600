use crate::{CommentId, LikeId, Time, UserId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Like {
    pub id: LikeId,
    pub comment_id: CommentId,
    pub user_id: UserId,

    #[serde(default)]
    pub is_deleted: bool,

    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewLike {
    pub comment_id: CommentId,
    pub user_id: UserId,
}

/// Aggregated like data for one comment, as seen by one viewer
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LikeStats {
    pub comment_id: CommentId,
    pub like_count: usize,
    pub viewer_liked: bool,
}

impl LikeStats {
    pub fn zero(comment_id: CommentId) -> LikeStats {
        LikeStats {
            comment_id,
            like_count: 0,
            viewer_liked: false,
        }
    }
}
