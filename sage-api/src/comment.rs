use crate::{CommentId, Error, PostId, Time, UserId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,

    /// `None` for top-level comments
    pub parent_id: Option<CommentId>,

    pub user_id: UserId,
    pub content: String,
    pub created_at: Time,
    pub updated_at: Time,

    #[serde(default)]
    pub is_deleted: bool,
}

/// Row sent to the store when posting a comment or a reply
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub user_id: UserId,
    pub content: String,
}

impl NewComment {
    /// Builds the row, normalizing the content
    pub fn new(
        post_id: PostId,
        parent_id: Option<CommentId>,
        user_id: UserId,
        content: &str,
    ) -> Result<NewComment, Error> {
        crate::validate_string(post_id.as_str())?;
        Ok(NewComment {
            post_id,
            parent_id,
            user_id,
            content: crate::normalize_content(content)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,

    pub updated_at: Time,
}

impl CommentPatch {
    pub fn content(content: &str, now: Time) -> Result<CommentPatch, Error> {
        Ok(CommentPatch {
            content: Some(crate::normalize_content(content)?),
            is_deleted: None,
            updated_at: now,
        })
    }

    pub fn soft_delete(now: Time) -> CommentPatch {
        CommentPatch {
            content: None,
            is_deleted: Some(true),
            updated_at: now,
        }
    }
}
