use std::{collections::BTreeMap, str::FromStr};

use crate::{Error, PostId, ReactionId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Heart,
    Fire,
    Laugh,
    MindBlown,
    ThumbsUp,
    Thinking,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Heart,
        ReactionKind::Fire,
        ReactionKind::Laugh,
        ReactionKind::MindBlown,
        ReactionKind::ThumbsUp,
        ReactionKind::Thinking,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReactionKind::Heart => "heart",
            ReactionKind::Fire => "fire",
            ReactionKind::Laugh => "laugh",
            ReactionKind::MindBlown => "mind_blown",
            ReactionKind::ThumbsUp => "thumbs_up",
            ReactionKind::Thinking => "thinking",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ReactionKind::Heart => "❤️",
            ReactionKind::Fire => "🔥",
            ReactionKind::Laugh => "😂",
            ReactionKind::MindBlown => "🤯",
            ReactionKind::ThumbsUp => "👍",
            ReactionKind::Thinking => "🤔",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<ReactionKind, Error> {
        ReactionKind::ALL
            .into_iter()
            .find(|k| k.name() == s || k.emoji() == s)
            .ok_or_else(|| Error::Unknown(format!("unknown reaction kind {s:?}")))
    }
}

/// Reaction of one user to one feature post, at most one active per pair
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Reaction {
    pub id: ReactionId,
    pub feature_id: PostId,
    pub user_id: UserId,
    pub reaction_type: ReactionKind,

    #[serde(default)]
    pub is_deleted: bool,

    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewReaction {
    pub feature_id: PostId,
    pub user_id: UserId,
    pub reaction_type: ReactionKind,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ReactionSummary {
    pub feature_id: PostId,

    /// Only kinds with at least one active reaction are present
    pub counts: BTreeMap<ReactionKind, usize>,

    pub viewer_reaction: Option<ReactionKind>,
}

impl ReactionSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: ReactionKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}
