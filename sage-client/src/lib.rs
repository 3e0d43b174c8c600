mod gateway;
pub use gateway::Gateway;

mod likes;
pub use likes::aggregate_likes;

mod reactions;
pub use reactions::summarize_reactions;

mod session;
pub use session::{CurrentUser, SessionManager};

mod store;
pub use store::{
    CommentStore, MutationId, MutationKind, MutationOutcome, MutationState, Notice,
    PendingMutation, Thread,
};

mod subscriptions;

pub mod tree;
pub use tree::{Author, CommentNode, CommentPage, Cursor};

pub mod api {
    pub use sage_api::*;
}

#[cfg(test)]
mod test_utils;
