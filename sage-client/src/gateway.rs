use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    api::{
        Comment, CommentId, CommentPatch, Error, Like, NewComment, NewLike, Page, PostId,
        RemoteStore, Select, Table, UserId, UserProfile,
    },
    tree::{self, CommentPage, Cursor},
};

/// Typed operations over the hosted store.
///
/// Every operation returns a normalized `Error` on failure and never panics;
/// the caller decides whether to roll back, notify or ignore.
pub struct Gateway<S> {
    store: S,
}

pub(crate) fn decode<T: DeserializeOwned>(table: Table, row: Value) -> Result<T, Error> {
    serde_json::from_value(row)
        .map_err(|e| Error::Malformed(format!("decoding row of {}: {e}", table.name())))
}

fn encode<T: Serialize>(table: Table, row: &T) -> Result<Value, Error> {
    serde_json::to_value(row)
        .map_err(|e| Error::Malformed(format!("encoding row for {}: {e}", table.name())))
}

impl<S: RemoteStore> Gateway<S> {
    pub fn new(store: S) -> Gateway<S> {
        Gateway { store }
    }

    pub(crate) async fn insert_row<T, R>(&self, table: Table, row: &T) -> Result<R, Error>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let row = encode(table, row)?;
        tracing::debug!(table = table.name(), "inserting row");
        decode(table, self.store.insert(table, row).await?)
    }

    pub(crate) async fn select_rows<R>(&self, table: Table, query: &Select) -> Result<Vec<R>, Error>
    where
        R: DeserializeOwned,
    {
        tracing::debug!(table = table.name(), ?query, "selecting rows");
        self.store
            .select(table, query)
            .await?
            .into_iter()
            .map(|r| decode(table, r))
            .collect()
    }

    pub(crate) async fn update_row<T, R>(&self, table: Table, id: &str, patch: &T) -> Result<R, Error>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let patch = encode(table, patch)?;
        tracing::debug!(table = table.name(), id, "updating row");
        decode(table, self.store.update(table, id, patch).await?)
    }

    /// Returns `None` if the comment does not exist or was deleted
    pub async fn fetch_comment(&self, id: &CommentId) -> Result<Option<Comment>, Error> {
        let mut rows = self
            .select_rows(
                Table::Comments,
                &Select::active()
                    .eq("id", id.as_str())
                    .paginate(Page::first(1)),
            )
            .await?;
        Ok(rows.pop())
    }

    /// Fetches one page of top-level comments of a post, with their replies,
    /// authors and like data
    pub async fn fetch_comments(
        &self,
        post: &PostId,
        viewer: Option<&UserId>,
        include_replies: bool,
        page: Page,
    ) -> Result<CommentPage, Error> {
        self.fetch_thread(post, viewer, |rows, profiles| {
            tree::assemble(rows, profiles, &HashMap::new(), include_replies, page)
        })
        .await
    }

    /// Fetches the `limit` top-level comments that come after `cursor`
    pub async fn fetch_comments_after(
        &self,
        post: &PostId,
        viewer: Option<&UserId>,
        include_replies: bool,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<CommentPage, Error> {
        self.fetch_thread(post, viewer, |rows, profiles| {
            tree::assemble_after(rows, profiles, &HashMap::new(), include_replies, cursor, limit)
        })
        .await
    }

    async fn fetch_thread(
        &self,
        post: &PostId,
        viewer: Option<&UserId>,
        assemble: impl FnOnce(Vec<Comment>, &HashMap<UserId, UserProfile>) -> CommentPage,
    ) -> Result<CommentPage, Error> {
        let rows: Vec<Comment> = self
            .select_rows(
                Table::Comments,
                &Select::active()
                    .eq("post_id", post.as_str())
                    .order_by("created_at", false),
            )
            .await?;
        let authors = rows
            .iter()
            .map(|c| c.user_id.clone())
            .collect::<BTreeSet<_>>();
        let profiles = match self.fetch_profiles(authors.iter()).await {
            Ok(profiles) => profiles,
            Err(error) => {
                tracing::warn!(%post, %error, "failed loading authors, showing them as anonymous");
                HashMap::new()
            }
        };
        let mut res = assemble(rows, &profiles);
        let ids = tree::collect_ids(&res.comments);
        let stats = self
            .like_stats(&ids, viewer)
            .await?
            .into_iter()
            .map(|s| (s.comment_id.clone(), s))
            .collect::<HashMap<_, _>>();
        tree::apply_like_stats(&mut res.comments, &stats);
        Ok(res)
    }

    /// Posts a comment, or a reply if `parent` is set.
    ///
    /// The parent must be an existing comment of the same post.
    pub async fn create_comment(
        &self,
        user: &UserId,
        post: &PostId,
        parent: Option<&CommentId>,
        content: &str,
    ) -> Result<Comment, Error> {
        let row = NewComment::new(post.clone(), parent.cloned(), user.clone(), content)?;
        if let Some(parent) = parent {
            match self.fetch_comment(parent).await? {
                Some(p) if p.post_id == *post => (),
                _ => return Err(Error::ParentMismatch(parent.clone())),
            }
        }
        self.insert_row(Table::Comments, &row).await
    }

    pub async fn update_comment(&self, id: &CommentId, content: &str) -> Result<Comment, Error> {
        let patch = CommentPatch::content(content, Utc::now())?;
        self.update_row(Table::Comments, id.as_str(), &patch).await
    }

    pub async fn delete_comment(&self, id: &CommentId) -> Result<(), Error> {
        let _: Comment = self
            .update_row(
                Table::Comments,
                id.as_str(),
                &CommentPatch::soft_delete(Utc::now()),
            )
            .await?;
        Ok(())
    }

    pub async fn active_like(&self, comment: &CommentId, user: &UserId) -> Result<Option<Like>, Error> {
        let mut rows = self
            .select_rows(
                Table::CommentLikes,
                &Select::active()
                    .eq("comment_id", comment.as_str())
                    .eq("user_id", user.as_str()),
            )
            .await?;
        if rows.len() > 1 {
            tracing::warn!(%comment, %user, num_likes = rows.len(), "multiple active likes for the same user");
        }
        Ok(rows.pop())
    }

    pub async fn has_user_liked_comment(&self, comment: &CommentId, user: &UserId) -> Result<bool, Error> {
        Ok(self.active_like(comment, user).await?.is_some())
    }

    /// Soft-deletes the user's active like if there is one, likes otherwise.
    ///
    /// Returns whether the comment is now liked by the user.
    pub async fn toggle_like(&self, comment: &CommentId, user: &UserId) -> Result<bool, Error> {
        match self.active_like(comment, user).await? {
            Some(like) => {
                let _: Like = self
                    .update_row(
                        Table::CommentLikes,
                        like.id.as_str(),
                        &serde_json::json!({ "is_deleted": true, "updated_at": Utc::now() }),
                    )
                    .await?;
                Ok(false)
            }
            None => {
                let _: Like = self
                    .insert_row(
                        Table::CommentLikes,
                        &NewLike {
                            comment_id: comment.clone(),
                            user_id: user.clone(),
                        },
                    )
                    .await?;
                Ok(true)
            }
        }
    }

    pub async fn fetch_profiles<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a UserId>,
    ) -> Result<HashMap<UserId, UserProfile>, Error> {
        let ids = ids
            .into_iter()
            .map(|id| id.as_str())
            .collect::<BTreeSet<_>>();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .select_rows::<UserProfile>(Table::UserProfiles, &Select::new().is_in("id", ids))
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect())
    }

    pub async fn fetch_profile(&self, id: &UserId) -> Result<Option<UserProfile>, Error> {
        Ok(self.fetch_profiles([id]).await?.remove(id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sage_mock_server::MockServer;

    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn end_to_end_thread_shape() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let post = PostId::from("feature-dark-mode");
        let alice = seed_profile(&server, "Alice");
        let bob = seed_profile(&server, "Bob");

        let a = seed_comment(&server, &post, None, &alice, "A", 1);
        let _b = seed_comment(&server, &post, None, &bob, "B", 2);
        seed_comment(&server, &post, Some(&a), &bob, "reply to A", 3);

        let page = gw
            .fetch_comments(&post, Some(&alice), true, Page::first(10))
            .await
            .unwrap();
        assert_eq!(page.comments.len(), 2);
        assert_eq!(page.total_top_level, 2);
        assert_eq!(page.next_page, None);

        let node_a = page.comments.iter().find(|n| n.id == a).unwrap();
        let node_b = page.comments.iter().find(|n| n.id != a).unwrap();
        assert_eq!(node_a.reply_count, 1);
        assert_eq!(node_a.replies.len(), 1);
        assert_eq!(node_a.replies[0].content, "reply to A");
        assert_eq!(node_a.replies[0].author.display_name, "Bob");
        assert_eq!(node_b.reply_count, 0);
        assert!(node_b.replies.is_empty());
        // newest top-level comment first
        assert_eq!(page.comments[0].content, "B");
    }

    #[tokio::test]
    async fn like_toggle_soft_deletes_same_row() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let post = PostId::from("p");
        let u = seed_profile(&server, "U");
        let c = seed_comment(&server, &post, None, &u, "hello", 1);

        assert!(!gw.has_user_liked_comment(&c, &u).await.unwrap());
        assert!(gw.toggle_like(&c, &u).await.unwrap());
        let rows = server.test_rows(Table::CommentLikes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["is_deleted"], false);
        assert!(gw.has_user_liked_comment(&c, &u).await.unwrap());

        assert!(!gw.toggle_like(&c, &u).await.unwrap());
        let rows = server.test_rows(Table::CommentLikes);
        assert_eq!(rows.len(), 1, "unliking must not insert");
        assert_eq!(rows[0]["is_deleted"], true);
        assert!(!gw.has_user_liked_comment(&c, &u).await.unwrap());
    }

    #[tokio::test]
    async fn replies_must_stay_in_their_post() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let u = seed_profile(&server, "U");
        let elsewhere = seed_comment(&server, &PostId::from("other"), None, &u, "x", 1);

        let post = PostId::from("p");
        assert_eq!(
            gw.create_comment(&u, &post, Some(&elsewhere), "hi").await,
            Err(Error::ParentMismatch(elsewhere.clone()))
        );
        let missing = CommentId::from("missing");
        assert_eq!(
            gw.create_comment(&u, &post, Some(&missing), "hi").await,
            Err(Error::ParentMismatch(missing))
        );
        assert_eq!(
            gw.create_comment(&u, &post, None, "   ").await,
            Err(Error::EmptyContent)
        );

        let top = gw.create_comment(&u, &post, None, " top ").await.unwrap();
        assert_eq!(top.content, "top");
        let reply = gw.create_comment(&u, &post, Some(&top.id), "reply").await.unwrap();
        assert_eq!(reply.parent_id, Some(top.id));
    }

    #[tokio::test]
    async fn edit_and_delete() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let post = PostId::from("p");
        let u = seed_profile(&server, "U");
        let c = seed_comment(&server, &post, None, &u, "first", 1);

        let edited = gw.update_comment(&c, "second").await.unwrap();
        assert_eq!(edited.content, "second");
        assert!(edited.updated_at > edited.created_at);

        gw.delete_comment(&c).await.unwrap();
        assert_eq!(gw.fetch_comment(&c).await.unwrap(), None);
        assert_eq!(server.test_rows(Table::Comments).len(), 1, "deletes are soft");
    }

    #[tokio::test]
    async fn failures_are_normalized() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        server.set_offline(true);
        assert!(matches!(
            gw.fetch_comments(&PostId::from("p"), None, true, Page::first(5)).await,
            Err(Error::Network(_))
        ));

        server.set_offline(false);
        server.test_seed(Table::Comments, serde_json::json!({"content": 42}));
        assert!(matches!(
            gw.fetch_comments(&PostId::from("p"), None, true, Page::first(5)).await,
            Ok(_)
        ));
        assert!(matches!(
            gw.select_rows::<Comment>(Table::Comments, &Select::new()).await,
            Err(Error::Malformed(_))
        ));
    }

    /// Fails every call on one table, passes the others through
    struct FailingTable {
        inner: Arc<MockServer>,
        table: Table,
    }

    #[async_trait::async_trait]
    impl RemoteStore for FailingTable {
        async fn insert(&self, table: Table, row: Value) -> Result<Value, Error> {
            self.inner.insert(table, row).await
        }

        async fn select(&self, table: Table, query: &Select) -> Result<Vec<Value>, Error> {
            match table == self.table {
                true => Err(Error::Network(format!("{} is down", table.name()))),
                false => self.inner.select(table, query).await,
            }
        }

        async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, Error> {
            self.inner.update(table, id, patch).await
        }
    }

    #[tokio::test]
    async fn missing_profiles_show_anonymous_authors() {
        let server = Arc::new(MockServer::new());
        let post = PostId::from("p");
        let u = seed_profile(&server, "U");
        let c = seed_comment(&server, &post, None, &u, "hello", 1);
        seed_comment(&server, &post, Some(&c), &u, "again", 2);
        seed_like(&server, &c, &u);

        let gw = Gateway::new(FailingTable {
            inner: server.clone(),
            table: Table::UserProfiles,
        });
        let page = gw
            .fetch_comments(&post, Some(&u), true, Page::first(10))
            .await
            .unwrap();
        assert_eq!(page.comments.len(), 1);
        let node = &page.comments[0];
        assert_eq!(node.author.display_name, "Anonymous");
        assert_eq!(node.author.id, u);
        assert_eq!(node.replies[0].author.display_name, "Anonymous");
        assert_eq!((node.like_count, node.is_hearted), (1, true));

        // comments and likes are still required
        let gw = Gateway::new(FailingTable {
            inner: server,
            table: Table::CommentLikes,
        });
        assert!(matches!(
            gw.fetch_comments(&post, Some(&u), true, Page::first(10)).await,
            Err(Error::Network(_))
        ));
    }
}
