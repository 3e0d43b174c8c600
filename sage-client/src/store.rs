use chrono::Utc;
use tokio::sync::watch;

use crate::{
    api::{normalize_content, CommentId, Error, Page, PostId, RemoteStore, UserProfile, Uuid},
    tree::{self, Author, CommentNode, Cursor, Detached},
    Gateway,
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MutationId(pub Uuid);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationKind {
    Create,
    ToggleLike,
    Edit,
    Delete,
}

/// Lifecycle of one mutation.
///
/// `Idle -> OptimisticApplied -> (Confirmed | RolledBack | Retained)`, where
/// `Retained` means the server refused a create but the node stays visible.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationState {
    Idle,
    OptimisticApplied,
    Confirmed,
    RolledBack,
    Retained,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingMutation {
    pub id: MutationId,
    pub kind: MutationKind,
    pub target: CommentId,
    pub state: MutationState,
}

impl PendingMutation {
    pub fn new(kind: MutationKind, target: CommentId) -> PendingMutation {
        PendingMutation {
            id: MutationId(Uuid::new_v4()),
            kind,
            target,
            state: MutationState::Idle,
        }
    }
}

/// A failed mutation the user should hear about
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notice {
    pub mutation: MutationId,
    pub kind: MutationKind,
    pub target: CommentId,
    pub error: Error,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MutationOutcome {
    Confirmed,
    RolledBack(Error),
    Retained(Error),
}

impl MutationOutcome {
    pub fn state(&self) -> MutationState {
        match self {
            MutationOutcome::Confirmed => MutationState::Confirmed,
            MutationOutcome::RolledBack(_) => MutationState::RolledBack,
            MutationOutcome::Retained(_) => MutationState::Retained,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            MutationOutcome::Confirmed => None,
            MutationOutcome::RolledBack(e) | MutationOutcome::Retained(e) => Some(e),
        }
    }
}

/// Everything the store publishes to its subscribers
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Thread {
    pub post: PostId,
    pub viewer: Option<UserProfile>,
    pub comments: Vec<CommentNode>,
    pub total_top_level: usize,
    pub next_page: Option<Page>,

    /// Mutations applied locally and still waiting for the server
    pub pending: Vec<PendingMutation>,

    pub notices: Vec<Notice>,
}

impl Thread {
    fn new(post: PostId, viewer: Option<UserProfile>) -> Thread {
        Thread {
            post,
            viewer,
            comments: Vec::new(),
            total_top_level: 0,
            next_page: None,
            pending: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        tree::find_node(&self.comments, id)
    }

    /// Records a mutation whose optimistic change was just applied
    fn begin(&mut self, mut mutation: PendingMutation) -> MutationId {
        mutation.state = MutationState::OptimisticApplied;
        let id = mutation.id;
        self.pending.push(mutation);
        id
    }

    fn is_pending(&self, kind: MutationKind, target: &CommentId, except: MutationId) -> bool {
        self.pending
            .iter()
            .any(|m| m.id != except && m.kind == kind && m.target == *target)
    }

    fn node_mut(&mut self, id: &CommentId) -> Result<&mut CommentNode, Error> {
        tree::find_node_mut(&mut self.comments, &|n: &CommentNode| n.id == *id)
            .ok_or_else(|| Error::UnknownComment(id.clone()))
    }

    /// Owned node the viewer may mutate, or why it may not
    fn owned_node_mut(&mut self, id: &CommentId) -> Result<&mut CommentNode, Error> {
        let viewer = self.viewer.as_ref().map(|v| v.id.clone()).ok_or(Error::NotAuthenticated)?;
        let node = self.node_mut(id)?;
        match node.is_owned_by(&viewer) {
            true => Ok(node),
            false => Err(Error::PermissionDenied),
        }
    }
}

/// Canonical comment tree of one post, with optimistic mutations.
///
/// Every command applies its change locally first, then talks to the server,
/// then either confirms or compensates. Updates always derive from the latest
/// published state, so several commands may be in flight at once.
pub struct CommentStore<S> {
    gateway: Gateway<S>,
    state: watch::Sender<Thread>,
    page_size: usize,
}

fn refuse_pending(id: &CommentId) -> Result<(), Error> {
    match id.is_temporary() {
        true => Err(Error::PendingCreate(id.clone())),
        false => Ok(()),
    }
}

impl<S: RemoteStore> CommentStore<S> {
    pub fn new(
        gateway: Gateway<S>,
        post: PostId,
        viewer: Option<UserProfile>,
        page_size: usize,
    ) -> CommentStore<S> {
        let (state, _) = watch::channel(Thread::new(post, viewer));
        CommentStore {
            gateway,
            state,
            page_size,
        }
    }

    pub fn gateway(&self) -> &Gateway<S> {
        &self.gateway
    }

    pub fn snapshot(&self) -> Thread {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Thread> {
        self.state.subscribe()
    }

    /// Like data already in the tree is about the previous viewer until the
    /// next `load`
    pub fn set_viewer(&self, viewer: Option<UserProfile>) {
        self.state.send_modify(|t| t.viewer = viewer);
    }

    pub fn clear_notices(&self) {
        self.state.send_if_modified(|t| {
            let had_notices = !t.notices.is_empty();
            t.notices.clear();
            had_notices
        });
    }

    /// Runs `f` on the latest state, publishing only if it succeeded.
    ///
    /// `f` must not touch the thread when returning an error.
    fn update<R>(&self, f: impl FnOnce(&mut Thread) -> Result<R, Error>) -> Result<R, Error> {
        let mut res = Err(Error::Unknown(String::from("thread update did not run")));
        self.state.send_if_modified(|t| {
            res = f(t);
            res.is_ok()
        });
        res
    }

    fn viewer(&self) -> Result<UserProfile, Error> {
        self.state.borrow().viewer.clone().ok_or(Error::NotAuthenticated)
    }

    fn settle(
        &self,
        mutation: MutationId,
        kind: MutationKind,
        target: &CommentId,
        outcome: MutationOutcome,
        compensate: impl FnOnce(&mut Thread),
    ) -> MutationOutcome {
        self.state.send_modify(|t| {
            t.pending.retain(|m| m.id != mutation);
            if let Some(error) = outcome.error() {
                tracing::warn!(?kind, %target, %error, state = ?outcome.state(), "mutation failed");
                t.notices.push(Notice {
                    mutation,
                    kind,
                    target: target.clone(),
                    error: error.clone(),
                });
            }
            compensate(t);
        });
        outcome
    }

    /// Replaces the tree with the given page of the post.
    ///
    /// Local changes the server has not acknowledged yet are carried over.
    pub async fn load(&self, page: Page) -> Result<(), Error> {
        let (post, viewer) = {
            let t = self.state.borrow();
            (t.post.clone(), t.viewer.as_ref().map(|v| v.id.clone()))
        };
        let res = self
            .gateway
            .fetch_comments(&post, viewer.as_ref(), true, page)
            .await?;
        self.state.send_modify(|t| {
            let previous = std::mem::replace(&mut t.comments, res.comments);
            t.total_top_level = res.total_top_level;
            t.next_page = res.next_page;
            reapply_local(t, &previous);
        });
        Ok(())
    }

    pub async fn load_first(&self) -> Result<(), Error> {
        self.load(Page::first(self.page_size)).await
    }

    /// Appends the top-level comments that come after the last one shown.
    ///
    /// Returns `false` if there was nothing more to load.
    pub async fn load_more(&self) -> Result<bool, Error> {
        let (post, viewer, page, cursor) = {
            let t = self.state.borrow();
            let last = t.comments.iter().rev().find(|n| !n.is_pending());
            let cursor = last.map(Cursor::after);
            (
                t.post.clone(),
                t.viewer.as_ref().map(|v| v.id.clone()),
                t.next_page,
                cursor,
            )
        };
        let Some(page) = page else {
            return Ok(false);
        };
        let res = match cursor {
            Some(cursor) => {
                self.gateway
                    .fetch_comments_after(&post, viewer.as_ref(), true, &cursor, page.limit)
                    .await?
            }
            None => {
                self.gateway
                    .fetch_comments(&post, viewer.as_ref(), true, page)
                    .await?
            }
        };
        self.state.send_modify(|t| {
            // concurrent calls fetch the same page
            for node in res.comments {
                if t.find(&node.id).is_none() {
                    t.comments.push(node);
                }
            }
            t.total_top_level = res.total_top_level;
            t.next_page = res.next_page;
        });
        Ok(true)
    }

    pub async fn create_comment(&self, content: &str) -> Result<MutationOutcome, Error> {
        self.create(None, content).await
    }

    pub async fn reply(&self, parent: &CommentId, content: &str) -> Result<MutationOutcome, Error> {
        refuse_pending(parent)?;
        self.create(Some(parent), content).await
    }

    async fn create(&self, parent: Option<&CommentId>, content: &str) -> Result<MutationOutcome, Error> {
        let content = normalize_content(content)?;
        let viewer = self.viewer()?;
        let temp_id = CommentId::temporary();
        let now = Utc::now();
        let (mutation, post) = self.update(|t| {
            let node = CommentNode {
                id: temp_id.clone(),
                post_id: t.post.clone(),
                parent_id: parent.cloned(),
                author: Author::resolve(&viewer.id, Some(&viewer)),
                content: content.clone(),
                created_at: now,
                updated_at: now,
                like_count: 0,
                is_hearted: false,
                reply_count: 0,
                is_expanded: false,
                replies: Vec::new(),
            };
            match parent {
                Some(parent) => {
                    let p = t.node_mut(parent)?;
                    p.replies.push(node);
                    p.reply_count += 1;
                    p.is_expanded = true;
                }
                None => {
                    t.comments.insert(0, node);
                    t.total_top_level += 1;
                }
            }
            Ok((t.begin(PendingMutation::new(MutationKind::Create, temp_id.clone())), t.post.clone()))
        })?;

        match self
            .gateway
            .create_comment(&viewer.id, &post, parent, &content)
            .await
        {
            Ok(created) => Ok(self.settle(
                mutation,
                MutationKind::Create,
                &temp_id,
                MutationOutcome::Confirmed,
                |t| {
                    if t.find(&created.id).is_some() {
                        // a reload already brought the stored row
                        if let Some(d) = tree::remove_node(&mut t.comments, &temp_id) {
                            adjust_count(t, d.parent.as_ref(), false);
                        }
                        return;
                    }
                    let renamed = tree::map_node(&mut t.comments, &temp_id, |n| {
                        n.id = created.id.clone();
                        n.created_at = created.created_at;
                        n.updated_at = created.updated_at;
                    });
                    if renamed.is_none() {
                        tracing::debug!(id = %created.id, "created comment is no longer displayed");
                    }
                },
            )),
            Err(e) => Ok(self.settle(
                mutation,
                MutationKind::Create,
                &temp_id,
                MutationOutcome::Retained(e),
                |_| (),
            )),
        }
    }

    pub async fn toggle_like(&self, id: &CommentId) -> Result<MutationOutcome, Error> {
        refuse_pending(id)?;
        let viewer = self.viewer()?;
        let (mutation, liked) = self.update(|t| {
            let node = t.node_mut(id)?;
            let liked = flip_like(node);
            Ok((t.begin(PendingMutation::new(MutationKind::ToggleLike, id.clone())), liked))
        })?;

        match self.gateway.toggle_like(id, &viewer.id).await {
            Ok(server_liked) => Ok(self.settle(
                mutation,
                MutationKind::ToggleLike,
                id,
                MutationOutcome::Confirmed,
                |t| {
                    if server_liked == liked || t.is_pending(MutationKind::ToggleLike, id, mutation) {
                        return;
                    }
                    tracing::debug!(%id, server_liked, "reconciling like state with the server");
                    tree::map_node(&mut t.comments, id, |n| {
                        if n.is_hearted != server_liked {
                            flip_like(n);
                        }
                    });
                },
            )),
            Err(e) => Ok(self.settle(
                mutation,
                MutationKind::ToggleLike,
                id,
                MutationOutcome::RolledBack(e),
                |t| {
                    tree::map_node(&mut t.comments, id, |n| {
                        flip_like(n);
                    });
                },
            )),
        }
    }

    /// Only the author of a comment may edit it
    pub async fn edit_comment(&self, id: &CommentId, content: &str) -> Result<MutationOutcome, Error> {
        refuse_pending(id)?;
        let content = normalize_content(content)?;
        let (mutation, previous) = self.update(|t| {
            let node = t.owned_node_mut(id)?;
            let previous = std::mem::replace(&mut node.content, content.clone());
            Ok((t.begin(PendingMutation::new(MutationKind::Edit, id.clone())), previous))
        })?;

        match self.gateway.update_comment(id, &content).await {
            Ok(updated) => Ok(self.settle(
                mutation,
                MutationKind::Edit,
                id,
                MutationOutcome::Confirmed,
                |t| {
                    tree::map_node(&mut t.comments, id, |n| n.updated_at = updated.updated_at);
                },
            )),
            Err(e) => Ok(self.settle(
                mutation,
                MutationKind::Edit,
                id,
                MutationOutcome::RolledBack(e),
                |t| {
                    // a later edit of the same comment wins over this rollback
                    tree::map_node(&mut t.comments, id, |n| {
                        if n.content == content {
                            n.content = previous;
                        }
                    });
                },
            )),
        }
    }

    /// Only the author of a comment may delete it, replies go with it
    pub async fn delete_comment(&self, id: &CommentId) -> Result<MutationOutcome, Error> {
        refuse_pending(id)?;
        let (mutation, detached) = self.update(|t| {
            t.owned_node_mut(id)?;
            let detached = tree::remove_node(&mut t.comments, id)
                .ok_or_else(|| Error::UnknownComment(id.clone()))?;
            adjust_count(t, detached.parent.as_ref(), false);
            Ok((t.begin(PendingMutation::new(MutationKind::Delete, id.clone())), detached))
        })?;

        match self.gateway.delete_comment(id).await {
            Ok(()) => Ok(self.settle(
                mutation,
                MutationKind::Delete,
                id,
                MutationOutcome::Confirmed,
                |_| (),
            )),
            Err(e) => Ok(self.settle(
                mutation,
                MutationKind::Delete,
                id,
                MutationOutcome::RolledBack(e),
                |t| restore(t, detached),
            )),
        }
    }

    /// Shows or hides the replies of a comment, locally only
    pub fn toggle_replies(&self, id: &CommentId) -> Result<bool, Error> {
        self.update(|t| {
            let node = t.node_mut(id)?;
            node.is_expanded = !node.is_expanded;
            Ok(node.is_expanded)
        })
    }
}

/// Flips the viewer's like on a node, returning the new state
fn flip_like(node: &mut CommentNode) -> bool {
    node.is_hearted = !node.is_hearted;
    node.like_count = match node.is_hearted {
        true => node.like_count + 1,
        false => node.like_count.saturating_sub(1),
    };
    node.is_hearted
}

fn adjust_count(t: &mut Thread, parent: Option<&CommentId>, increment: bool) {
    let bump = |n: &mut usize| {
        *n = match increment {
            true => *n + 1,
            false => n.saturating_sub(1),
        }
    };
    match parent {
        None => bump(&mut t.total_top_level),
        Some(p) => {
            tree::map_node(&mut t.comments, p, |n| bump(&mut n.reply_count));
        }
    }
}

fn restore(t: &mut Thread, detached: Detached) {
    let id = detached.node.id.clone();
    let parent = detached.parent.clone();
    match tree::restore_node(&mut t.comments, detached) {
        true => adjust_count(t, parent.as_ref(), true),
        false => tracing::warn!(%id, "cannot restore comment whose parent disappeared"),
    }
}

/// Puts back onto a freshly fetched tree what only exists locally: unconfirmed
/// comments, whether still in flight or kept after a failure, and the effect
/// of every pending like, edit and delete
fn reapply_local(t: &mut Thread, previous: &[CommentNode]) {
    let mut top_level = Vec::new();
    for node in tree::pending_nodes(previous) {
        let Some(parent) = node.parent_id.clone() else {
            top_level.push(node);
            continue;
        };
        let id = node.id.clone();
        let kept = tree::map_node(&mut t.comments, &parent, |p| {
            p.replies.push(node);
            p.reply_count += 1;
            p.is_expanded = true;
        });
        if kept.is_none() {
            tracing::debug!(%id, %parent, "dropping unconfirmed reply, its parent is not shown anymore");
        }
    }
    t.total_top_level += top_level.len();
    top_level.append(&mut t.comments);
    t.comments = top_level;

    for m in t.pending.clone() {
        match m.kind {
            MutationKind::Create => (),
            MutationKind::ToggleLike => {
                let Some(local) = tree::find_node(previous, &m.target) else {
                    continue;
                };
                tree::map_node(&mut t.comments, &m.target, |n| {
                    if n.is_hearted != local.is_hearted {
                        flip_like(n);
                    }
                });
            }
            MutationKind::Edit => {
                let Some(local) = tree::find_node(previous, &m.target) else {
                    continue;
                };
                tree::map_node(&mut t.comments, &m.target, |n| n.content = local.content.clone());
            }
            MutationKind::Delete => {
                if let Some(d) = tree::remove_node(&mut t.comments, &m.target) {
                    adjust_count(t, d.parent.as_ref(), false);
                }
            }
        }
    }
}
