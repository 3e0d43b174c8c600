//! Nested comment trees and the recursive walks every mutation goes through.

use std::{cmp::Reverse, collections::HashMap};

use crate::api::{
    Comment, CommentId, LikeStats, Page, PostId, Time, UserId, UserProfile, ANONYMOUS_NAME,
};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Author {
    /// Falls back to an anonymous author when the profile is missing
    pub fn resolve(id: &UserId, profile: Option<&UserProfile>) -> Author {
        match profile {
            Some(p) => Author {
                id: id.clone(),
                display_name: String::from(p.display_name()),
                avatar_url: p.avatar_url.clone(),
            },
            None => Author {
                id: id.clone(),
                display_name: String::from(ANONYMOUS_NAME),
                avatar_url: None,
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub author: Author,
    pub content: String,
    pub created_at: Time,
    pub updated_at: Time,

    pub like_count: usize,

    /// Whether the viewer likes this comment
    pub is_hearted: bool,

    /// Number of direct children, known even when `replies` was not fetched
    pub reply_count: usize,
    pub is_expanded: bool,

    /// Oldest first
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    fn from_row(c: Comment, profiles: &HashMap<UserId, UserProfile>) -> CommentNode {
        CommentNode {
            author: Author::resolve(&c.user_id, profiles.get(&c.user_id)),
            id: c.id,
            post_id: c.post_id,
            parent_id: c.parent_id,
            content: c.content,
            created_at: c.created_at,
            updated_at: c.updated_at,
            like_count: 0,
            is_hearted: false,
            reply_count: 0,
            is_expanded: false,
            replies: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.author.id == *user
    }

    /// Whether the server has not acknowledged this comment yet
    pub fn is_pending(&self) -> bool {
        self.id.is_temporary()
    }

    /// Total number of nodes in this subtree, self included
    pub fn subtree_size(&self) -> usize {
        1 + self.replies.iter().map(|r| r.subtree_size()).sum::<usize>()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentPage {
    pub comments: Vec<CommentNode>,

    /// Number of top-level comments of the post, across all pages
    pub total_top_level: usize,

    pub next_page: Option<Page>,
}

/// Position in the top-level list, just after a given comment.
///
/// Unlike an offset, it stays put when earlier comments are deleted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cursor {
    pub created_at: Time,
    pub id: CommentId,
}

impl Cursor {
    pub fn after(node: &CommentNode) -> Cursor {
        Cursor {
            created_at: node.created_at,
            id: node.id.clone(),
        }
    }
}

// newest first, ties broken by id
fn top_level_key(created_at: Time, id: &CommentId) -> (Reverse<Time>, CommentId) {
    (Reverse(created_at), id.clone())
}

/// Builds the comment forest of a post from its flat rows.
///
/// Only the top-level list is paginated, newest first; every descendant of a
/// comment on the page is included, oldest first. Rows whose parent is not
/// an active comment of the same post are dropped, along with their
/// descendants.
pub fn assemble(
    rows: Vec<Comment>,
    profiles: &HashMap<UserId, UserProfile>,
    likes: &HashMap<CommentId, LikeStats>,
    include_replies: bool,
    page: Page,
) -> CommentPage {
    assemble_from(rows, profiles, likes, include_replies, |_| page.offset, page.limit)
}

/// `assemble`, for the `limit` top-level comments that come after `cursor`
pub fn assemble_after(
    rows: Vec<Comment>,
    profiles: &HashMap<UserId, UserProfile>,
    likes: &HashMap<CommentId, LikeStats>,
    include_replies: bool,
    cursor: &Cursor,
    limit: usize,
) -> CommentPage {
    let cursor = top_level_key(cursor.created_at, &cursor.id);
    assemble_from(
        rows,
        profiles,
        likes,
        include_replies,
        |top_level| top_level.partition_point(|c| top_level_key(c.created_at, &c.id) <= cursor),
        limit,
    )
}

fn assemble_from(
    rows: Vec<Comment>,
    profiles: &HashMap<UserId, UserProfile>,
    likes: &HashMap<CommentId, LikeStats>,
    include_replies: bool,
    offset: impl FnOnce(&[Comment]) -> usize,
    limit: usize,
) -> CommentPage {
    let rows = rows.into_iter().filter(|c| !c.is_deleted).collect::<Vec<_>>();
    let posts = rows
        .iter()
        .map(|c| (c.id.clone(), c.post_id.clone()))
        .collect::<HashMap<_, _>>();

    let mut top_level = Vec::new();
    let mut children: HashMap<CommentId, Vec<Comment>> = HashMap::new();
    for c in rows {
        match c.parent_id.clone() {
            None => top_level.push(c),
            Some(p) if posts.get(&p) == Some(&c.post_id) => children.entry(p).or_default().push(c),
            Some(p) => {
                tracing::warn!(comment = %c.id, parent = %p, "dropping reply without a parent in the same post")
            }
        }
    }
    top_level.sort_by_key(|c| top_level_key(c.created_at, &c.id));
    for siblings in children.values_mut() {
        siblings.sort_by_key(|c| (c.created_at, c.id.clone()));
    }

    let page = Page {
        offset: offset(&top_level),
        limit,
    };
    let total_top_level = top_level.len();
    let mut comments = top_level
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .map(|c| build_node(c, &mut children, profiles, include_replies))
        .collect::<Vec<_>>();
    let next_page = (page.offset.saturating_add(page.limit) < total_top_level).then(|| page.next());

    apply_like_stats(&mut comments, likes);
    CommentPage {
        comments,
        total_top_level,
        next_page,
    }
}

fn build_node(
    c: Comment,
    children: &mut HashMap<CommentId, Vec<Comment>>,
    profiles: &HashMap<UserId, UserProfile>,
    include_replies: bool,
) -> CommentNode {
    let kids = children.remove(&c.id).unwrap_or_default();
    let mut node = CommentNode::from_row(c, profiles);
    node.reply_count = kids.len();
    if include_replies {
        node.replies = kids
            .into_iter()
            .map(|k| build_node(k, children, profiles, include_replies))
            .collect();
    }
    node
}

/// Sets like counts and viewer state on every node that has stats
pub fn apply_like_stats(nodes: &mut [CommentNode], likes: &HashMap<CommentId, LikeStats>) {
    for n in nodes.iter_mut() {
        if let Some(s) = likes.get(&n.id) {
            n.like_count = s.like_count;
            n.is_hearted = s.viewer_liked;
        }
        apply_like_stats(&mut n.replies, likes);
    }
}

/// Ids of every node, depth-first
pub fn collect_ids(nodes: &[CommentNode]) -> Vec<CommentId> {
    let mut res = Vec::new();
    fn walk(nodes: &[CommentNode], res: &mut Vec<CommentId>) {
        for n in nodes {
            res.push(n.id.clone());
            walk(&n.replies, res);
        }
    }
    walk(nodes, &mut res);
    res
}

/// Copies of the nodes the server has not acknowledged yet, depth-first
pub fn pending_nodes(nodes: &[CommentNode]) -> Vec<CommentNode> {
    let mut res = Vec::new();
    fn walk(nodes: &[CommentNode], res: &mut Vec<CommentNode>) {
        for n in nodes {
            match n.is_pending() {
                true => res.push(n.clone()),
                false => walk(&n.replies, res),
            }
        }
    }
    walk(nodes, &mut res);
    res
}

pub fn find_node<'a>(nodes: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    for n in nodes {
        if n.id == *id {
            return Some(n);
        }
        if let Some(res) = find_node(&n.replies, id) {
            return Some(res);
        }
    }
    None
}

/// First node matching `pred`, at any depth
pub fn find_node_mut<'a, P>(nodes: &'a mut [CommentNode], pred: &P) -> Option<&'a mut CommentNode>
where
    P: Fn(&CommentNode) -> bool,
{
    for n in nodes.iter_mut() {
        if pred(n) {
            return Some(n);
        }
        if let Some(res) = find_node_mut(&mut n.replies, pred) {
            return Some(res);
        }
    }
    None
}

/// Applies `transform` to the first node matching `pred`, at any depth.
///
/// Returns `None` if no node matched.
pub fn map_tree<P, F, R>(nodes: &mut [CommentNode], pred: P, transform: F) -> Option<R>
where
    P: Fn(&CommentNode) -> bool,
    F: FnOnce(&mut CommentNode) -> R,
{
    find_node_mut(nodes, &pred).map(transform)
}

/// Applies `transform` to the node with id `id`
pub fn map_node<F, R>(nodes: &mut [CommentNode], id: &CommentId, transform: F) -> Option<R>
where
    F: FnOnce(&mut CommentNode) -> R,
{
    map_tree(nodes, |n| n.id == *id, transform)
}

/// A node taken out of a tree, with what is needed to put it back
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Detached {
    pub node: CommentNode,
    pub parent: Option<CommentId>,
    pub index: usize,
}

/// Removes the node with id `id` and its whole subtree.
///
/// Does not touch the parent's `reply_count`.
pub fn remove_node(nodes: &mut Vec<CommentNode>, id: &CommentId) -> Option<Detached> {
    fn walk(
        nodes: &mut Vec<CommentNode>,
        parent: Option<&CommentId>,
        id: &CommentId,
    ) -> Option<Detached> {
        if let Some(index) = nodes.iter().position(|n| n.id == *id) {
            return Some(Detached {
                node: nodes.remove(index),
                parent: parent.cloned(),
                index,
            });
        }
        for n in nodes.iter_mut() {
            if let Some(res) = walk(&mut n.replies, Some(&n.id), id) {
                return Some(res);
            }
        }
        None
    }
    walk(nodes, None, id)
}

/// Puts back a node removed by `remove_node`, at its former position if it
/// still exists. Returns `false` if the parent is gone.
pub fn restore_node(nodes: &mut Vec<CommentNode>, detached: Detached) -> bool {
    let Detached {
        node,
        parent,
        index,
    } = detached;
    let siblings = match &parent {
        None => nodes,
        Some(p) => match find_node_mut(nodes, &|n: &CommentNode| n.id == *p) {
            Some(parent) => &mut parent.replies,
            None => return false,
        },
    };
    let index = index.min(siblings.len());
    siblings.insert(index, node);
    true
}
