use std::collections::{HashMap, HashSet};

use crate::{
    api::{CommentId, Error, Like, LikeStats, RemoteStore, Select, Table, UserId},
    Gateway,
};

/// Groups like rows per comment.
///
/// Returns exactly one entry per distinct id of `ids`, in order of first
/// appearance, zero-filled for comments nobody liked. Soft-deleted rows and
/// rows about other comments are ignored.
pub fn aggregate_likes(ids: &[CommentId], rows: &[Like], viewer: Option<&UserId>) -> Vec<LikeStats> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut res = ids
        .iter()
        .filter(|id| seen.insert(*id))
        .map(|id| LikeStats::zero(id.clone()))
        .collect::<Vec<_>>();
    let index = res
        .iter()
        .enumerate()
        .map(|(i, s)| (s.comment_id.clone(), i))
        .collect::<HashMap<_, _>>();
    for like in rows.iter().filter(|l| !l.is_deleted) {
        if let Some(&i) = index.get(&like.comment_id) {
            res[i].like_count += 1;
            if Some(&like.user_id) == viewer {
                res[i].viewer_liked = true;
            }
        }
    }
    res
}

impl<S: RemoteStore> Gateway<S> {
    /// Like counts and viewer state for many comments, in a single query
    pub async fn like_stats(
        &self,
        ids: &[CommentId],
        viewer: Option<&UserId>,
    ) -> Result<Vec<LikeStats>, Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Like> = self
            .select_rows(
                Table::CommentLikes,
                &Select::active().is_in("comment_id", ids.iter().map(|id| id.as_str())),
            )
            .await?;
        Ok(aggregate_likes(ids, &rows, viewer))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sage_mock_server::MockServer;

    use super::*;
    use crate::{
        api::{LikeId, PostId},
        test_utils::*,
    };

    fn like(i: usize, comment: &CommentId, user: &UserId, is_deleted: bool) -> Like {
        Like {
            id: LikeId::new(format!("like-{i}")),
            comment_id: comment.clone(),
            user_id: user.clone(),
            is_deleted,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn one_entry_per_id_zero_filled() {
        bolero::check!()
            .with_type::<(u8, Vec<(u8, u8, bool)>, Option<u8>)>()
            .cloned()
            .for_each(|(num_ids, likes, viewer)| {
                let num_ids = num_ids % 16;
                let ids = (0..num_ids)
                    .map(|i| CommentId::new(format!("c{i}")))
                    .collect::<Vec<_>>();
                let viewer = viewer.map(|v| UserId::new(format!("u{}", v % 4)));
                let rows = likes
                    .iter()
                    .enumerate()
                    .map(|(i, (c, u, del))| {
                        like(
                            i,
                            &CommentId::new(format!("c{}", c % 20)),
                            &UserId::new(format!("u{}", u % 4)),
                            *del,
                        )
                    })
                    .collect::<Vec<_>>();

                let stats = aggregate_likes(&ids, &rows, viewer.as_ref());
                assert_eq!(stats.len(), ids.len());
                for (s, id) in stats.iter().zip(ids.iter()) {
                    assert_eq!(&s.comment_id, id);
                    let active = rows
                        .iter()
                        .filter(|l| !l.is_deleted && l.comment_id == *id)
                        .collect::<Vec<_>>();
                    assert_eq!(s.like_count, active.len());
                    assert_eq!(
                        s.viewer_liked,
                        active.iter().any(|l| Some(&l.user_id) == viewer.as_ref())
                    );
                }
            });
    }

    #[test]
    fn duplicate_ids_reported_once() {
        let a = CommentId::from("a");
        let b = CommentId::from("b");
        let u = UserId::from("u");
        let rows = vec![like(0, &a, &u, false), like(1, &b, &u, true)];
        let stats = aggregate_likes(&[b.clone(), a.clone(), b.clone()], &rows, Some(&u));
        assert_eq!(
            stats,
            vec![
                LikeStats::zero(b),
                LikeStats {
                    comment_id: a,
                    like_count: 1,
                    viewer_liked: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn single_query_and_empty_short_circuit() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let post = PostId::from("p");
        let alice = seed_profile(&server, "Alice");
        let bob = seed_profile(&server, "Bob");
        let c1 = seed_comment(&server, &post, None, &alice, "one", 1);
        let c2 = seed_comment(&server, &post, None, &alice, "two", 2);
        let c3 = seed_comment(&server, &post, None, &alice, "three", 3);
        seed_like(&server, &c1, &alice);
        seed_like(&server, &c1, &bob);
        seed_like(&server, &c3, &bob);

        assert!(gw.like_stats(&[], Some(&alice)).await.unwrap().is_empty());
        assert_eq!(server.test_select_count(Table::CommentLikes), 0);

        let stats = gw
            .like_stats(&[c1.clone(), c2.clone(), c3.clone()], Some(&alice))
            .await
            .unwrap();
        assert_eq!(server.test_select_count(Table::CommentLikes), 1);
        assert_eq!(
            stats
                .iter()
                .map(|s| (s.like_count, s.viewer_liked))
                .collect::<Vec<_>>(),
            vec![(2, true), (0, false), (1, false)]
        );
    }
}
