use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;

use crate::{
    api::{
        Error, NewReaction, PostId, Reaction, ReactionKind, ReactionSummary, RemoteStore, Select,
        Table, UserId,
    },
    Gateway,
};

/// Counts active reactions per kind, and finds the viewer's own
pub fn summarize_reactions(
    feature: &PostId,
    rows: &[Reaction],
    viewer: Option<&UserId>,
) -> ReactionSummary {
    let mut counts = BTreeMap::new();
    let mut viewer_reaction = None;
    for r in rows.iter().filter(|r| !r.is_deleted && r.feature_id == *feature) {
        *counts.entry(r.reaction_type).or_insert(0) += 1;
        if Some(&r.user_id) == viewer {
            viewer_reaction = Some(r.reaction_type);
        }
    }
    ReactionSummary {
        feature_id: feature.clone(),
        counts,
        viewer_reaction,
    }
}

impl<S: RemoteStore> Gateway<S> {
    pub async fn active_reaction(
        &self,
        feature: &PostId,
        user: &UserId,
    ) -> Result<Option<Reaction>, Error> {
        let mut rows = self
            .select_rows(
                Table::FeatureReactions,
                &Select::active()
                    .eq("feature_id", feature.as_str())
                    .eq("user_id", user.as_str()),
            )
            .await?;
        if rows.len() > 1 {
            tracing::warn!(%feature, %user, num_reactions = rows.len(), "multiple active reactions for the same user");
        }
        Ok(rows.pop())
    }

    /// Reacts to a feature post, changing the kind of the user's existing
    /// reaction if there is one
    pub async fn set_reaction(
        &self,
        feature: &PostId,
        user: &UserId,
        kind: ReactionKind,
    ) -> Result<Reaction, Error> {
        match self.active_reaction(feature, user).await? {
            Some(r) if r.reaction_type == kind => Ok(r),
            Some(r) => {
                self.update_row(
                    Table::FeatureReactions,
                    r.id.as_str(),
                    &json!({ "reaction_type": kind, "updated_at": Utc::now() }),
                )
                .await
            }
            None => {
                self.insert_row(
                    Table::FeatureReactions,
                    &NewReaction {
                        feature_id: feature.clone(),
                        user_id: user.clone(),
                        reaction_type: kind,
                    },
                )
                .await
            }
        }
    }

    /// Returns `false` if the user had no reaction to remove
    pub async fn remove_reaction(&self, feature: &PostId, user: &UserId) -> Result<bool, Error> {
        let Some(r) = self.active_reaction(feature, user).await? else {
            return Ok(false);
        };
        let _: Reaction = self
            .update_row(
                Table::FeatureReactions,
                r.id.as_str(),
                &json!({ "is_deleted": true, "updated_at": Utc::now() }),
            )
            .await?;
        Ok(true)
    }

    pub async fn reaction_summary(
        &self,
        feature: &PostId,
        viewer: Option<&UserId>,
    ) -> Result<ReactionSummary, Error> {
        let rows: Vec<Reaction> = self
            .select_rows(
                Table::FeatureReactions,
                &Select::active().eq("feature_id", feature.as_str()),
            )
            .await?;
        Ok(summarize_reactions(feature, &rows, viewer))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sage_mock_server::MockServer;

    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn one_reaction_per_user() {
        let server = Arc::new(MockServer::new());
        let gw = Gateway::new(server.clone());
        let feature = PostId::from("feature-dark-mode");
        let ann = seed_profile(&server, "Ann");
        let bo = seed_profile(&server, "Bo");

        let first = gw.set_reaction(&feature, &ann, ReactionKind::Fire).await.unwrap();
        let same = gw.set_reaction(&feature, &ann, ReactionKind::Fire).await.unwrap();
        assert_eq!(first, same);
        let changed = gw.set_reaction(&feature, &ann, ReactionKind::Heart).await.unwrap();
        assert_eq!(changed.id, first.id, "changing kind updates the row");
        assert_eq!(server.test_rows(Table::FeatureReactions).len(), 1);

        gw.set_reaction(&feature, &bo, ReactionKind::Heart).await.unwrap();
        gw.set_reaction(&PostId::from("other"), &bo, ReactionKind::Laugh).await.unwrap();
        let summary = gw.reaction_summary(&feature, Some(&ann)).await.unwrap();
        assert_eq!(summary.count(ReactionKind::Heart), 2);
        assert_eq!(summary.count(ReactionKind::Fire), 0);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.viewer_reaction, Some(ReactionKind::Heart));

        assert!(gw.remove_reaction(&feature, &ann).await.unwrap());
        assert!(!gw.remove_reaction(&feature, &ann).await.unwrap());
        let summary = gw.reaction_summary(&feature, Some(&ann)).await.unwrap();
        assert_eq!(summary.total(), 1);
        assert_eq!(summary.viewer_reaction, None);

        // reacting again after removal starts a fresh row
        gw.set_reaction(&feature, &ann, ReactionKind::Thinking).await.unwrap();
        assert_eq!(server.test_rows(Table::FeatureReactions).len(), 4);
    }

    #[test]
    fn summary_ignores_deleted_and_foreign_rows() {
        let feature = PostId::from("f");
        let viewer = UserId::from("v");
        let row = |user: &str, feature: &str, kind, is_deleted| Reaction {
            id: crate::api::ReactionId::new(format!("{user}-{feature}")),
            feature_id: PostId::from(feature),
            user_id: UserId::from(user),
            reaction_type: kind,
            is_deleted,
            created_at: at(0),
            updated_at: at(0),
        };
        let rows = vec![
            row("v", "f", ReactionKind::MindBlown, true),
            row("a", "f", ReactionKind::MindBlown, false),
            row("v", "g", ReactionKind::Laugh, false),
        ];
        let summary = summarize_reactions(&feature, &rows, Some(&viewer));
        assert_eq!(summary.counts, BTreeMap::from([(ReactionKind::MindBlown, 1)]));
        assert_eq!(summary.viewer_reaction, None);
    }
}
