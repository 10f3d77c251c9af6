//! # Counters
//!
//! View and like counts per entity.
//!
//! ## Views
//! A sorted set, member = article id, score = views. Only ever incremented, so concurrent views
//! commute and need no coordination.
//!
//! ## Likes
//! A hash per [LikeKind], field = entity id, value = likes. The value follows the per-user
//! membership sets held by [ToggleSet].
//!
//! Toggling is a membership check followed by a membership change and a counter change, three
//! separate atomic calls. Two concurrent toggles by the same user on the same entity can both
//! observe the same membership and drift the counter away from the true number of members. For a
//! social counter this is accepted. A decrement that lands below zero is repaired back to zero.
use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tracing::warn;

use crate::{
    keys::{ARTICLE_VIEWS_COUNT, LikeKind},
    store::{KeyValueStore, StoreError},
    toggle::ToggleSet,
    utils::{EntityId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub liked: bool,
    pub like_count: i64,
}

/// Liked entity ids of one user, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserLikes {
    pub articles: Vec<EntityId>,
    pub comments: Vec<EntityId>,
    pub talks: Vec<EntityId>,
}

#[derive(Clone)]
pub struct CounterService {
    store: Arc<dyn KeyValueStore>,
}

impl CounterService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn toggles(&self, kind: LikeKind) -> ToggleSet {
        ToggleSet::new(self.store.clone(), kind)
    }

    pub async fn increment_views(&self, id: EntityId) -> Result<u64, StoreError> {
        let score = self
            .store
            .zincr(ARTICLE_VIEWS_COUNT, &id.to_string(), 1.0)
            .await?;

        Ok(score_to_count(score))
    }

    pub async fn view_count(&self, id: EntityId) -> Result<u64, StoreError> {
        let score = self
            .store
            .zscore(ARTICLE_VIEWS_COUNT, &id.to_string())
            .await?;

        Ok(score.map(score_to_count).unwrap_or(0))
    }

    /// At most `n` articles by descending views, ties broken by ascending id.
    pub async fn top_by_views(&self, n: usize) -> Result<Vec<(EntityId, u64)>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut ranked = self
            .store
            .zrevrange_withscores(ARTICLE_VIEWS_COUNT, 0, n - 1)
            .await?;

        // the store cuts ties by member; pull in every tie at the boundary and cut by id instead
        if let Some(&(_, floor)) = ranked.get(n - 1) {
            ranked = self
                .store
                .zrevrangebyscore_withscores(ARTICLE_VIEWS_COUNT, floor)
                .await?;
        }

        let mut top: Vec<(EntityId, u64)> = ranked
            .into_iter()
            .filter_map(|(member, score)| match member.parse::<EntityId>() {
                Ok(id) => Some((id, score_to_count(score))),
                Err(_) => {
                    warn!("Skipping malformed member {member:?} in {ARTICLE_VIEWS_COUNT}");
                    None
                }
            })
            .collect();

        sort_by_views(&mut top, |entry| *entry);
        top.truncate(n);

        Ok(top)
    }

    pub async fn like_count(&self, kind: LikeKind, id: EntityId) -> Result<i64, StoreError> {
        let count = self
            .store
            .hget(kind.count_key(), &id.to_string())
            .await?;

        Ok(count.unwrap_or(0).max(0))
    }

    pub async fn like_counts(&self, kind: LikeKind) -> Result<HashMap<EntityId, i64>, StoreError> {
        let raw = self.store.hgetall(kind.count_key()).await?;

        Ok(raw
            .into_iter()
            .filter_map(|(field, count)| Some((field.parse().ok()?, count.max(0))))
            .collect())
    }

    /// Flip the user's like on `id` and move the counter with it.
    pub async fn toggle_like(
        &self,
        kind: LikeKind,
        user: &UserId,
        id: EntityId,
    ) -> Result<LikeOutcome, StoreError> {
        let toggles = self.toggles(kind);
        let field = id.to_string();

        if !toggles.is_member(user, id).await? {
            toggles.add(user, id).await?;
            let like_count = self.store.hincr(kind.count_key(), &field, 1).await?;

            Ok(LikeOutcome {
                liked: true,
                like_count,
            })
        } else {
            toggles.remove(user, id).await?;
            let mut like_count = self.store.hdecr(kind.count_key(), &field, 1).await?;

            if like_count < 0 {
                warn!("{kind} {id} like count drifted to {like_count}, repairing");
                like_count = self
                    .store
                    .hincr(kind.count_key(), &field, -like_count)
                    .await?
                    .max(0);
            }

            Ok(LikeOutcome {
                liked: false,
                like_count,
            })
        }
    }

    pub async fn liked_by(&self, user: &UserId) -> Result<UserLikes, StoreError> {
        let mut likes = UserLikes::default();

        for kind in LikeKind::ALL {
            let mut ids: Vec<EntityId> = self
                .toggles(kind)
                .members(user)
                .await?
                .into_iter()
                .collect();
            ids.sort();

            match kind {
                LikeKind::Article => likes.articles = ids,
                LikeKind::Comment => likes.comments = ids,
                LikeKind::Talk => likes.talks = ids,
            }
        }

        Ok(likes)
    }
}

/// Scores are whole numbers stored as floats.
fn score_to_count(score: f64) -> u64 {
    if score.is_finite() && score > 0.0 {
        score.round() as u64
    } else {
        0
    }
}

/// The single ranking order: views descending, then id ascending.
pub fn sort_by_views<T>(items: &mut [T], key: impl Fn(&T) -> (EntityId, u64)) {
    items.sort_by(|a, b| {
        let (a_id, a_views) = key(a);
        let (b_id, b_views) = key(b);

        b_views.cmp(&a_views).then(a_id.cmp(&b_id))
    });
}
