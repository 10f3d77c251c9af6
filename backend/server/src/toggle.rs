use std::{collections::HashSet, sync::Arc};

use crate::{
    keys::LikeKind,
    store::{KeyValueStore, StoreError},
    utils::{EntityId, UserId},
};

/// Per-user membership of liked entities, one set per user and [LikeKind].
///
/// Membership is the only record of whether a like is active; the like counters follow it.
#[derive(Clone)]
pub struct ToggleSet {
    store: Arc<dyn KeyValueStore>,
    kind: LikeKind,
}

impl ToggleSet {
    pub fn new(store: Arc<dyn KeyValueStore>, kind: LikeKind) -> Self {
        Self { store, kind }
    }

    pub async fn is_member(&self, user: &UserId, id: EntityId) -> Result<bool, StoreError> {
        self.store
            .sismember(&self.kind.membership_key(user), &id.to_string())
            .await
    }

    /// True if the membership was newly added.
    pub async fn add(&self, user: &UserId, id: EntityId) -> Result<bool, StoreError> {
        self.store
            .sadd(&self.kind.membership_key(user), &id.to_string())
            .await
    }

    /// True if the membership existed.
    pub async fn remove(&self, user: &UserId, id: EntityId) -> Result<bool, StoreError> {
        self.store
            .srem(&self.kind.membership_key(user), &id.to_string())
            .await
    }

    pub async fn cardinality(&self, user: &UserId) -> Result<u64, StoreError> {
        self.store.scard(&self.kind.membership_key(user)).await
    }

    /// Entities the user currently likes. Members that do not parse as ids are skipped.
    pub async fn members(&self, user: &UserId) -> Result<HashSet<EntityId>, StoreError> {
        let raw = self.store.smembers(&self.kind.membership_key(user)).await?;

        Ok(raw.iter().filter_map(|member| member.parse().ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn toggles(kind: LikeKind) -> (Arc<MemoryStore>, ToggleSet) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), ToggleSet::new(store, kind))
    }

    #[tokio::test]
    async fn test_add_remove() {
        let (_, set) = toggles(LikeKind::Article);
        let user = UserId::new("u1").unwrap();
        let id = EntityId::new(42).unwrap();

        assert!(!set.is_member(&user, id).await.unwrap());
        assert!(set.add(&user, id).await.unwrap());
        assert!(!set.add(&user, id).await.unwrap());
        assert!(set.is_member(&user, id).await.unwrap());
        assert_eq!(set.cardinality(&user).await.unwrap(), 1);

        assert!(set.remove(&user, id).await.unwrap());
        assert!(!set.remove(&user, id).await.unwrap());
        assert_eq!(set.cardinality(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kinds_and_users_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let articles = ToggleSet::new(store.clone(), LikeKind::Article);
        let talks = ToggleSet::new(store, LikeKind::Talk);
        let u1 = UserId::new("u1").unwrap();
        let u2 = UserId::new("u2").unwrap();
        let id = EntityId::new(3).unwrap();

        articles.add(&u1, id).await.unwrap();

        assert!(!talks.is_member(&u1, id).await.unwrap());
        assert!(!articles.is_member(&u2, id).await.unwrap());
        assert_eq!(
            articles.members(&u1).await.unwrap(),
            HashSet::from([id])
        );
    }

    #[tokio::test]
    async fn test_offline_store_propagates() {
        let (store, set) = toggles(LikeKind::Comment);
        store.set_offline(true);

        let result = set
            .is_member(&UserId::new("u1").unwrap(), EntityId::new(1).unwrap())
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
