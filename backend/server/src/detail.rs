//! # Article Detail
//!
//! Builds the article page in one call.
//!
//! ## Flow
//! 1. Look the article up; missing or hidden is [AppError::NotFound].
//! 2. Spawn the three supplementary sections, each under its own timeout:
//!    - recommended: related articles from the catalog
//!    - newest: latest visible articles from the catalog
//!    - hot: top articles by views from the counters, resolved through the catalog
//! 3. Meanwhile resolve previous / next links and count the view.
//! 4. Join the sections. A failed or late section is left empty and named in `degraded`; the
//!    page itself still succeeds.
//! 5. Read view and like counts. These are user-visible, so a store failure here fails the call.
use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{task::JoinHandle, time::timeout};
use tracing::warn;

use crate::{
    catalog::{Article, ArticleCard, ArticleCatalog, ArticleLink},
    counter::{CounterService, sort_by_views},
    error::AppError,
    keys::LikeKind,
    utils::EntityId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Recommended,
    Newest,
    Hot,
    Previous,
    Next,
}

impl Section {
    fn name(self) -> &'static str {
        match self {
            Section::Recommended => "recommended",
            Section::Newest => "newest",
            Section::Hot => "hot",
            Section::Previous => "previous",
            Section::Next => "next",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDetail {
    pub article: Article,
    pub views_count: u64,
    pub like_count: i64,
    pub recommended: Vec<ArticleCard>,
    pub newest: Vec<ArticleCard>,
    pub hot: Vec<ArticleCard>,
    pub previous: Option<ArticleLink>,
    pub next: Option<ArticleLink>,
    /// Sections left empty because their lookup failed or timed out.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Section>,
}

#[derive(Debug, Clone, Copy)]
pub struct DetailLimits {
    pub branch_timeout: Duration,
    pub recommended: usize,
    pub newest: usize,
    pub hot: usize,
}

impl Default for DetailLimits {
    fn default() -> Self {
        Self {
            branch_timeout: Duration::from_millis(500),
            recommended: 6,
            newest: 5,
            hot: 5,
        }
    }
}

#[derive(Clone)]
pub struct DetailAggregator {
    catalog: Arc<dyn ArticleCatalog>,
    counters: CounterService,
    limits: DetailLimits,
}

impl DetailAggregator {
    pub fn new(
        catalog: Arc<dyn ArticleCatalog>,
        counters: CounterService,
        limits: DetailLimits,
    ) -> Self {
        Self {
            catalog,
            counters,
            limits,
        }
    }

    pub async fn article_detail(&self, id: EntityId) -> Result<AggregatedDetail, AppError> {
        let article = self
            .catalog
            .article(id)
            .await?
            .filter(Article::is_visible)
            .ok_or(AppError::NotFound)?;

        let recommended = {
            let catalog = self.catalog.clone();
            let limit = self.limits.recommended;
            self.spawn_branch(async move { catalog.recommended(id, limit).await })
        };
        let newest = {
            let catalog = self.catalog.clone();
            let limit = self.limits.newest;
            self.spawn_branch(async move { catalog.newest(limit).await })
        };
        let hot = {
            let catalog = self.catalog.clone();
            let counters = self.counters.clone();
            let limit = self.limits.hot;
            self.spawn_branch(async move {
                hot_articles(catalog.as_ref(), &counters, limit).await
            })
        };

        let limit = self.limits.branch_timeout;
        let (previous, next) = tokio::join!(
            within(limit, self.catalog.previous(id)),
            within(limit, self.catalog.next(id)),
        );

        if let Err(e) = self.counters.increment_views(id).await {
            warn!("Failed to count view of article {id}: {e}");
        }

        let (recommended, newest, hot) = tokio::join!(recommended, newest, hot);

        let mut degraded = Vec::new();
        let recommended =
            settle(Section::Recommended, recommended, &mut degraded).unwrap_or_default();
        let newest = settle(Section::Newest, newest, &mut degraded).unwrap_or_default();
        let hot = settle(Section::Hot, hot, &mut degraded).unwrap_or_default();
        let previous = settle(Section::Previous, Ok(previous), &mut degraded).flatten();
        let next = settle(Section::Next, Ok(next), &mut degraded).flatten();

        let (views_count, like_count) = tokio::try_join!(
            self.counters.view_count(id),
            self.counters.like_count(LikeKind::Article, id),
        )?;

        Ok(AggregatedDetail {
            article,
            views_count,
            like_count,
            recommended,
            newest,
            hot,
            previous,
            next,
            degraded,
        })
    }

    fn spawn_branch<T, F>(&self, branch: F) -> JoinHandle<Result<T, BranchFailure>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        tokio::spawn(within(self.limits.branch_timeout, branch))
    }
}

#[derive(Debug)]
enum BranchFailure {
    Failed(String),
    TimedOut(Duration),
}

async fn within<T>(
    limit: Duration,
    branch: impl Future<Output = Result<T, AppError>>,
) -> Result<T, BranchFailure> {
    match timeout(limit, branch).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BranchFailure::Failed(e.to_string())),
        Err(_) => Err(BranchFailure::TimedOut(limit)),
    }
}

/// Unwrap one section, recording and logging a failure instead of propagating it.
fn settle<T>(
    section: Section,
    joined: Result<Result<T, BranchFailure>, tokio::task::JoinError>,
    degraded: &mut Vec<Section>,
) -> Option<T> {
    let reason = match joined {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(BranchFailure::Failed(reason))) => reason,
        Ok(Err(BranchFailure::TimedOut(limit))) => format!("timed out after {limit:?}"),
        Err(e) => format!("task aborted: {e}"),
    };

    let failure = AppError::PartialAggregation {
        section: section.name(),
        reason,
    };
    warn!("{failure}");
    degraded.push(section);

    None
}

/// Most viewed visible articles, ranked by views then id.
pub async fn hot_articles(
    catalog: &dyn ArticleCatalog,
    counters: &CounterService,
    limit: usize,
) -> Result<Vec<ArticleCard>, AppError> {
    let top = counters.top_by_views(limit).await?;
    if top.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<EntityId> = top.iter().map(|(id, _)| *id).collect();
    let mut cards = catalog.cards(&ids).await?;

    for card in cards.iter_mut() {
        card.views_count = top
            .iter()
            .find(|(id, _)| *id == card.id)
            .map(|(_, views)| *views);
    }
    sort_by_views(&mut cards, |card| (card.id, card.views_count.unwrap_or(0)));

    Ok(cards)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        catalog::{Catalog, testing::sample},
        store::{KeyValueStore, StoreError, memory::MemoryStore},
        utils::UserId,
    };

    fn id(raw: i64) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn ids(cards: &[ArticleCard]) -> Vec<i64> {
        cards.iter().map(|card| card.id.get()).collect()
    }

    #[derive(Debug, thiserror::Error)]
    #[error("network partition")]
    struct Partition;

    /// Wraps a catalog; recommendations fail or stall on demand.
    struct FlakyCatalog {
        inner: Catalog,
        fail_recommended: AtomicBool,
        stall_newest: AtomicBool,
    }

    impl FlakyCatalog {
        fn new() -> Self {
            Self {
                inner: sample(),
                fail_recommended: AtomicBool::new(false),
                stall_newest: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ArticleCatalog for FlakyCatalog {
        async fn article(&self, id: EntityId) -> Result<Option<Article>, AppError> {
            self.inner.article(id).await
        }

        async fn recommended(
            &self,
            id: EntityId,
            limit: usize,
        ) -> Result<Vec<ArticleCard>, AppError> {
            if self.fail_recommended.load(Ordering::SeqCst) {
                return Err(AppError::Catalog(Box::new(Partition)));
            }
            self.inner.recommended(id, limit).await
        }

        async fn newest(&self, limit: usize) -> Result<Vec<ArticleCard>, AppError> {
            if self.stall_newest.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.newest(limit).await
        }

        async fn cards(&self, ids: &[EntityId]) -> Result<Vec<ArticleCard>, AppError> {
            self.inner.cards(ids).await
        }

        async fn previous(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError> {
            self.inner.previous(id).await
        }

        async fn next(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError> {
            self.inner.next(id).await
        }
    }

    fn aggregator(catalog: Arc<FlakyCatalog>) -> (Arc<MemoryStore>, DetailAggregator) {
        let store = Arc::new(MemoryStore::new());
        let limits = DetailLimits {
            branch_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let aggregator = DetailAggregator::new(catalog, CounterService::new(store.clone()), limits);

        (store, aggregator)
    }

    #[tokio::test]
    async fn test_full_detail() {
        let (_, aggregator) = aggregator(Arc::new(FlakyCatalog::new()));
        let counters = aggregator.counters.clone();

        for _ in 0..3 {
            counters.increment_views(id(8)).await.unwrap();
        }
        counters.increment_views(id(6)).await.unwrap();
        counters
            .toggle_like(LikeKind::Article, &UserId::new("u1").unwrap(), id(4))
            .await
            .unwrap();

        let detail = aggregator.article_detail(id(4)).await.unwrap();

        assert_eq!(detail.article.id, id(4));
        assert_eq!(detail.views_count, 1);
        assert_eq!(detail.like_count, 1);
        assert_eq!(ids(&detail.recommended), vec![8, 2]);
        assert_eq!(ids(&detail.newest), vec![8, 7, 5, 4, 2]);
        // 6 is deleted; 4 was counted before the ranking was read or after, either way it trails 8
        assert_eq!(detail.hot.first().map(|card| card.id), Some(id(8)));
        assert_eq!(detail.hot[0].views_count, Some(3));
        assert!(!ids(&detail.hot).contains(&6));
        assert_eq!(detail.previous.unwrap().id, id(2));
        assert_eq!(detail.next.unwrap().id, id(5));
        assert!(detail.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_each_fetch_counts_a_view() {
        let (_, aggregator) = aggregator(Arc::new(FlakyCatalog::new()));

        for expected in 1..=3 {
            let detail = aggregator.article_detail(id(2)).await.unwrap();
            assert_eq!(detail.views_count, expected);
        }
    }

    #[tokio::test]
    async fn test_missing_or_hidden_article() {
        let (store, aggregator) = aggregator(Arc::new(FlakyCatalog::new()));

        assert!(matches!(
            aggregator.article_detail(id(99)).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            aggregator.article_detail(id(3)).await,
            Err(AppError::NotFound)
        ));
        assert_eq!(
            store.zscore("article_views_count", "3").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_recommended_partition_is_tolerated() {
        let catalog = Arc::new(FlakyCatalog::new());
        catalog.fail_recommended.store(true, Ordering::SeqCst);
        let (_, aggregator) = aggregator(catalog);
        aggregator.counters.increment_views(id(7)).await.unwrap();

        let detail = aggregator.article_detail(id(4)).await.unwrap();

        assert!(detail.recommended.is_empty());
        assert_eq!(ids(&detail.newest), vec![8, 7, 5, 4, 2]);
        assert!(!detail.hot.is_empty());
        assert_eq!(detail.views_count, 1);
        assert_eq!(detail.degraded, vec![Section::Recommended]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_section_times_out() {
        let catalog = Arc::new(FlakyCatalog::new());
        catalog.stall_newest.store(true, Ordering::SeqCst);
        let (_, aggregator) = aggregator(catalog);

        let detail = aggregator.article_detail(id(4)).await.unwrap();

        assert!(detail.newest.is_empty());
        assert_eq!(ids(&detail.recommended), vec![8, 2]);
        assert_eq!(detail.degraded, vec![Section::Newest]);
    }

    #[tokio::test]
    async fn test_store_outage_fails_counts() {
        let (store, aggregator) = aggregator(Arc::new(FlakyCatalog::new()));
        store.set_offline(true);

        assert!(matches!(
            aggregator.article_detail(id(4)).await,
            Err(AppError::StoreUnavailable(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_hot_ranking_ties() {
        let (_, aggregator) = aggregator(Arc::new(FlakyCatalog::new()));
        for raw in [7, 2, 5] {
            for _ in 0..2 {
                aggregator.counters.increment_views(id(raw)).await.unwrap();
            }
        }

        let hot = hot_articles(aggregator.catalog.as_ref(), &aggregator.counters, 5)
            .await
            .unwrap();

        assert_eq!(ids(&hot), vec![2, 5, 7]);
    }
}
