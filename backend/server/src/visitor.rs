//! # Visitors
//!
//! Daily unique-visitor window and site-wide view count.
//!
//! A visit is identified by its fingerprint. The first report of a fingerprint in the current
//! window adds it to `unique_visitor`, bumps its region in `visitor_area` and bumps
//! `blog_views_count`. Later reports within the window change nothing. The window is emptied by
//! the reconciler once per day.
//!
//! Deduplication keys off the result of SADD rather than a separate membership check, so two
//! concurrent first visits of the same fingerprint count once.
//!
//! The admin stats also carry the article ranking, ordered the same way as the hot section of
//! the detail page.
use std::sync::Arc;

use chrono::{Days, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    catalog::{ArticleCard, ArticleCatalog},
    counter::CounterService,
    detail::hot_articles,
    error::AppError,
    history::{UniqueView, VisitorHistory},
    keys::{BLOG_VIEWS_COUNT, UNIQUE_VISITOR, VISITOR_AREA},
    store::{KeyValueStore, StoreError},
};

const HISTORY_DAYS: u64 = 7;
const ARTICLE_RANK_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaCount {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorStats {
    pub views_count: i64,
    pub unique_visitors_today: u64,
    pub areas: Vec<AreaCount>,
    pub last_week: Vec<UniqueView>,
    pub article_rank: Vec<ArticleCard>,
}

#[derive(Clone)]
pub struct VisitorService {
    store: Arc<dyn KeyValueStore>,
    history: Arc<dyn VisitorHistory>,
    catalog: Arc<dyn ArticleCatalog>,
    counters: CounterService,
    time_zone: Tz,
}

impl VisitorService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        history: Arc<dyn VisitorHistory>,
        catalog: Arc<dyn ArticleCatalog>,
        time_zone: Tz,
    ) -> Self {
        Self {
            counters: CounterService::new(store.clone()),
            store,
            history,
            catalog,
            time_zone,
        }
    }

    /// Record a visit; true if this fingerprint is new in the current window.
    pub async fn report_visit(&self, fingerprint: &str, region: &str) -> Result<bool, StoreError> {
        if !self.store.sadd(UNIQUE_VISITOR, fingerprint).await? {
            return Ok(false);
        }

        self.store.hincr(VISITOR_AREA, region, 1).await?;
        self.store.incr(BLOG_VIEWS_COUNT, 1).await?;

        Ok(true)
    }

    pub async fn views_count(&self) -> Result<i64, StoreError> {
        let Some(raw) = self.store.get(BLOG_VIEWS_COUNT).await? else {
            return Ok(0);
        };

        raw.parse().map_err(|_| StoreError::Corrupt {
            key: BLOG_VIEWS_COUNT.to_string(),
        })
    }

    pub async fn unique_visitors(&self) -> Result<u64, StoreError> {
        self.store.scard(UNIQUE_VISITOR).await
    }

    /// Regions by descending visits.
    pub async fn areas(&self) -> Result<Vec<AreaCount>, StoreError> {
        let mut areas: Vec<AreaCount> = self
            .store
            .hgetall(VISITOR_AREA)
            .await?
            .into_iter()
            .map(|(name, value)| AreaCount { name, value })
            .collect();
        areas.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));

        Ok(areas)
    }

    pub async fn stats(&self) -> Result<VisitorStats, AppError> {
        let today = Utc::now().with_timezone(&self.time_zone).date_naive();
        let since = today
            .checked_sub_days(Days::new(HISTORY_DAYS))
            .unwrap_or(today);

        let (views_count, unique_visitors_today, areas) =
            tokio::try_join!(self.views_count(), self.unique_visitors(), self.areas())?;

        Ok(VisitorStats {
            views_count,
            unique_visitors_today,
            areas,
            last_week: self.history.since(since).await?,
            article_rank: hot_articles(self.catalog.as_ref(), &self.counters, ARTICLE_RANK_SIZE)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::testing::sample,
        history::testing::MemoryHistory,
        store::memory::MemoryStore,
        utils::{EntityId, fingerprint},
    };

    fn visitors() -> (Arc<MemoryStore>, Arc<MemoryHistory>, VisitorService) {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistory::default());
        let service = VisitorService::new(
            store.clone(),
            history.clone(),
            Arc::new(sample()),
            chrono_tz::Asia::Shanghai,
        );

        (store, history, service)
    }

    #[tokio::test]
    async fn test_repeat_visits_count_once() {
        let (_, _, visitors) = visitors();
        let alice = fingerprint("10.0.0.1", "Firefox");
        let bob = fingerprint("10.0.0.2", "Chrome");

        assert!(visitors.report_visit(&alice, "beijing").await.unwrap());
        assert!(!visitors.report_visit(&alice, "beijing").await.unwrap());
        assert!(visitors.report_visit(&bob, "unknown").await.unwrap());

        assert_eq!(visitors.unique_visitors().await.unwrap(), 2);
        assert_eq!(visitors.views_count().await.unwrap(), 2);
        assert_eq!(
            visitors.areas().await.unwrap(),
            vec![
                AreaCount {
                    name: "beijing".to_string(),
                    value: 1
                },
                AreaCount {
                    name: "unknown".to_string(),
                    value: 1
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_visits_count_once() {
        let (_, _, visitors) = visitors();
        let visitor = fingerprint("10.0.0.9", "Safari");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let visitors = visitors.clone();
                let visitor = visitor.clone();
                tokio::spawn(async move { visitors.report_visit(&visitor, "tokyo").await })
            })
            .collect();

        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(visitors.views_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_include_recent_history() {
        let (_, history, visitors) = visitors();
        let today = Utc::now()
            .with_timezone(&chrono_tz::Asia::Shanghai)
            .date_naive();

        for (days_ago, count) in [(1, 10), (3, 30), (30, 99)] {
            history
                .append_if_absent(UniqueView {
                    day: today.checked_sub_days(Days::new(days_ago)).unwrap(),
                    views_count: count,
                    recorded_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        visitors.report_visit("fp", "paris").await.unwrap();

        let stats = visitors.stats().await.unwrap();

        assert_eq!(stats.views_count, 1);
        assert_eq!(stats.unique_visitors_today, 1);
        assert_eq!(
            stats.last_week.iter().map(|row| row.views_count).collect::<Vec<_>>(),
            vec![30, 10]
        );
    }

    #[tokio::test]
    async fn test_stats_rank_articles_by_views() {
        let (store, _, visitors) = visitors();
        let counters = CounterService::new(store);

        // 3 is a draft, 6 is deleted
        for (raw, views) in [(1, 2), (2, 5), (3, 9), (4, 2), (5, 1), (6, 8), (7, 3), (8, 1)] {
            for _ in 0..views {
                counters
                    .increment_views(EntityId::new(raw).unwrap())
                    .await
                    .unwrap();
            }
        }

        let rank = visitors.stats().await.unwrap().article_rank;

        assert_eq!(
            rank.iter()
                .map(|card| (card.id.get(), card.views_count))
                .collect::<Vec<_>>(),
            vec![(2, Some(5)), (7, Some(3)), (1, Some(2))]
        );
    }
}
