//! # Article Catalog
//!
//! Read-only view of the article metadata owned by the relational store. The counting engine only
//! needs point lookups and a handful of filtered lists:
//!
//! - article by id
//! - related ("recommended") articles: public, not deleted, sharing a tag, newest first
//! - newest articles: public, not deleted, by creation time then id, descending
//! - cards for a set of ids, same visibility filter
//! - previous / next: nearest visible id below / above
//!
//! [Catalog] is the bundled implementation, a JSON snapshot of the article table loaded at start.
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::{error::AppError, utils::EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Public,
    Secret,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub tag_names: Vec<String>,
    pub status: ArticleStatus,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn is_visible(&self) -> bool {
        self.status == ArticleStatus::Public && !self.is_deleted
    }

    pub fn card(&self) -> ArticleCard {
        ArticleCard {
            id: self.id,
            title: self.title.clone(),
            cover: self.cover.clone(),
            created_at: self.created_at,
            views_count: None,
        }
    }

    pub fn link(&self) -> ArticleLink {
        ArticleLink {
            id: self.id,
            title: self.title.clone(),
            cover: self.cover.clone(),
        }
    }
}

/// Summary used in the recommended, newest and hot sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleCard {
    pub id: EntityId,
    pub title: String,
    pub cover: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_count: Option<u64>,
}

/// Previous / next navigation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleLink {
    pub id: EntityId,
    pub title: String,
    pub cover: String,
}

#[async_trait]
pub trait ArticleCatalog: Send + Sync {
    async fn article(&self, id: EntityId) -> Result<Option<Article>, AppError>;
    async fn recommended(&self, id: EntityId, limit: usize) -> Result<Vec<ArticleCard>, AppError>;
    async fn newest(&self, limit: usize) -> Result<Vec<ArticleCard>, AppError>;
    /// Visible articles among `ids`, in no particular order.
    async fn cards(&self, ids: &[EntityId]) -> Result<Vec<ArticleCard>, AppError>;
    async fn previous(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError>;
    async fn next(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError>;
}

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    articles: Vec<Article>,
}

/// Articles held in memory, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    articles: Vec<Article>,
}

impl Catalog {
    pub fn new(mut articles: Vec<Article>) -> Self {
        articles.sort_by_key(|article| article.id);
        articles.dedup_by_key(|article| article.id);

        Self { articles }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Catalog(Box::new(e)))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;

        info!("Loaded {} articles from {}", snapshot.articles.len(), path.display());

        Ok(Self::new(snapshot.articles))
    }

    fn visible(&self) -> impl DoubleEndedIterator<Item = &Article> {
        self.articles.iter().filter(|article| article.is_visible())
    }
}

#[async_trait]
impl ArticleCatalog for Catalog {
    async fn article(&self, id: EntityId) -> Result<Option<Article>, AppError> {
        Ok(self
            .articles
            .binary_search_by_key(&id, |article| article.id)
            .ok()
            .map(|index| self.articles[index].clone()))
    }

    async fn recommended(&self, id: EntityId, limit: usize) -> Result<Vec<ArticleCard>, AppError> {
        let Some(current) = self.article(id).await? else {
            return Ok(Vec::new());
        };

        let mut related: Vec<&Article> = self
            .visible()
            .filter(|article| article.id != id)
            .filter(|article| {
                article
                    .tag_names
                    .iter()
                    .any(|tag| current.tag_names.contains(tag))
            })
            .collect();
        related.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(related
            .into_iter()
            .take(limit)
            .map(Article::card)
            .collect())
    }

    async fn newest(&self, limit: usize) -> Result<Vec<ArticleCard>, AppError> {
        let mut visible: Vec<&Article> = self.visible().collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(visible
            .into_iter()
            .take(limit)
            .map(Article::card)
            .collect())
    }

    async fn cards(&self, ids: &[EntityId]) -> Result<Vec<ArticleCard>, AppError> {
        Ok(self
            .visible()
            .filter(|article| ids.contains(&article.id))
            .map(Article::card)
            .collect())
    }

    async fn previous(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError> {
        Ok(self
            .visible()
            .rev()
            .find(|article| article.id < id)
            .map(Article::link))
    }

    async fn next(&self, id: EntityId) -> Result<Option<ArticleLink>, AppError> {
        Ok(self
            .visible()
            .find(|article| article.id > id)
            .map(Article::link))
    }
}

#[cfg(test)]
pub mod testing {
    use chrono::{TimeZone, Utc};

    use super::*;

    pub fn article(id: i64, day: u32, tags: &[&str]) -> Article {
        Article {
            id: EntityId::new(id).unwrap(),
            title: format!("Article {id}"),
            cover: format!("/covers/{id}.png"),
            content: String::new(),
            category_name: None,
            tag_names: tags.iter().map(|tag| tag.to_string()).collect(),
            status: ArticleStatus::Public,
            is_deleted: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
            updated_at: None,
        }
    }

    /// Eight articles: 3 is a draft, 6 is deleted, the rest are public.
    pub fn sample() -> Catalog {
        let mut articles: Vec<Article> = (1..=8)
            .map(|id| article(id, id as u32, if id % 2 == 0 { &["rust"] } else { &["go"] }))
            .collect();
        articles[2].status = ArticleStatus::Draft;
        articles[5].is_deleted = true;

        Catalog::new(articles)
    }
}
