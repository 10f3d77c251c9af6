//! Store key namespaces.
//!
//! | Key                          | Shape      | Contents                          |
//! |------------------------------|------------|-----------------------------------|
//! | `article_views_count`        | sorted set | article id -> views               |
//! | `{kind}_like_count`          | hash       | entity id -> likes                |
//! | `{kind}_user_like:{user}`    | set        | entity ids liked by the user      |
//! | `unique_visitor`             | set        | visitor fingerprints of the day   |
//! | `visitor_area`               | hash       | region -> visits of the day       |
//! | `blog_views_count`           | scalar     | site-wide unique visits           |
//! | `website_config`             | scalar     | JSON blob                         |
//! | `page_cover`                 | scalar     | JSON blob                         |
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::utils::UserId;

pub const ARTICLE_VIEWS_COUNT: &str = "article_views_count";
pub const ARTICLE_LIKE_COUNT: &str = "article_like_count";
pub const COMMENT_LIKE_COUNT: &str = "comment_like_count";
pub const TALK_LIKE_COUNT: &str = "talk_like_count";
pub const ARTICLE_USER_LIKE: &str = "article_user_like";
pub const COMMENT_USER_LIKE: &str = "comment_user_like";
pub const TALK_USER_LIKE: &str = "talk_user_like";
pub const UNIQUE_VISITOR: &str = "unique_visitor";
pub const VISITOR_AREA: &str = "visitor_area";
pub const BLOG_VIEWS_COUNT: &str = "blog_views_count";
pub const WEBSITE_CONFIG: &str = "website_config";
pub const PAGE_COVER: &str = "page_cover";

pub const UNKNOWN_AREA: &str = "unknown";

/// Entities that can be liked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeKind {
    Article,
    Comment,
    Talk,
}

impl LikeKind {
    pub const ALL: [LikeKind; 3] = [LikeKind::Article, LikeKind::Comment, LikeKind::Talk];

    pub fn count_key(self) -> &'static str {
        match self {
            LikeKind::Article => ARTICLE_LIKE_COUNT,
            LikeKind::Comment => COMMENT_LIKE_COUNT,
            LikeKind::Talk => TALK_LIKE_COUNT,
        }
    }

    pub fn membership_key(self, user: &UserId) -> String {
        let prefix = match self {
            LikeKind::Article => ARTICLE_USER_LIKE,
            LikeKind::Comment => COMMENT_USER_LIKE,
            LikeKind::Talk => TALK_USER_LIKE,
        };

        format!("{prefix}:{user}")
    }
}

impl fmt::Display for LikeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LikeKind::Article => "article",
            LikeKind::Comment => "comment",
            LikeKind::Talk => "talk",
        })
    }
}

impl FromStr for LikeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" | "articles" => Ok(LikeKind::Article),
            "comment" | "comments" => Ok(LikeKind::Comment),
            "talk" | "talks" => Ok(LikeKind::Talk),
            other => Err(format!("Unknown like kind: {other}")),
        }
    }
}
