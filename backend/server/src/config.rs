use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::{
    detail::DetailLimits,
    error::AppError,
    reconcile::{CronTrigger, Schedule},
};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub catalog_path: PathBuf,
    pub website_config_path: PathBuf,
    pub pages_path: PathBuf,
    pub history_path: PathBuf,
    pub time_zone: Tz,
    pub schedule: Schedule,
    pub detail: DetailLimits,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            redis_url: load_secret_or("REDIS_URL", "redis://127.0.0.1:6379"),
            catalog_path: try_load("CATALOG_PATH", "data/articles.json")?,
            website_config_path: try_load("WEBSITE_CONFIG_PATH", "data/website_config.json")?,
            pages_path: try_load("PAGES_PATH", "data/pages.json")?,
            history_path: try_load("HISTORY_PATH", "data/unique_views.jsonl")?,
            time_zone: try_load("TIME_ZONE", "Asia/Shanghai")?,
            schedule: Schedule {
                snapshot: try_load::<CronTrigger>("SNAPSHOT_CRON", "0 0 0 * * ?")?,
                clear: try_load::<CronTrigger>("CLEAR_CRON", "0 1 0 * * ?")?,
            },
            detail: DetailLimits {
                branch_timeout: Duration::from_millis(try_load("DETAIL_BRANCH_TIMEOUT_MS", "500")?),
                recommended: try_load("RECOMMENDED_ARTICLE_LIMIT", "6")?,
                newest: try_load("NEWEST_ARTICLE_LIMIT", "5")?,
                hot: try_load("HOT_ARTICLE_LIMIT", "5")?,
            },
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AppError::Configuration(format!("{key}: {e}"))
        })
}

/// Environment first, then the mounted secret, then the default.
fn load_secret_or(key: &str, default: &str) -> String {
    if let Ok(value) = env::var(key) {
        return value;
    }

    let path = format!("/run/secrets/{key}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|e| {
            info!("{key} not set and {path} unreadable ({e}), using default");
            default.to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let port: u16 = try_load("BLOG_TEST_UNSET_PORT", "1111").unwrap();
        let zone: Tz = try_load("BLOG_TEST_UNSET_ZONE", "Asia/Shanghai").unwrap();
        let trigger: CronTrigger = try_load("BLOG_TEST_UNSET_CRON", "0 1 0 * * ?").unwrap();

        assert_eq!(port, 1111);
        assert_eq!(zone, chrono_tz::Asia::Shanghai);
        assert_eq!(trigger, CronTrigger::daily(0, 1, 0).unwrap());
    }

    #[test]
    fn test_bad_default_is_reported() {
        let result = try_load::<u16>("BLOG_TEST_UNSET_BAD", "not a port");

        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
