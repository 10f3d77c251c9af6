use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::AppError, keys::UNKNOWN_AREA};

/// Identifier of an article, comment or talk. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct EntityId(i64);

impl EntityId {
    pub fn new(raw: i64) -> Result<Self, AppError> {
        if raw <= 0 {
            return Err(AppError::Validation(format!("Invalid id {raw}")));
        }

        Ok(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for EntityId {
    type Error = AppError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        EntityId::new(raw)
    }
}

impl From<EntityId> for i64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::Validation(format!("Invalid id {s:?}")))?;

        EntityId::new(raw)
    }
}

/// Owner of like membership sets. Becomes part of a store key, so it may not be blank or carry
/// the key separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();

        if trimmed.is_empty()
            || trimmed.len() > 64
            || trimmed.contains(':')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(AppError::Validation(format!("Invalid user id {raw:?}")));
        }

        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of ip and user agent, NUL separated; identifies a visitor for the day.
pub fn fingerprint(ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.trim().as_bytes());
    hasher.update(b"\0");
    hasher.update(user_agent.trim().as_bytes());

    format!("{:x}", hasher.finalize())
}

static ADMINISTRATIVE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(省|市|自治区|特别行政区)$").unwrap());
static NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\- ]").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());

/// Region code for the visitor area histogram; blank or unusable input is `unknown`.
pub fn normalize_region(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return UNKNOWN_AREA.to_string();
    };

    let cleaned = NOISE.replace_all(raw.trim(), "");
    let cleaned = ADMINISTRATIVE_SUFFIX.replace(cleaned.trim(), "");
    let cleaned = SPACES.replace_all(cleaned.trim(), " ").to_lowercase();

    if cleaned.is_empty() {
        UNKNOWN_AREA.to_string()
    } else {
        cleaned
    }
}
