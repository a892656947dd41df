//! Retention - ストリームの保持ポリシー（長さ上限 / 経過時間上限）
//!
//! append のたびに適用される。近似トリム（approximate）を許すと、
//! ログ側は上限を多少超えた状態を許容してまとめて削除できる。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EntryId;

/// Bounded retention applied on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    /// Maximum number of entries kept in the stream.
    #[serde(default)]
    pub max_len: Option<usize>,

    /// Allow the log to trim lazily (`MAXLEN ~` / `MINID ~`).
    #[serde(default = "default_approximate")]
    pub approximate: bool,

    /// Entries older than this are discarded.
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

fn default_approximate() -> bool {
    true
}

impl Default for Retention {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Retention {
    /// Keep everything.
    pub fn unbounded() -> Self {
        Self {
            max_len: None,
            approximate: default_approximate(),
            max_age: None,
        }
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: usize, approximate: bool) -> Self {
        self.max_len = Some(max_len);
        self.approximate = approximate;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_len.is_none() && self.max_age.is_none()
    }

    /// Smallest id that survives the age limit at `now`.
    pub fn min_id_at(&self, now: DateTime<Utc>) -> Option<EntryId> {
        let max_age = self.max_age?;
        let now_millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let age_millis = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        Some(EntryId::new(now_millis.saturating_sub(age_millis), 0))
    }
}
