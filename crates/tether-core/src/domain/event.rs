//! Event - ストリームに流すアプリケーションイベント
//!
//! ワイヤ上のフィールド名は `Name` / `Priority` / `Time`。

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Priority")]
    pub priority: i64,

    /// RFC 3339 timestamp, kept as text so that foreign producers round-trip unchanged.
    #[serde(rename = "Time")]
    pub time: String,
}

impl Event {
    pub fn new(name: impl Into<String>, priority: i64, time: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            time: time.into(),
        }
    }

    /// Event stamped with the current UTC time.
    pub fn now(name: impl Into<String>, priority: i64) -> Self {
        Self::new(
            name,
            priority,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}
