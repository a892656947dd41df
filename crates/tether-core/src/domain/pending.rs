//! Pending entries - 配送済みだが未 ack のエントリ

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::{EntryId, MemberName};

/// One row of a group's pending-entry list.
///
/// - 作成: group read で初回配送されたとき、または claim で移譲されたとき
/// - 更新: claim ごとに owner 変更・idle リセット・deliveries + 1
/// - 削除: ack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: EntryId,
    pub owner: MemberName,
    #[serde(with = "humantime_serde")]
    pub idle: Duration,
    pub deliveries: u64,
}

/// Inclusive id range for pending-list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: EntryId,
    pub end: EntryId,
}

impl IdRange {
    pub fn new(start: EntryId, end: EntryId) -> Self {
        Self { start, end }
    }

    /// The whole id space (`-` to `+`).
    pub fn full() -> Self {
        Self::new(EntryId::MIN, EntryId::MAX)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.start <= id && id <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
