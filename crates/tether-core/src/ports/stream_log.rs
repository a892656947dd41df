//! StreamLog port - 外部ログ/ブローカーサービス
//!
//! 永続化・レプリケーション・保持（trim）はすべてログ側の責務。
//! このクレートはここにある操作だけを組み合わせて配送プロトコルを実装する。
//!
//! # 実装
//! - `RedisStreamLog`（本番用）: XADD / XGROUP / XREADGROUP / XPENDING / XCLAIM / XACK
//! - `InMemoryStreamLog`（開発・テスト用）
//!
//! # 原子性の前提
//! - `claim` は compare-and-transfer: 同じエントリを同時に claim しても勝つのは 1 つだけ
//! - `ack` は冪等: 2 回目は 0 を返すだけでエラーにはならない

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    EntryId, FieldMap, GroupStart, IdRange, LogError, MemberName, PendingEntry, ReadCursor,
    Retention, StreamEntry,
};

#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append an entry and apply `retention`. Returns the id assigned by the log.
    async fn append(
        &self,
        stream: &str,
        fields: &FieldMap,
        retention: &Retention,
    ) -> Result<EntryId, LogError>;

    /// Create `group` on `stream` (creating the stream if needed).
    ///
    /// Returns `false` when the group already exists; it is left untouched.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, LogError>;

    /// Read up to `count` entries for `member`.
    ///
    /// - `ReadCursor::New`: entries never delivered to the group. They become pending
    ///   for `member`. Waits up to `block` when nothing is available.
    /// - `ReadCursor::After(id)`: `member`'s own pending entries with a greater id.
    ///   Never blocks.
    ///
    /// An empty result means the wait timed out (or the backlog is exhausted).
    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        member: &MemberName,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, LogError>;

    /// Up to `limit` pending entries of the group within `range`, ascending by id.
    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: IdRange,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError>;

    /// Transfer ownership of every id idle for at least `min_idle` to `new_owner`.
    ///
    /// Ids that do not qualify are skipped silently.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &MemberName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, LogError>;

    /// Remove `ids` from the group's pending list. Returns how many were removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError>;
}
