//! InMemoryStreamLog - 開発・テスト用のログサービス
//!
//! # 学習ポイント
//! - tokio::sync::Mutex 1 本で全状態を守る → claim / ack が自然に原子的になる
//! - Notify による blocking read（append で待機中の reader を起こす）
//! - Clock 注入による idle 時間の決定的なテスト
//!
//! # Redis との違い
//! - 保持ポリシーの trim は、どこかの group で pending のエントリを消さない
//!   （配送から ack までの間にエントリが消えることはない）
//! - 近似 trim は「上限の 10% まで超過を許し、超えたら上限まで削る」

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{
    EntryId, FieldMap, GroupStart, IdRange, LogError, MemberName, PendingEntry, ReadCursor,
    Retention, StreamEntry,
};
use crate::ports::{Clock, StreamLog, SystemClock};

/// Pending-list row for one delivered entry.
#[derive(Debug, Clone)]
struct PendingRecord {
    owner: MemberName,
    delivered_at: DateTime<Utc>,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    /// 最後に group へ配送した ID（`>` 読み取りはこれより後を返す）
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingRecord>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, FieldMap>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn is_pending_anywhere(&self, id: &EntryId) -> bool {
        self.groups.values().any(|g| g.pending.contains_key(id))
    }

    /// Apply retention after an append.
    fn trim(&mut self, retention: &Retention, now: DateTime<Utc>) {
        if let Some(min_id) = retention.min_id_at(now) {
            let expired: Vec<EntryId> = self
                .entries
                .range(..min_id)
                .map(|(id, _)| *id)
                .filter(|id| !self.is_pending_anywhere(id))
                .collect();
            for id in expired {
                self.entries.remove(&id);
            }
        }

        if let Some(max_len) = retention.max_len {
            let slack = if retention.approximate {
                (max_len / 10).max(1)
            } else {
                0
            };
            if self.entries.len() <= max_len + slack {
                return;
            }
            let excess = self.entries.len() - max_len;
            let oldest: Vec<EntryId> = self
                .entries
                .keys()
                .copied()
                .filter(|id| !self.is_pending_anywhere(id))
                .take(excess)
                .collect();
            for id in oldest {
                self.entries.remove(&id);
            }
        }
    }
}

fn idle_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// In-process implementation of the log service.
pub struct InMemoryStreamLog {
    state: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    clock: Arc<dyn Clock>,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            clock,
        }
    }

    /// Number of entries currently kept in `stream`.
    pub async fn len(&self, stream: &str) -> usize {
        let streams = self.state.lock().await;
        streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// All entries currently kept in `stream`, oldest first.
    pub async fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        let streams = self.state.lock().await;
        streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryStreamLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    async fn append(
        &self,
        stream: &str,
        fields: &FieldMap,
        retention: &Retention,
    ) -> Result<EntryId, LogError> {
        if fields.is_empty() {
            return Err(LogError::Protocol(
                "an entry needs at least one field".to_string(),
            ));
        }
        let now = self.clock.now();
        let id = {
            let mut streams = self.state.lock().await;
            let stream_state = streams.entry(stream.to_string()).or_default();
            let now_millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
            let id = stream_state.last_id.next_after(now_millis);
            stream_state.entries.insert(id, fields.clone());
            stream_state.last_id = id;
            stream_state.trim(retention, now);
            id
        };

        // ロック解放後に通知（待機中の group_read を全員起こす）
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, LogError> {
        let mut streams = self.state.lock().await;
        let stream_state = streams.entry(stream.to_string()).or_default();
        if stream_state.groups.contains_key(group) {
            return Ok(false);
        }
        let last_delivered = match start {
            GroupStart::Beginning => EntryId::MIN,
            GroupStart::Latest => stream_state.last_id,
        };
        stream_state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        member: &MemberName,
        cursor: ReadCursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, LogError> {
        let deadline = block.map(|block| Instant::now() + block);

        loop {
            // 状態を見る前に通知を予約しておく（見た後の append を取りこぼさない）
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let now = self.clock.now();
                let mut streams = self.state.lock().await;
                let StreamState {
                    entries, groups, ..
                } = streams
                    .get_mut(stream)
                    .ok_or_else(|| LogError::no_group(stream, group))?;
                let group_state = groups
                    .get_mut(group)
                    .ok_or_else(|| LogError::no_group(stream, group))?;

                match cursor {
                    ReadCursor::After(after) => {
                        let mut backlog = Vec::new();
                        for (id, record) in group_state
                            .pending
                            .range_mut((Bound::Excluded(after), Bound::Unbounded))
                            .filter(|(_, record)| record.owner == *member)
                            .take(count)
                        {
                            record.delivered_at = now;
                            record.deliveries += 1;
                            let fields = entries.get(id).cloned().unwrap_or_default();
                            backlog.push(StreamEntry::new(*id, fields));
                        }
                        return Ok(backlog);
                    }
                    ReadCursor::New => {
                        let fresh: Vec<StreamEntry> = entries
                            .range((Bound::Excluded(group_state.last_delivered), Bound::Unbounded))
                            .take(count)
                            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
                            .collect();
                        if let Some(last) = fresh.last() {
                            group_state.last_delivered = last.id;
                            for entry in &fresh {
                                group_state.pending.insert(
                                    entry.id,
                                    PendingRecord {
                                        owner: member.clone(),
                                        delivered_at: now,
                                        deliveries: 1,
                                    },
                                );
                            }
                            return Ok(fresh);
                        }
                    }
                }
            }

            let Some(deadline) = deadline else {
                return Ok(Vec::new());
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: IdRange,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError> {
        let now = self.clock.now();
        let streams = self.state.lock().await;
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| LogError::no_group(stream, group))?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        Ok(group_state
            .pending
            .range(range.start..=range.end)
            .take(limit)
            .map(|(id, record)| PendingEntry {
                id: *id,
                owner: record.owner.clone(),
                idle: idle_since(record.delivered_at, now),
                deliveries: record.deliveries,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &MemberName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, LogError> {
        let now = self.clock.now();
        let mut streams = self.state.lock().await;
        let StreamState {
            entries, groups, ..
        } = streams
            .get_mut(stream)
            .ok_or_else(|| LogError::no_group(stream, group))?;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| LogError::no_group(stream, group))?;

        let mut claimed = Vec::new();
        for id in ids {
            let Some(record) = group_state.pending.get_mut(id) else {
                continue;
            };
            if idle_since(record.delivered_at, now) < min_idle {
                continue;
            }
            match entries.get(id) {
                Some(fields) => {
                    record.owner = new_owner.clone();
                    record.delivered_at = now;
                    record.deliveries += 1;
                    claimed.push(StreamEntry::new(*id, fields.clone()));
                }
                // 本体が消えたエントリは pending からも外す（Redis 7 の XCLAIM と同じ）
                None => {
                    group_state.pending.remove(id);
                }
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError> {
        let mut streams = self.state.lock().await;
        let group_state = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| LogError::no_group(stream, group))?;

        let removed = ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count();
        Ok(removed as u64)
    }
}
