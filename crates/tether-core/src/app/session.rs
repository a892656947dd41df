//! GroupSession - consumer group へのメンバー参加と読み取り
//!
//! # 学習ポイント
//! - セッションは consumer loop が専有する値（共有しない、バックグラウンドの reader も無い）
//! - 読み取りとキャンセルを 1 つの `select!` で待つ（busy-wait しない）
//!
//! # 開始カーソル
//! - `NewOnly`: `>` で未配送のエントリだけを読む
//! - `Backlog`: まず自分宛ての未 ack エントリを `0-0` から読み直し、
//!   空になったら `>` に切り替える（クラッシュ後に同じ名前で再参加したとき用）

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConsumerSettings;
use crate::domain::{EntryId, GroupRef, LogError, MemberName, ReadCursor, StreamEntry};
use crate::ports::StreamLog;

/// Last entry id seen per stream, reported when a session closes.
pub type SeenIds = BTreeMap<String, EntryId>;

/// BLOCK が 0 だと空読みを繰り返すので下限を設ける
const MIN_BLOCK: Duration = Duration::from_millis(10);

/// An entry handed out by [`GroupSession::next`].
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub entry: StreamEntry,
    /// `true` if it was replayed from this member's backlog rather than newly delivered.
    pub replayed: bool,
}

impl Received {
    /// How many times the entry has been delivered, when the read tells us.
    pub fn deliveries(&self) -> Option<u64> {
        if self.replayed { None } else { Some(1) }
    }
}

pub struct GroupSession {
    log: Arc<dyn StreamLog>,
    group: GroupRef,
    member: MemberName,
    cursor: ReadCursor,
    count: usize,
    block: Duration,
    buffered: VecDeque<Received>,
    seen: SeenIds,
}

impl GroupSession {
    /// Join `group` as `settings.member`, creating the group (and stream) if needed.
    pub async fn join(
        log: Arc<dyn StreamLog>,
        group: GroupRef,
        settings: &ConsumerSettings,
    ) -> Result<Self, LogError> {
        let created = log
            .create_group(&group.stream, &group.group, settings.group_start)
            .await?;
        info!(
            stream = %group.stream,
            group = %group.group,
            member = %settings.member,
            start = ?settings.start,
            created,
            "joined consumer group"
        );

        Ok(Self {
            log,
            group,
            member: settings.member.clone(),
            cursor: settings.start.into(),
            count: settings.count.max(1),
            block: settings.block.max(MIN_BLOCK),
            buffered: VecDeque::new(),
            seen: SeenIds::new(),
        })
    }

    pub fn group(&self) -> &GroupRef {
        &self.group
    }

    pub fn member(&self) -> &MemberName {
        &self.member
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    pub(crate) fn log(&self) -> Arc<dyn StreamLog> {
        Arc::clone(&self.log)
    }

    /// Wait for the next entry assigned to this member.
    ///
    /// `Ok(None)` once `cancel` fires. Entries already read but not yet returned stay
    /// pending in the group and come back through the backlog or the checker.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Received>, LogError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(received) = self.buffered.pop_front() {
                self.seen
                    .insert(self.group.stream.clone(), received.entry.id);
                return Ok(Some(received));
            }

            let read = self.log.group_read(
                &self.group.stream,
                &self.group.group,
                &self.member,
                self.cursor,
                self.count,
                Some(self.block),
            );
            let entries = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                read = read => read?,
            };

            let replayed = match self.cursor {
                ReadCursor::New => false,
                ReadCursor::After(_) => {
                    match entries.last() {
                        Some(last) => self.cursor = ReadCursor::After(last.id),
                        None => {
                            debug!(stream = %self.group.stream, member = %self.member, "backlog drained; reading new entries");
                            self.cursor = ReadCursor::New;
                        }
                    }
                    true
                }
            };
            self.buffered.extend(
                entries
                    .into_iter()
                    .map(|entry| Received { entry, replayed }),
            );
        }
    }

    /// Leave the session and report the last id seen on each stream.
    pub fn close(self) -> SeenIds {
        info!(
            stream = %self.group.stream,
            member = %self.member,
            unprocessed = self.buffered.len(),
            "session closed"
        );
        self.seen
    }
}
