//! FlakyStreamLog - 指定した操作だけ失敗させるテスト用ラッパー
//!
//! 中身は InMemoryStreamLog。`fail(Op::Ack)` などで障害を注入し、`heal` で戻す。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::memory::InMemoryStreamLog;
use crate::domain::{
    EntryId, FieldMap, GroupStart, IdRange, LogError, MemberName, PendingEntry, ReadCursor,
    Retention, StreamEntry,
};
use crate::ports::StreamLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Append,
    GroupRead,
    ListPending,
    Claim,
    Ack,
}

pub(crate) struct FlakyStreamLog {
    inner: Arc<InMemoryStreamLog>,
    failing: Mutex<HashSet<Op>>,
}

impl FlakyStreamLog {
    pub(crate) fn new(inner: Arc<InMemoryStreamLog>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn inner(&self) -> &InMemoryStreamLog {
        &self.inner
    }

    pub(crate) fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    fn check(&self, op: Op) -> Result<(), LogError> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(LogError::Transport(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamLog for FlakyStreamLog {
    async fn append(
        &self,
        stream: &str,
        fields: &FieldMap,
        retention: &Retention,
    ) -> Result<EntryId, LogError> {
        self.check(Op::Append)?;
        self.inner.append(stream, fields, retention).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, LogError> {
        self.inner.create_group(stream, group, start).await
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
        self.check(Op::GroupRead)?;
        self.inner
            .group_read(stream, group, member, cursor, count, block)
            .await
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: IdRange,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError> {
        self.check(Op::ListPending)?;
        self.inner.list_pending(stream, group, range, limit).await
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &MemberName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, LogError> {
        self.check(Op::Claim)?;
        self.inner
            .claim(stream, group, new_owner, min_idle, ids)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError> {
        self.check(Op::Ack)?;
        self.inner.ack(stream, group, ids).await
    }
}
