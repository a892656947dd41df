//! RedisStreamLog - Redis Streams による本番用ログサービス
//!
//! | 操作 | コマンド |
//! |------|----------|
//! | append | `XADD stream [MAXLEN [~] n] * field value ...` (+ `XTRIM MINID`) |
//! | create_group | `XGROUP CREATE stream group 0|$ MKSTREAM` |
//! | group_read | `XREADGROUP GROUP g member COUNT n [BLOCK ms] STREAMS stream >|id` |
//! | list_pending | `XPENDING stream group - + n` |
//! | claim | `XCLAIM stream group member min-idle-ms id ...` |
//! | ack | `XACK stream group id ...` |
//!
//! MultiplexedConnection は clone して使い回せる。
//! BLOCK 付きの XREADGROUP は同じ接続の後続コマンドを待たせるので、
//! consumer は自分専用の `RedisStreamLog` を持つこと。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::{Client, RedisError};
use tracing::debug;

use crate::domain::{
    EntryId, FieldMap, GroupStart, IdRange, LogError, MemberName, PendingEntry, ReadCursor,
    Retention, StreamEntry,
};
use crate::ports::{Clock, StreamLog, SystemClock};

pub struct RedisStreamLog {
    connection: MultiplexedConnection,
    clock: Arc<dyn Clock>,
}

impl From<RedisError> for LogError {
    fn from(err: RedisError) -> Self {
        if err.kind() == redis::ErrorKind::TypeError {
            LogError::Protocol(err.to_string())
        } else {
            LogError::Transport(err.to_string())
        }
    }
}

/// NOGROUP だけは group 不在として区別する
fn classify(err: RedisError, stream: &str, group: &str) -> LogError {
    if err.code() == Some("NOGROUP") {
        LogError::no_group(stream, group)
    } else {
        LogError::from(err)
    }
}

fn range_start(id: EntryId) -> String {
    if id == EntryId::MIN {
        "-".to_string()
    } else {
        id.to_string()
    }
}

fn range_end(id: EntryId) -> String {
    if id == EntryId::MAX {
        "+".to_string()
    } else {
        id.to_string()
    }
}

fn to_entry(raw: StreamId) -> Result<StreamEntry, LogError> {
    let id = raw.id.parse()?;
    let mut fields = FieldMap::new();
    for (name, value) in raw.map {
        let value: String = redis::from_redis_value(&value)
            .map_err(|e| LogError::Protocol(format!("field {name} of {id}: {e}")))?;
        fields.insert(name, value);
    }
    Ok(StreamEntry::new(id, fields))
}

impl RedisStreamLog {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`) and check the connection with PING.
    pub async fn connect(url: &str) -> Result<Self, LogError> {
        let client = Client::open(url)?;
        let mut connection = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!(url, "connected to redis");
        Ok(Self {
            connection,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use another clock for max-age trimming cutoffs.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
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

        let mut add = redis::cmd("XADD");
        add.arg(stream);
        if let Some(max_len) = retention.max_len {
            add.arg("MAXLEN");
            if retention.approximate {
                add.arg("~");
            }
            add.arg(max_len);
        }
        add.arg("*");
        for (name, value) in fields {
            add.arg(name).arg(value);
        }

        let mut pipe = redis::pipe();
        pipe.atomic().add_command(add);
        if let Some(min_id) = retention.min_id_at(self.clock.now()) {
            let mut trim = redis::cmd("XTRIM");
            trim.arg(stream).arg("MINID");
            if retention.approximate {
                trim.arg("~");
            }
            trim.arg(min_id.to_string());
            pipe.add_command(trim).ignore();
        }

        let mut conn = self.connection.clone();
        let (id,): (String,) = pipe.query_async(&mut conn).await?;
        Ok(id.parse()?)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, LogError> {
        let start = match start {
            GroupStart::Beginning => "0",
            GroupStart::Latest => "$",
        };
        let mut conn = self.connection.clone();
        let created: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(true),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(false),
            Err(err) => Err(classify(err, stream, group)),
        }
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
        let mut read = redis::cmd("XREADGROUP");
        read.arg("GROUP")
            .arg(group)
            .arg(member.as_str())
            .arg("COUNT")
            .arg(count);
        // BLOCK 0 は「無期限」なので 0ms のときは付けない
        let block = block.filter(|b| !b.is_zero() && cursor == ReadCursor::New);
        if let Some(block) = block {
            read.arg("BLOCK")
                .arg(u64::try_from(block.as_millis()).unwrap_or(u64::MAX));
        }
        read.arg("STREAMS").arg(stream).arg(cursor.to_string());

        let mut conn = self.connection.clone();
        let reply: Option<StreamReadReply> = read
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, group))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .into_iter()
            .filter(|key| key.key == stream)
            .flat_map(|key| key.ids)
            .map(to_entry)
            .collect()
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        range: IdRange,
        limit: usize,
    ) -> Result<Vec<PendingEntry>, LogError> {
        if range.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg(range_start(range.start))
            .arg(range_end(range.end))
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, group))?;

        reply
            .ids
            .into_iter()
            .map(|pending| {
                Ok(PendingEntry {
                    id: pending.id.parse()?,
                    owner: MemberName::from(pending.consumer),
                    idle: Duration::from_millis(pending.last_delivered_ms as u64),
                    deliveries: pending.times_delivered as u64,
                })
            })
            .collect()
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &MemberName,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, LogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(stream)
            .arg(group)
            .arg(new_owner.as_str())
            .arg(u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX));
        for id in ids {
            claim.arg(id.to_string());
        }

        let mut conn = self.connection.clone();
        let reply: StreamClaimReply = claim
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, group))?;
        reply.ids.into_iter().map(to_entry).collect()
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, LogError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut ack = redis::cmd("XACK");
        ack.arg(stream).arg(group);
        for id in ids {
            ack.arg(id.to_string());
        }
        let mut conn = self.connection.clone();
        let removed: u64 = ack
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, group))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_renders_as_dash_and_plus() {
        let range = IdRange::full();
        assert_eq!(range_start(range.start), "-");
        assert_eq!(range_end(range.end), "+");
        assert_eq!(range_start(EntryId::new(5, 1)), "5-1");
        assert_eq!(range_end(EntryId::new(9, 0)), "9-0");
    }

    #[test]
    fn stream_ids_convert_to_entries() {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "Name".to_string(),
            redis::Value::BulkString(b"alice".to_vec()),
        );
        map.insert("Priority".to_string(), redis::Value::BulkString(b"3".to_vec()));
        let raw = StreamId {
            id: "1700000000000-2".to_string(),
            map,
        };

        let entry = to_entry(raw).unwrap();
        assert_eq!(entry.id, EntryId::new(1_700_000_000_000, 2));
        assert_eq!(entry.fields["Name"], "alice");
        assert_eq!(entry.fields["Priority"], "3");
    }

    #[test]
    fn malformed_ids_are_reported() {
        let raw = StreamId {
            id: "not-an-id".to_string(),
            map: Default::default(),
        };
        assert!(matches!(to_entry(raw), Err(LogError::InvalidId(_))));
    }
}
