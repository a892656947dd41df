//! Delivery - 1 エントリの decode → handle → ack
//!
//! consumer と checker は同じ手順でエントリを処理するので、ここにまとめる。
//!
//! # フロー
//! 1. decode（失敗したら poison policy へ）
//! 2. Handler::handle
//! 3. 成功なら ack、失敗なら何もしない（pending に残り、checker が拾う）
//!
//! ack の失敗は致命的ではない。エントリは pending に残るだけなので、ログに出して数える。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::poison::{DecodeErrorAction, PoisonPolicy, dead_letter_fields, dead_letter_stream};
use super::status::DeliveryCounts;
use crate::domain::{EntryId, FieldMap, GroupRef, Retention, StreamEntry};
use crate::ports::StreamLog;
use crate::typed::{Decoded, Handler, Payload, decode};

pub(crate) struct Delivery<T> {
    log: Arc<dyn StreamLog>,
    group: GroupRef,
    handler: Arc<dyn Handler<T>>,
    policy: PoisonPolicy,
}

impl<T: Payload> Delivery<T> {
    pub(crate) fn new(
        log: Arc<dyn StreamLog>,
        group: GroupRef,
        handler: Arc<dyn Handler<T>>,
        policy: PoisonPolicy,
    ) -> Self {
        Self {
            log,
            group,
            handler,
            policy,
        }
    }

    pub(crate) fn group(&self) -> &GroupRef {
        &self.group
    }

    pub(crate) fn policy(&self) -> &PoisonPolicy {
        &self.policy
    }

    /// Process one delivered entry. `deliveries` is how often it has been delivered, when known.
    pub(crate) async fn deliver(
        &self,
        entry: StreamEntry,
        deliveries: Option<u64>,
        counts: &mut DeliveryCounts,
    ) {
        counts.delivered += 1;
        let stream = self.group.stream.as_str();

        match decode::<T>(stream, entry) {
            Decoded::Ok(message) => match self.handler.handle(&message).await {
                Ok(()) => {
                    debug!(stream = %stream, id = %message.id, "processed");
                    self.ack(message.id, counts).await;
                }
                Err(error) => {
                    // ack しない。pending に残して checker に任せる
                    counts.failed += 1;
                    warn!(stream = %stream, id = %message.id, error = %error, "processing failed; left pending");
                }
            },
            Decoded::ParseError(failure) => {
                counts.parse_errors += 1;
                warn!(
                    stream = %stream,
                    id = %failure.id,
                    error = %failure.error,
                    action = ?self.policy.on_decode_error,
                    "entry does not decode"
                );
                match self.policy.on_decode_error {
                    DecodeErrorAction::DeadLetter => {
                        let reason = format!("decode: {}", failure.error);
                        self.dead_letter(failure.id, &failure.raw, &reason, deliveries, counts)
                            .await;
                    }
                    DecodeErrorAction::Ack => self.ack(failure.id, counts).await,
                    DecodeErrorAction::LeavePending => {}
                }
            }
        }
    }

    /// Park an entry that was delivered too often instead of handling it again.
    pub(crate) async fn retire(
        &self,
        entry: StreamEntry,
        deliveries: u64,
        counts: &mut DeliveryCounts,
    ) {
        counts.delivered += 1;
        let reason = format!("exceeded max deliveries ({deliveries})");
        self.dead_letter(entry.id, &entry.fields, &reason, Some(deliveries), counts)
            .await;
    }

    async fn dead_letter(
        &self,
        id: EntryId,
        raw: &FieldMap,
        reason: &str,
        deliveries: Option<u64>,
        counts: &mut DeliveryCounts,
    ) {
        let stream = self.group.stream.as_str();
        let target = dead_letter_stream(stream);
        let fields = dead_letter_fields(raw, stream, id, reason, deliveries);

        match self.log.append(&target, &fields, &Retention::default()).await {
            Ok(dead_id) => {
                counts.dead_lettered += 1;
                info!(stream = %stream, id = %id, dead_letter = %target, dead_id = %dead_id, reason, "dead-lettered");
                self.ack(id, counts).await;
            }
            Err(error) => {
                // 退避できなかったものは ack しない
                warn!(stream = %stream, id = %id, dead_letter = %target, error = %error, "dead-letter append failed; left pending");
            }
        }
    }

    async fn ack(&self, id: EntryId, counts: &mut DeliveryCounts) {
        match self
            .log
            .ack(&self.group.stream, &self.group.group, &[id])
            .await
        {
            Ok(0) => {
                debug!(stream = %self.group.stream, id = %id, "already acknowledged");
            }
            Ok(_) => counts.acked += 1,
            Err(error) => {
                counts.ack_errors += 1;
                warn!(stream = %self.group.stream, id = %id, error = %error, "ack failed; left pending");
            }
        }
    }
}
