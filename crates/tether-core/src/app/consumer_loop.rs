//! ConsumerLoop - group メンバーとしての読み取り・処理ループ
//!
//! # フロー
//! 1. GroupSession::next でエントリを待つ（キャンセルと同時に待機）
//! 2. Delivery で decode → handle → ack
//! 3. キャンセルされたらセッションを閉じ、最後に見た ID と集計を返す
//!
//! 読み取りエラーだけは致命的で、ループを終了する。
//! 処理中のエントリは pending に残るので、checker が後で回収する。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::delivery::Delivery;
use super::poison::PoisonPolicy;
use super::session::{GroupSession, SeenIds};
use super::status::DeliveryCounts;
use crate::domain::LogError;
use crate::typed::{Handler, Payload};

/// What a consumer did before it stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerReport {
    pub seen: SeenIds,
    pub counts: DeliveryCounts,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("reading from stream '{stream}' failed: {source}")]
    Read {
        stream: String,
        #[source]
        source: LogError,
        /// 失敗するまでの集計
        report: ConsumerReport,
    },
}

pub struct ConsumerLoop<T> {
    session: GroupSession,
    delivery: Delivery<T>,
    counts: DeliveryCounts,
}

impl<T: Payload> ConsumerLoop<T> {
    pub fn new(session: GroupSession, handler: Arc<dyn Handler<T>>, policy: PoisonPolicy) -> Self {
        let delivery = Delivery::new(session.log(), session.group().clone(), handler, policy);
        Self {
            session,
            delivery,
            counts: DeliveryCounts::default(),
        }
    }

    /// Run until `cancel` fires or a read fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ConsumerReport, ConsumerError> {
        loop {
            let received = match self.session.next(&cancel).await {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(source) => {
                    let stream = self.session.group().stream.clone();
                    error!(stream = %stream, member = %self.session.member(), error = %source, "read failed; consumer stopping");
                    let report = self.finish();
                    return Err(ConsumerError::Read {
                        stream,
                        source,
                        report,
                    });
                }
            };

            let deliveries = received.deliveries();
            self.delivery
                .deliver(received.entry, deliveries, &mut self.counts)
                .await;
        }

        let stream = self.delivery.group().stream.clone();
        let report = self.finish();
        info!(
            stream = %stream,
            delivered = report.counts.delivered,
            acked = report.counts.acked,
            failed = report.counts.failed,
            "consumer stopped"
        );
        Ok(report)
    }

    fn finish(self) -> ConsumerReport {
        ConsumerReport {
            seen: self.session.close(),
            counts: self.counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ConsumerSettings;
    use crate::domain::{Event, GroupRef, HandlerError, IdRange, Retention, StartCursor};
    use crate::impls::InMemoryStreamLog;
    use crate::impls::flaky::{FlakyStreamLog, Op};
    use crate::ports::StreamLog;
    use crate::typed::{Message, to_fields};

    async fn consumer<L: StreamLog + 'static>(
        log: &Arc<L>,
        handler: Arc<dyn Handler<Event>>,
    ) -> ConsumerLoop<Event> {
        let settings = ConsumerSettings::default()
            .with_start(StartCursor::NewOnly)
            .with_block(Duration::from_millis(50));
        let session = GroupSession::join(log.clone(), GroupRef::new("s", "g"), &settings)
            .await
            .unwrap();
        ConsumerLoop::new(session, handler, PoisonPolicy::default())
    }

    #[tokio::test]
    async fn processes_until_cancelled() {
        let log = Arc::new(InMemoryStreamLog::new());
        let handler: Arc<dyn Handler<Event>> = Arc::new(|message: &Message<Event>| {
            if message.data.priority > 5 {
                Err(HandlerError::new("too urgent"))
            } else {
                Ok(())
            }
        });
        let consumer = consumer(&log, handler).await;
        for (name, priority) in [("a", 1), ("b", 9), ("c", 2)] {
            let fields = to_fields(&Event::new(name, priority, "T0")).unwrap();
            log.append("s", &fields, &Retention::default()).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let report = task.await.unwrap().unwrap();

        assert_eq!(report.counts.delivered, 3);
        assert_eq!(report.counts.acked, 2);
        assert_eq!(report.counts.failed, 1);
        let last = log.entries("s").await.last().unwrap().id;
        assert_eq!(report.seen.get("s"), Some(&last));

        let pending = log.list_pending("s", "g", IdRange::full(), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    fn accept_all() -> Arc<dyn Handler<Event>> {
        Arc::new(|_: &Message<Event>| Ok::<(), HandlerError>(()))
    }

    #[tokio::test]
    async fn ack_errors_do_not_stop_the_loop() {
        let log = Arc::new(FlakyStreamLog::new(Arc::new(InMemoryStreamLog::new())));
        let consumer = consumer(&log, accept_all()).await;
        log.fail(Op::Ack);
        for name in ["a", "b"] {
            let fields = to_fields(&Event::new(name, 1, "T0")).unwrap();
            log.append("s", &fields, &Retention::default()).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        let report = task.await.unwrap().unwrap();

        assert_eq!(report.counts.delivered, 2);
        assert_eq!(report.counts.ack_errors, 2);
        assert_eq!(report.counts.acked, 0);
        let pending = log.inner().list_pending("s", "g", IdRange::full(), 10).await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn read_error_returns_the_partial_report() {
        let log = Arc::new(FlakyStreamLog::new(Arc::new(InMemoryStreamLog::new())));
        let consumer = consumer(&log, accept_all()).await;
        let fields = to_fields(&Event::new("a", 1, "T0")).unwrap();
        let id = log.append("s", &fields, &Retention::default()).await.unwrap();

        let task = tokio::spawn(consumer.run(CancellationToken::new()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        log.fail(Op::GroupRead);

        let err = task.await.unwrap().unwrap_err();
        let ConsumerError::Read { stream, source, report } = err;
        assert_eq!(stream, "s");
        assert!(matches!(source, LogError::Transport(_)));
        assert_eq!(report.counts.delivered, 1);
        assert_eq!(report.counts.acked, 1);
        assert_eq!(report.seen.get("s"), Some(&id));
    }
}
