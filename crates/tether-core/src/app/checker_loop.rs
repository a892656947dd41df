//! Checker - 放置された pending エントリの回収
//!
//! # フロー（1 tick）
//! 1. list_pending で pending を古い順に最大 batch 件取得
//! 2. 取得した ID をまとめて claim（min_idle 未満のものはログ側が原子的に除外する）
//! 3. claim できたエントリを consumer と同じ手順で再処理
//! 4. 成功なら ack、失敗なら次の tick 以降に持ち越し
//!
//! claim が空なのは定常状態で、エラーではない。
//! list / claim の失敗はその tick だけを終わらせ、ループは続ける。
//!
//! # 設計原則
//! - 所有権の正本はログ側。複数の checker が同時に動いても claim の勝者は 1 つ
//! - `max_deliveries` を超えたエントリは再処理せず dead-letter に退避する

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::Delivery;
use super::poison::PoisonPolicy;
use super::status::DeliveryCounts;
use crate::config::CheckerSettings;
use crate::domain::{EntryId, GroupRef, IdRange, LogError, MemberName};
use crate::ports::StreamLog;
use crate::typed::{Handler, Payload};

/// interval(0) は panic するので下限を設ける
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub listed: usize,
    pub claimed: usize,
    pub counts: DeliveryCounts,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("listing pending entries of {stream}/{group} failed: {source}")]
    List {
        stream: String,
        group: String,
        #[source]
        source: LogError,
    },

    #[error("claiming pending entries of {stream}/{group} failed: {source}")]
    Claim {
        stream: String,
        group: String,
        #[source]
        source: LogError,
    },
}

pub struct Checker<T> {
    log: Arc<dyn StreamLog>,
    member: MemberName,
    min_idle: Duration,
    interval: Duration,
    batch: usize,
    delivery: Delivery<T>,
    counts: DeliveryCounts,
}

impl<T: Payload> Checker<T> {
    pub fn new(
        log: Arc<dyn StreamLog>,
        group: GroupRef,
        settings: &CheckerSettings,
        handler: Arc<dyn Handler<T>>,
        policy: PoisonPolicy,
    ) -> Self {
        let delivery = Delivery::new(Arc::clone(&log), group, handler, policy);
        Self {
            log,
            member: settings.member.clone(),
            min_idle: settings.min_idle,
            interval: settings.interval.max(MIN_INTERVAL),
            batch: settings.batch.max(1),
            delivery,
            counts: DeliveryCounts::default(),
        }
    }

    pub fn member(&self) -> &MemberName {
        &self.member
    }

    /// Totals over every tick run so far.
    pub fn counts(&self) -> DeliveryCounts {
        self.counts
    }

    /// List, claim and reprocess once.
    pub async fn tick(&mut self) -> Result<TickReport, CheckerError> {
        let group = self.delivery.group().clone();

        let pending = self
            .log
            .list_pending(&group.stream, &group.group, IdRange::full(), self.batch)
            .await
            .map_err(|source| CheckerError::List {
                stream: group.stream.clone(),
                group: group.group.clone(),
                source,
            })?;
        let mut report = TickReport {
            listed: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let ids: Vec<EntryId> = pending.iter().map(|p| p.id).collect();
        let claimed = self
            .log
            .claim(&group.stream, &group.group, &self.member, self.min_idle, &ids)
            .await
            .map_err(|source| CheckerError::Claim {
                stream: group.stream.clone(),
                group: group.group.clone(),
                source,
            })?;
        report.claimed = claimed.len();
        if claimed.is_empty() {
            debug!(stream = %group.stream, listed = report.listed, "nothing idle long enough");
            return Ok(report);
        }
        info!(
            stream = %group.stream,
            member = %self.member,
            listed = report.listed,
            claimed = report.claimed,
            "reclaimed idle entries"
        );

        // claim で配送回数が 1 増える
        let deliveries: HashMap<EntryId, u64> =
            pending.iter().map(|p| (p.id, p.deliveries + 1)).collect();
        for entry in claimed {
            let count = deliveries.get(&entry.id).copied().unwrap_or(1);
            if self.delivery.policy().exceeds(count) {
                self.delivery
                    .retire(entry, count, &mut report.counts)
                    .await;
            } else {
                self.delivery
                    .deliver(entry, Some(count), &mut report.counts)
                    .await;
            }
        }

        self.counts.merge(&report.counts);
        Ok(report)
    }

    /// Tick every `interval` until `cancel` fires. The tick in progress always finishes.
    pub async fn run(mut self, cancel: CancellationToken) -> DeliveryCounts {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.tick().await {
                warn!(error = %err, "checker tick aborted");
            }
        }

        info!(
            member = %self.member,
            delivered = self.counts.delivered,
            acked = self.counts.acked,
            dead_lettered = self.counts.dead_lettered,
            "checker stopped"
        );
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, GroupStart, HandlerError, ReadCursor, Retention};
    use crate::impls::InMemoryStreamLog;
    use crate::impls::flaky::{FlakyStreamLog, Op};
    use crate::ports::ManualClock;
    use crate::typed::{Message, to_fields};

    const STREAM: &str = "s";
    const GROUP: &str = "g";

    fn accept_all() -> Arc<dyn Handler<Event>> {
        Arc::new(|_: &Message<Event>| Ok::<(), HandlerError>(()))
    }

    async fn abandoned(clock: &Arc<ManualClock>) -> (Arc<InMemoryStreamLog>, EntryId) {
        let log = Arc::new(InMemoryStreamLog::with_clock(clock.clone()));
        log.create_group(STREAM, GROUP, GroupStart::Beginning)
            .await
            .unwrap();
        let fields = to_fields(&Event::new("alice", 3, "T0")).unwrap();
        let id = log.append(STREAM, &fields, &Retention::default()).await.unwrap();
        log.group_read(STREAM, GROUP, &MemberName::from("crashed"), ReadCursor::New, 1, None)
            .await
            .unwrap();
        (log, id)
    }

    fn checker(log: &Arc<InMemoryStreamLog>, policy: PoisonPolicy) -> Checker<Event> {
        Checker::new(
            log.clone(),
            GroupRef::new(STREAM, GROUP),
            &CheckerSettings::default(),
            accept_all(),
            policy,
        )
    }

    #[tokio::test]
    async fn young_entries_are_listed_but_not_claimed() {
        let clock = Arc::new(ManualClock::default());
        let (log, _) = abandoned(&clock).await;
        clock.advance(Duration::from_secs(9));

        let report = checker(&log, PoisonPolicy::default()).tick().await.unwrap();
        assert_eq!(report.listed, 1);
        assert_eq!(report.claimed, 0);
    }

    #[tokio::test]
    async fn idle_entries_are_reprocessed_and_acked() {
        let clock = Arc::new(ManualClock::default());
        let (log, _) = abandoned(&clock).await;
        clock.advance(Duration::from_secs(11));

        let mut checker = checker(&log, PoisonPolicy::default());
        let report = checker.tick().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.counts.acked, 1);
        assert_eq!(checker.counts().acked, 1);

        let pending = log.list_pending(STREAM, GROUP, IdRange::full(), 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn over_delivered_entries_are_dead_lettered() {
        let clock = Arc::new(ManualClock::default());
        let (log, id) = abandoned(&clock).await;
        clock.advance(Duration::from_secs(11));

        // 1 回目の配送 + claim で 2 回目 → 上限 1 を超える
        let mut checker = checker(&log, PoisonPolicy::default().with_max_deliveries(1));
        let report = checker.tick().await.unwrap();
        assert_eq!(report.counts.dead_lettered, 1);

        let parked = log.entries("s:dead").await;
        assert_eq!(parked[0].fields["dead.source_id"], id.to_string());
        assert_eq!(parked[0].fields["dead.deliveries"], "2");
    }

    #[tokio::test]
    async fn missing_group_aborts_the_tick() {
        let log = Arc::new(InMemoryStreamLog::new());
        let err = checker(&log, PoisonPolicy::default()).tick().await.unwrap_err();
        assert!(matches!(err, CheckerError::List { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let log = Arc::new(InMemoryStreamLog::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(checker(&log, PoisonPolicy::default()).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        let counts = task.await.unwrap();
        assert_eq!(counts, DeliveryCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped() {
        let log = Arc::new(InMemoryStreamLog::new());
        let settings = CheckerSettings::default().with_interval(Duration::ZERO);
        let checker = Checker::<Event>::new(
            log,
            GroupRef::new(STREAM, GROUP),
            &settings,
            accept_all(),
            PoisonPolicy::default(),
        );
        assert_eq!(checker.interval, MIN_INTERVAL);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(checker.run(cancel).await, DeliveryCounts::default());
    }

    fn flaky_checker(log: &Arc<FlakyStreamLog>) -> Checker<Event> {
        Checker::new(
            log.clone(),
            GroupRef::new(STREAM, GROUP),
            &CheckerSettings::default().with_interval(Duration::from_secs(1)),
            accept_all(),
            PoisonPolicy::default(),
        )
    }

    #[tokio::test]
    async fn claim_error_ends_only_that_tick() {
        let clock = Arc::new(ManualClock::default());
        let (inner, id) = abandoned(&clock).await;
        clock.advance(Duration::from_secs(11));
        let log = Arc::new(FlakyStreamLog::new(inner));
        let mut checker = flaky_checker(&log);

        log.fail(Op::Claim);
        let err = checker.tick().await.unwrap_err();
        assert!(matches!(err, CheckerError::Claim { .. }));
        assert_eq!(checker.counts(), DeliveryCounts::default());
        let pending = log.inner().list_pending(STREAM, GROUP, IdRange::full(), 10).await.unwrap();
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].owner, MemberName::from("crashed"));

        log.heal(Op::Claim);
        let report = checker.tick().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(checker.counts().acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_ticking_after_claim_errors() {
        let clock = Arc::new(ManualClock::default());
        let (inner, _) = abandoned(&clock).await;
        clock.advance(Duration::from_secs(11));
        let log = Arc::new(FlakyStreamLog::new(inner));
        log.fail(Op::Claim);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(flaky_checker(&log).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!task.is_finished());

        log.heal(Op::Claim);
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let counts = task.await.unwrap();
        assert_eq!(counts.acked, 1);
        assert!(log.inner().list_pending(STREAM, GROUP, IdRange::full(), 10).await.unwrap().is_empty());
    }
}
