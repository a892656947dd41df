//! Producer - 型付きイベントの append
//!
//! append のたびに保持ポリシー（長さ / 経過時間）を適用する。
//! append の失敗はリトライせずに呼び出し元へ返す。

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{EntryId, LogError, Retention};
use crate::ports::StreamLog;
use crate::typed::{FieldError, Payload, to_fields};

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("payload cannot be encoded: {0}")]
    Encode(#[from] FieldError),

    #[error("append to stream '{stream}' failed: {source}")]
    Append {
        stream: String,
        #[source]
        source: LogError,
    },
}

pub struct Producer<T> {
    log: Arc<dyn StreamLog>,
    stream: String,
    retention: Retention,
    _payload: PhantomData<fn(T)>,
}

impl<T: Payload> Producer<T> {
    pub fn new(log: Arc<dyn StreamLog>, stream: impl Into<String>, retention: Retention) -> Self {
        Self {
            log,
            stream: stream.into(),
            retention,
            _payload: PhantomData,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Append one event. The entry is visible to group reads as soon as this returns.
    pub async fn append(&self, event: &T) -> Result<EntryId, ProduceError> {
        let fields = to_fields(event)?;
        let id = self
            .log
            .append(&self.stream, &fields, &self.retention)
            .await
            .map_err(|source| ProduceError::Append {
                stream: self.stream.clone(),
                source,
            })?;
        debug!(stream = %self.stream, id = %id, "appended");
        Ok(id)
    }

    /// Append `events` one per `pace` until they run out, `cancel` fires, or an append fails.
    ///
    /// Returns how many were appended.
    pub async fn run<I>(
        &self,
        events: I,
        pace: Duration,
        cancel: &CancellationToken,
    ) -> Result<u64, ProduceError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
    {
        // pace 0 は待たずに連続で送る
        let mut ticker = (!pace.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(pace);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut sent = 0;

        for event in events {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            } else if cancel.is_cancelled() {
                break;
            }
            self.append(&event).await?;
            sent += 1;
        }

        info!(stream = %self.stream, sent, "producer finished");
        Ok(sent)
    }
}
