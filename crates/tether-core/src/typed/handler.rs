//! Handler trait - デコード済みメッセージを処理する注入ポイント
//!
//! consumer と checker は同じ種類のハンドラを使う。
//! 成功なら ack、失敗なら ack せずに pending に残す（リトライは checker の回収に任せる）。
//!
//! # 使用例
//! ```ignore
//! struct Audit;
//!
//! #[async_trait]
//! impl Handler<Event> for Audit {
//!     async fn handle(&self, message: &Message<Event>) -> Result<(), HandlerError> {
//!         println!("{} priority={}", message.data.name, message.data.priority);
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use super::message::Message;
use super::payload::Payload;
use crate::domain::HandlerError;

#[async_trait]
pub trait Handler<T: Payload>: Send + Sync {
    async fn handle(&self, message: &Message<T>) -> Result<(), HandlerError>;
}

/// Plain closures work as handlers too.
#[async_trait]
impl<T, F> Handler<T> for F
where
    T: Payload,
    F: Fn(&Message<T>) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &Message<T>) -> Result<(), HandlerError> {
        self(message)
    }
}
