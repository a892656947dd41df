//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! ログサービスと時刻をトレイトにして、Redis 実装とテスト用実装を差し替えられるようにする。

pub mod clock;
pub mod stream_log;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::stream_log::StreamLog;
