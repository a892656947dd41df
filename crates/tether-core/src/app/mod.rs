//! App - アプリケーション層
//!
//! StreamLog ポートを組み合わせて 3 つのロールを実装する。
//!
//! # 主要コンポーネント
//! - **Producer**: 型付きイベントを保持ポリシー付きで append
//! - **GroupSession / ConsumerLoop**: group に参加し、読んで処理して ack
//! - **Checker**: 放置された pending を claim して再処理
//! - **PoisonPolicy**: decode できない / 配送され過ぎたエントリの扱い
//! - **DeliveryCounts**: ロールごとの集計

pub mod checker_loop;
pub mod consumer_loop;
mod delivery;
pub mod poison;
pub mod producer;
pub mod session;
pub mod status;

// 主要な型を再エクスポート
pub use self::checker_loop::{Checker, CheckerError, TickReport};
pub use self::consumer_loop::{ConsumerError, ConsumerLoop, ConsumerReport};
pub use self::poison::{DecodeErrorAction, PoisonPolicy, dead_letter_stream};
pub use self::producer::{ProduceError, Producer};
pub use self::session::{GroupSession, Received, SeenIds};
pub use self::status::DeliveryCounts;
