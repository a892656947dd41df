//! tether-core
//!
//! At-least-once delivery over an append-only stream log using consumer groups.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, entry, pending, cursor, retention, event, errors）
//! - **ports**: 抽象化レイヤー（StreamLog, Clock）
//! - **impls**: StreamLog の実装（Redis, in-memory）
//! - **typed**: 型付き payload（Payload, Handler, codec, Message / Decoded）
//! - **app**: ロール（Producer, ConsumerLoop, Checker）と poison policy
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{
    Checker, ConsumerLoop, ConsumerReport, DeliveryCounts, GroupSession, PoisonPolicy, Producer,
};
pub use config::TetherConfig;
pub use domain::{EntryId, Event, GroupRef, HandlerError, LogError, MemberName, StreamEntry};
pub use ports::StreamLog;
pub use typed::{Handler, Message, Payload};
