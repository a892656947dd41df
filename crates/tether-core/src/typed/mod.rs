//! Typed - 型付き payload API
//!
//! # 二層構造
//! - **表層（Typed）**: `Payload`, `Message<T>`, `Handler<T>` - 型安全
//! - **内部（Raw）**: `FieldMap` - ログ上のフラットな文字列マップ
//!
//! 両者の間は `codec`（エンコード）と `message::decode`（スキーマチェック付きデコード）がつなぐ。

pub mod codec;
pub mod handler;
pub mod message;
pub mod payload;

pub use self::codec::{FieldError, from_fields, to_fields};
pub use self::handler::Handler;
pub use self::message::{Decoded, Message, ParseFailure, decode};
pub use self::payload::Payload;
