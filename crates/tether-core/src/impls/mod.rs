//! Impls - StreamLog の実装
//!
//! - **RedisStreamLog**: Redis Streams（本番用）
//! - **InMemoryStreamLog**: プロセス内（開発用・テスト用）

#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;
pub mod redis_stream;

pub use self::memory::InMemoryStreamLog;
pub use self::redis_stream::RedisStreamLog;
