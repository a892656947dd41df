//! Message - デコード済みのイベントエンベロープ
//!
//! 生のエントリ（`StreamEntry`）を型付き payload にデコードした結果は、
//! 成功（`Decoded::Ok`）かパース失敗（`Decoded::ParseError`）のタグ付き値になる。
//! パース失敗も「配送済み」なので、呼び出し側が ack するか pending に残すかを決める。

use super::codec::{FieldError, from_fields};
use super::payload::Payload;
use crate::domain::{EntryId, FieldMap, StreamEntry};

/// A decoded event together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub id: EntryId,
    pub stream: String,
    pub data: T,
}

/// A delivered entry whose fields did not match the payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub id: EntryId,
    pub stream: String,
    pub raw: FieldMap,
    pub error: FieldError,
}

/// Result of the schema-checked decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Ok(Message<T>),
    ParseError(ParseFailure),
}

impl<T> Decoded<T> {
    pub fn id(&self) -> EntryId {
        match self {
            Decoded::Ok(message) => message.id,
            Decoded::ParseError(failure) => failure.id,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Decoded::Ok(_))
    }
}

/// Decode a raw entry read from `stream`.
pub fn decode<T: Payload>(stream: &str, entry: StreamEntry) -> Decoded<T> {
    match from_fields::<T>(&entry.fields) {
        Ok(data) => Decoded::Ok(Message {
            id: entry.id,
            stream: stream.to_string(),
            data,
        }),
        Err(error) => Decoded::ParseError(ParseFailure {
            id: entry.id,
            stream: stream.to_string(),
            raw: entry.fields,
            error,
        }),
    }
}
