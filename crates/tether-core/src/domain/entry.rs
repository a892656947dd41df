//! StreamEntry - ログ上の 1 エントリ（生のフィールド表現）

use std::collections::BTreeMap;

use super::ids::EntryId;

/// Flat mapping of field name to value, as stored by the log.
///
/// BTreeMap なので順序が決定的（テストやログ出力が安定する）。
pub type FieldMap = BTreeMap<String, String>;

/// One entry read from a stream: the id assigned on append plus its raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: FieldMap,
}

impl StreamEntry {
    pub fn new(id: EntryId, fields: FieldMap) -> Self {
        Self { id, fields }
    }
}

/// A (stream, group) pair: the address every group operation works against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupRef {
    pub stream: String,
    pub group: String,
}

impl GroupRef {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
        }
    }
}
