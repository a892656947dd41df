//! Poison - 処理できないエントリの扱い
//!
//! # 2 つの判定
//! - decode 失敗: `on_decode_error` に従う（dead-letter / ack / leave-pending）
//! - 配送回数超過: `max_deliveries` を超えたら checker が dead-letter する
//!
//! dead-letter 先は `<stream>:dead`。元のフィールドに `dead.*` メタデータを足して append し、
//! append に成功してから元エントリを ack する。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{EntryId, FieldMap, UnknownVariant};

/// What to do with an entry whose fields do not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeErrorAction {
    /// `<stream>:dead` に退避してから ack
    #[default]
    DeadLetter,
    /// そのまま ack（捨てる）
    Ack,
    /// pending に残す。checker が拾い続けるので無限ループし得る
    LeavePending,
}

impl FromStr for DecodeErrorAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dead-letter" => Ok(DecodeErrorAction::DeadLetter),
            "ack" => Ok(DecodeErrorAction::Ack),
            "leave-pending" => Ok(DecodeErrorAction::LeavePending),
            other => Err(UnknownVariant::new(
                "decode error action",
                other,
                "dead-letter, ack, leave-pending",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoisonPolicy {
    pub on_decode_error: DecodeErrorAction,
    /// None なら回数で打ち切らない
    pub max_deliveries: Option<u64>,
}

impl PoisonPolicy {
    #[must_use]
    pub fn with_decode_error(mut self, action: DecodeErrorAction) -> Self {
        self.on_decode_error = action;
        self
    }

    #[must_use]
    pub fn with_max_deliveries(mut self, max: u64) -> Self {
        self.max_deliveries = Some(max);
        self
    }

    /// Whether an entry delivered `deliveries` times is over the cap.
    pub fn exceeds(&self, deliveries: u64) -> bool {
        self.max_deliveries.is_some_and(|max| deliveries > max)
    }
}

pub fn dead_letter_stream(stream: &str) -> String {
    format!("{stream}:dead")
}

/// Fields of the dead-letter entry for `id`.
pub(crate) fn dead_letter_fields(
    raw: &FieldMap,
    stream: &str,
    id: EntryId,
    reason: &str,
    deliveries: Option<u64>,
) -> FieldMap {
    let mut fields = raw.clone();
    fields.insert("dead.source_id".to_string(), id.to_string());
    fields.insert("dead.stream".to_string(), stream.to_string());
    fields.insert("dead.reason".to_string(), reason.to_string());
    // backlog 読み取りでは配送回数が分からない
    if let Some(deliveries) = deliveries {
        fields.insert("dead.deliveries".to_string(), deliveries.to_string());
    }
    fields
}
