//! Status - 配送の集計
//!
//! consumer / checker がそれぞれ持つカウンタ。ログ出力と終了時レポートに使う。

use serde::{Deserialize, Serialize};

/// Per-role delivery counters.
///
/// - `delivered`: ハンドラ（または poison 判定）まで届いたエントリ数
/// - `acked`: ack が 1 件以上を取り除いた数
/// - `failed`: ハンドラが失敗し pending に残した数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub delivered: u64,
    pub acked: u64,
    pub failed: u64,
    pub parse_errors: u64,
    pub ack_errors: u64,
    pub dead_lettered: u64,
}

impl DeliveryCounts {
    pub fn merge(&mut self, other: &DeliveryCounts) {
        self.delivered += other.delivered;
        self.acked += other.acked;
        self.failed += other.failed;
        self.parse_errors += other.parse_errors;
        self.ack_errors += other.ack_errors;
        self.dead_lettered += other.dead_lettered;
    }
}
