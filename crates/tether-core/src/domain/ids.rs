//! Domain identifiers (strongly-typed IDs).
//!
//! # EntryId
//! ログが append 時に払い出す ID。`<millis>-<seq>` 形式で、ストリーム内で全順序を持つ。
//! - millis: append 時刻（ミリ秒）
//! - seq: 同一ミリ秒内の連番
//!
//! 派生した `Ord` はフィールド順（millis → seq）で比較するので、
//! そのまま「append 順」になる。
//!
//! # MemberName
//! consumer group 内でのメンバー名。group 内でプロセス一意である必要がある。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier assigned by the log to an appended entry.
///
/// `Default` is [`EntryId::MIN`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    millis: u64,
    seq: u64,
}

/// An entry id string that is not `<millis>` or `<millis>-<seq>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry id: {0:?}")]
pub struct InvalidEntryId(pub String);

impl EntryId {
    /// Smallest possible id (`0-0`). Rendered as `-` in range queries.
    pub const MIN: EntryId = EntryId::new(0, 0);

    /// Largest possible id. Rendered as `+` in range queries.
    pub const MAX: EntryId = EntryId::new(u64::MAX, u64::MAX);

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The id the log assigns to the next append at `now_millis`.
    ///
    /// 時計が巻き戻っても単調増加を保つ（同じ millis の seq を進める）。
    pub fn next_after(self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.seq.saturating_add(1))
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEntryId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        let millis = millis.parse().map_err(|_| invalid())?;
        let seq = seq.parse().map_err(|_| invalid())?;
        Ok(Self::new(millis, seq))
    }
}

impl TryFrom<String> for EntryId {
    type Error = InvalidEntryId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

/// Name of a member inside a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberName(String);

impl MemberName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `<prefix>-<ulid>` 形式の、プロセスごとに一意な名前を生成
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MemberName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1526919030474-55", EntryId::new(1526919030474, 55))]
    #[case("1526919030474", EntryId::new(1526919030474, 0))]
    #[case("0-0", EntryId::MIN)]
    fn parses_valid_ids(#[case] input: &str, #[case] expected: EntryId) {
        assert_eq!(input.parse::<EntryId>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("-")]
    #[case("abc-1")]
    #[case("12-")]
    #[case("1-2-3")]
    fn rejects_invalid_ids(#[case] input: &str) {
        assert!(input.parse::<EntryId>().is_err());
    }

    #[test]
    fn ids_order_by_millis_then_seq() {
        let a = EntryId::new(10, 5);
        let b = EntryId::new(11, 0);
        let c = EntryId::new(11, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(EntryId::MIN < a);
        assert!(c < EntryId::MAX);
    }

    #[test]
    fn next_after_stays_monotonic_when_clock_goes_backwards() {
        let last = EntryId::new(100, 3);
        assert_eq!(last.next_after(101), EntryId::new(101, 0));
        assert_eq!(last.next_after(100), EntryId::new(100, 4));
        assert_eq!(last.next_after(50), EntryId::new(100, 4));
    }

    #[test]
    fn entry_id_serializes_as_string() {
        let id = EntryId::new(42, 7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"42-7\"");
        let back: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_member_names_are_unique() {
        let a = MemberName::generate("consumer");
        let b = MemberName::generate("consumer");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("consumer-"));
    }
}
