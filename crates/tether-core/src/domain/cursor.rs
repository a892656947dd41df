//! Cursors - group/member の読み取り開始位置

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::EntryId;

/// Where a member starts reading when it joins a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartCursor {
    /// Only entries the group has not delivered yet (`>`).
    NewOnly,
    /// Replay this member's own unacknowledged entries first (`0-0`), then new ones.
    #[default]
    Backlog,
}

/// Where a newly created group starts on its stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupStart {
    /// The whole existing stream (`0`).
    #[default]
    Beginning,
    /// Only entries appended after the group is created (`$`).
    Latest,
}

/// Cursor passed to a single group read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to the group.
    New,
    /// This member's pending entries with an id greater than the given one.
    After(EntryId),
}

impl From<StartCursor> for ReadCursor {
    fn from(start: StartCursor) -> Self {
        match start {
            StartCursor::NewOnly => ReadCursor::New,
            StartCursor::Backlog => ReadCursor::After(EntryId::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} {value:?} (expected one of: {expected})")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for StartCursor {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new-only" | ">" => Ok(StartCursor::NewOnly),
            "backlog" | "0-0" => Ok(StartCursor::Backlog),
            other => Err(UnknownVariant::new("start cursor", other, "new-only, backlog")),
        }
    }
}

impl FromStr for GroupStart {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" | "0" => Ok(GroupStart::Beginning),
            "latest" | "$" => Ok(GroupStart::Latest),
            other => Err(UnknownVariant::new("group start", other, "beginning, latest")),
        }
    }
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for ReadCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadCursor::New => f.write_str(">"),
            ReadCursor::After(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("new-only", StartCursor::NewOnly)]
    #[case(">", StartCursor::NewOnly)]
    #[case("backlog", StartCursor::Backlog)]
    #[case("0-0", StartCursor::Backlog)]
    fn start_cursor_from_str(#[case] input: &str, #[case] expected: StartCursor) {
        assert_eq!(input.parse::<StartCursor>().unwrap(), expected);
    }

    #[test]
    fn backlog_starts_reading_from_the_minimum_id() {
        assert_eq!(ReadCursor::from(StartCursor::Backlog), ReadCursor::After(EntryId::MIN));
        assert_eq!(ReadCursor::from(StartCursor::NewOnly), ReadCursor::New);
        assert_eq!(ReadCursor::After(EntryId::MIN).to_string(), "0-0");
        assert_eq!(ReadCursor::New.to_string(), ">");
    }

    #[test]
    fn unknown_group_start_is_rejected() {
        let err = "middle".parse::<GroupStart>().unwrap_err();
        assert!(err.to_string().contains("beginning, latest"));
    }
}
