//! Config - 接続先と各ロールの設定
//!
//! TOML で読み込み、書かれていない項目はすべて既定値で埋める。
//!
//! ```toml
//! broker = "redis://127.0.0.1:6379"
//! stream = "main-stream"
//! group = "group-name"
//!
//! [consumer]
//! member = "consumer-name"
//! start = "backlog"
//! block = "5s"
//!
//! [checker]
//! min_idle = "10s"
//! interval = "1s"
//!
//! [producer]
//! max_len = 100000
//! pace = "200ms"
//!
//! [poison]
//! on_decode_error = "dead-letter"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::PoisonPolicy;
use crate::domain::{GroupRef, GroupStart, MemberName, Retention, StartCursor};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Log service address.
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default)]
    pub consumer: ConsumerSettings,

    #[serde(default)]
    pub checker: CheckerSettings,

    #[serde(default)]
    pub producer: ProducerSettings,

    #[serde(default)]
    pub poison: PoisonPolicy,
}

fn default_broker() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream() -> String {
    "main-stream".to_string()
}

fn default_group() -> String {
    "group-name".to_string()
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            stream: default_stream(),
            group: default_group(),
            consumer: ConsumerSettings::default(),
            checker: CheckerSettings::default(),
            producer: ProducerSettings::default(),
            poison: PoisonPolicy::default(),
        }
    }
}

impl TetherConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the roles cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.stream.is_empty() {
            return invalid("stream must not be empty");
        }
        if self.group.is_empty() {
            return invalid("group must not be empty");
        }
        if self.consumer.count == 0 {
            return invalid("consumer.count must be at least 1");
        }
        if self.checker.batch == 0 {
            return invalid("checker.batch must be at least 1");
        }
        if self.checker.interval.is_zero() {
            return invalid("checker.interval must be positive");
        }
        if self.producer.max_len == Some(0) {
            return invalid("producer.max_len must be at least 1");
        }
        Ok(())
    }

    pub fn group_ref(&self) -> GroupRef {
        GroupRef::new(self.stream.clone(), self.group.clone())
    }

    #[must_use]
    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = broker.into();
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    #[must_use]
    pub fn with_poison(mut self, poison: PoisonPolicy) -> Self {
        self.poison = poison;
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: ConsumerSettings) -> Self {
        self.consumer = consumer;
        self
    }

    #[must_use]
    pub fn with_checker(mut self, checker: CheckerSettings) -> Self {
        self.checker = checker;
        self
    }

    #[must_use]
    pub fn with_producer(mut self, producer: ProducerSettings) -> Self {
        self.producer = producer;
        self
    }
}

/// Settings for a group member reading new entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// group 内で一意であること
    #[serde(default = "default_consumer_member")]
    pub member: MemberName,

    #[serde(default)]
    pub start: StartCursor,

    /// group が無いときに作る位置
    #[serde(default)]
    pub group_start: GroupStart,

    #[serde(default = "default_block", with = "humantime_serde")]
    pub block: Duration,

    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_consumer_member() -> MemberName {
    MemberName::from("consumer-name")
}

fn default_block() -> Duration {
    Duration::from_secs(5)
}

fn default_count() -> usize {
    1
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            member: default_consumer_member(),
            start: StartCursor::default(),
            group_start: GroupStart::default(),
            block: default_block(),
            count: default_count(),
        }
    }
}

impl ConsumerSettings {
    #[must_use]
    pub fn with_member(mut self, member: impl Into<MemberName>) -> Self {
        self.member = member.into();
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: StartCursor) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn with_group_start(mut self, group_start: GroupStart) -> Self {
        self.group_start = group_start;
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }
}

/// Settings for the pending-entry reclaimer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerSettings {
    #[serde(default = "default_checker_member")]
    pub member: MemberName,

    /// これより長く pending のエントリだけを回収する
    #[serde(default = "default_min_idle", with = "humantime_serde")]
    pub min_idle: Duration,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// 1 tick で調べる pending の最大件数
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_checker_member() -> MemberName {
    MemberName::from("checker-consumer-name")
}

fn default_min_idle() -> Duration {
    Duration::from_secs(10)
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_batch() -> usize {
    10
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            member: default_checker_member(),
            min_idle: default_min_idle(),
            interval: default_interval(),
            batch: default_batch(),
        }
    }
}

impl CheckerSettings {
    #[must_use]
    pub fn with_member(mut self, member: impl Into<MemberName>) -> Self {
        self.member = member.into();
        self
    }

    #[must_use]
    pub fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSettings {
    #[serde(default = "default_max_len")]
    pub max_len: Option<usize>,

    #[serde(default = "default_approximate")]
    pub approximate: bool,

    /// 既定では無効。checker の min_idle より短いと、回収前に pending が消える
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,

    /// Delay between two appends.
    #[serde(default = "default_pace", with = "humantime_serde")]
    pub pace: Duration,

    #[serde(default = "default_produce_count")]
    pub count: u64,
}

fn default_max_len() -> Option<usize> {
    Some(100_000)
}

fn default_approximate() -> bool {
    true
}

fn default_pace() -> Duration {
    Duration::from_millis(200)
}

fn default_produce_count() -> u64 {
    10_000
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            approximate: default_approximate(),
            max_age: None,
            pace: default_pace(),
            count: default_produce_count(),
        }
    }
}

impl ProducerSettings {
    pub fn retention(&self) -> Retention {
        let mut retention = Retention::unbounded();
        if let Some(max_len) = self.max_len {
            retention = retention.with_max_len(max_len, self.approximate);
        }
        if let Some(max_age) = self.max_age {
            retention = retention.with_max_age(max_age);
        }
        retention.approximate = self.approximate;
        retention
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}
