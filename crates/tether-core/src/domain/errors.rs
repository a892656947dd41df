//! Errors - ログ操作とハンドラ処理のエラー
//!
//! # 分類
//! - LogError: ログサービス側の失敗（到達不能、group 不在、想定外の応答）
//! - HandlerError: 業務処理の失敗（エントリは pending のまま残す）
//!
//! decode 失敗は `typed::FieldError`、ロールごとの致命的エラーは app 層にある。

use super::ids::InvalidEntryId;

/// Failure reported by the log service port.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log service unreachable: {0}")]
    Transport(String),

    #[error("consumer group '{group}' does not exist on stream '{stream}'")]
    NoGroup { stream: String, group: String },

    #[error("unexpected reply from log service: {0}")]
    Protocol(String),

    #[error(transparent)]
    InvalidId(#[from] InvalidEntryId),
}

impl LogError {
    pub fn no_group(stream: &str, group: &str) -> Self {
        LogError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, LogError::Transport(_))
    }
}

/// A handler rejected a message.
///
/// 失敗がリトライで直るかどうかはハンドラ側にも分からないので、種別は持たない。
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn handler_error_keeps_its_source() {
        let io = std::io::Error::other("disk full");
        let err = HandlerError::with_source("could not persist", io);
        assert_eq!(err.to_string(), "could not persist");
        assert!(err.source().unwrap().to_string().contains("disk full"));
    }

    #[test]
    fn no_group_names_stream_and_group() {
        let err = LogError::no_group("main-stream", "group-name");
        let msg = err.to_string();
        assert!(msg.contains("main-stream"));
        assert!(msg.contains("group-name"));
        assert!(!err.is_transport());
    }
}
