use thiserror::Error;

use crate::model::Platform;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("send rejected: {0}")]
    Rejected(String),
    #[error("{platform} does not support {operation}")]
    Unsupported { platform: Platform, operation: &'static str },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Raised for one record; the rest of the batch keeps going.
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("record is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("channel id {0} is not in the channel table")]
    UnknownChannel(i64),
    #[error("record is not valid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event type '{0}'")]
    UnknownType(String),
}

/// Pre-flight rejections of the send pipeline. No state is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyText,
    #[error("no conversation selected")]
    NoTarget,
    #[error("conversation {0} is not loaded")]
    UnknownConversation(String),
    #[error("no adapter configured for {0}")]
    NoAdapter(Platform),
    #[error("inbox is shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid url '{url}': {source}")]
    Url { url: String, source: url::ParseError },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
}
