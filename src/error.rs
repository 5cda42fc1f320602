use std::time::Duration;

use thiserror::Error;

/// Failure to reach the broker or to open a channel on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The broker could not be reached at the configured URL.
    #[error("broker unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    /// The connection is up but a channel could not be opened on it.
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),
    /// A thread panicked while holding the connection state.
    #[error("connection state poisoned during {0}")]
    Poisoned(&'static str),
}

/// Failure of a single channel operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Network or broker-side I/O failure; the operation may succeed on retry.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The broker refused the operation (e.g. inequivalent exchange arguments).
    #[error("rejected by broker: {0}")]
    Rejected(String),
    /// The channel was already closed.
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    /// Whether the failure is worth retrying on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transport(_) | ChannelError::Closed)
    }
}

/// Invalid input while building an event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("no identity given and payload has no string `href` field")]
    MissingIdentity,
    #[error("entity site must not be empty")]
    EmptySite,
}

/// MessagePack encode/decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Raised by a payload serializer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("serialization failed: {0}")]
pub struct SerializeError(pub String);

impl From<serde_json::Error> for SerializeError {
    fn from(err: serde_json::Error) -> Self {
        SerializeError(err.to_string())
    }
}

/// Errors surfaced by [`EventPublisher`](crate::EventPublisher).
///
/// Transport failures during the publish itself are not in here: they are
/// retried and, once the policy is exhausted, reported as
/// [`PublishOutcome::Abandoned`](crate::PublishOutcome::Abandoned).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Exchange declaration conflicts with an existing exchange.
    #[error("exchange configuration error: {0}")]
    Configuration(String),
    /// A declare on an open channel failed in transit or found the channel
    /// closed.
    #[error("channel operation failed: {0}")]
    Channel(ChannelError),
    /// No pooled producer became available in time.
    #[error("no producer available after {timeout:?}")]
    ResourceExhausted { timeout: Duration },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The background worker went away before reporting an outcome.
    #[error("publish worker stopped")]
    WorkerStopped,
}

impl From<ChannelError> for PublishError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected(msg) => PublishError::Configuration(msg),
            other => PublishError::Channel(other),
        }
    }
}

/// Errors surfaced by the request/reply client and responder.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// No correlated reply arrived before the deadline.
    #[error("no reply for {correlation_id} within {waited:?}")]
    Timeout {
        correlation_id: String,
        waited: Duration,
    },
    /// The call was cancelled through its token.
    #[error("call {correlation_id} cancelled")]
    Cancelled { correlation_id: String },
}

/// Errors surfaced by [`EventConsumer`](crate::EventConsumer).
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A configuration value was present but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}
