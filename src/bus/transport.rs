//! Transport traits: the slice of AMQP 0-9-1 this crate relies on.

use std::fmt;
use std::time::Duration;

use crate::error::{ChannelError, ConnectionError};

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// Durable, never auto-deleted exchange: what every publisher declares.
    pub fn durable(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
        }
    }
}

/// Parameters of a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Plain named queue with broker defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Private reply queue that disappears with its consumer.
    pub fn exclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Message properties the crate reads or writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Delivery mode 2.
    pub persistent: bool,
}

impl MessageProperties {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// A message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// Opens connections to a broker.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self, url: &str) -> Result<Self::Connection, ConnectionError>;
}

/// A live broker connection.
pub trait Connection: Send + Sync {
    type Channel: Channel;

    fn is_open(&self) -> bool;

    fn open_channel(&self) -> Result<Self::Channel, ConnectionError>;
}

/// A channel multiplexed on a connection.
///
/// A channel that returns [`ChannelError::Rejected`] is closed by the broker,
/// as in AMQP; callers must obtain a new one.
pub trait Channel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Declare an exchange. Redeclaring with identical parameters is a no-op.
    fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), ChannelError>;

    /// Declare a queue. Redeclaring with identical parameters is a no-op.
    fn declare_queue(&self, queue: &QueueSpec) -> Result<(), ChannelError>;

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), ChannelError>;

    /// Publish to an exchange; `""` is the default exchange, which routes by
    /// queue name.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), ChannelError>;

    /// Take the next message from a queue with auto-acknowledge, blocking
    /// until one arrives or the timeout expires.
    fn consume(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, ChannelError>;
}

/// Channel type for a connector.
pub type ChannelOf<C> = <<C as Connector>::Connection as Connection>::Channel;
