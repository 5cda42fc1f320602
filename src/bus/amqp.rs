//! AMQP 0-9-1 transport backed by `lapin`.
//!
//! `lapin` is async; this transport drives it on a private tokio runtime with
//! `block_on`, so its methods must not be called from inside another tokio
//! runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, ConnectionProperties, Consumer};
use tokio::runtime::Runtime;
use tracing::debug;

use super::transport::{
    Channel, Connection, Connector, Delivery, ExchangeKind, ExchangeSpec, MessageProperties,
    QueueSpec,
};
use crate::error::{ChannelError, ConnectionError};

const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Opens `lapin` connections.
#[derive(Clone)]
pub struct AmqpConnector {
    runtime: Arc<Runtime>,
}

impl AmqpConnector {
    pub fn new() -> Result<Self, ConnectionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("eventcast-amqp")
            .enable_all()
            .build()
            .map_err(|err| ConnectionError::ChannelOpen(format!("runtime: {}", err)))?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Connector for AmqpConnector {
    type Connection = AmqpConnection;

    fn connect(&self, url: &str) -> Result<AmqpConnection, ConnectionError> {
        let connection = self
            .block_on(lapin::Connection::connect(url, ConnectionProperties::default()))
            .map_err(|err| ConnectionError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(AmqpConnection {
            connector: self.clone(),
            inner: connection,
        })
    }
}

pub struct AmqpConnection {
    connector: AmqpConnector,
    inner: lapin::Connection,
}

impl Connection for AmqpConnection {
    type Channel = AmqpChannel;

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    fn open_channel(&self) -> Result<AmqpChannel, ConnectionError> {
        let channel = self
            .connector
            .block_on(self.inner.create_channel())
            .map_err(|err| ConnectionError::ChannelOpen(err.to_string()))?;
        Ok(AmqpChannel {
            connector: self.connector.clone(),
            inner: channel,
            consumers: Mutex::new(HashMap::new()),
        })
    }
}

pub struct AmqpChannel {
    connector: AmqpConnector,
    inner: lapin::Channel,
    /// One no-ack consumer per queue, started on first `consume`.
    consumers: Mutex<HashMap<String, Consumer>>,
}

impl AmqpChannel {
    fn take_consumer(&self, queue: &str) -> Result<Consumer, ChannelError> {
        let cached = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(queue);
        if let Some(consumer) = cached {
            return Ok(consumer);
        }

        debug!(queue, "starting consumer");
        self.connector
            .block_on(self.inner.basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            ))
            .map_err(channel_error)
    }

    fn return_consumer(&self, queue: &str, consumer: Consumer) {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_string(), consumer);
    }
}

impl Channel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), ChannelError> {
        let options = ExchangeDeclareOptions {
            durable: exchange.durable,
            auto_delete: exchange.auto_delete,
            ..ExchangeDeclareOptions::default()
        };
        self.connector
            .block_on(self.inner.exchange_declare(
                &exchange.name,
                lapin_kind(exchange.kind),
                options,
                FieldTable::default(),
            ))
            .map_err(channel_error)
    }

    fn declare_queue(&self, queue: &QueueSpec) -> Result<(), ChannelError> {
        let options = QueueDeclareOptions {
            durable: queue.durable,
            exclusive: queue.exclusive,
            auto_delete: queue.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.connector
            .block_on(
                self.inner
                    .queue_declare(&queue.name, options, FieldTable::default()),
            )
            .map(|_| ())
            .map_err(channel_error)
    }

    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ChannelError> {
        self.connector
            .block_on(self.inner.queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            ))
            .map_err(channel_error)
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), ChannelError> {
        let properties = basic_properties(properties);
        self.connector
            .block_on(async {
                self.inner
                    .basic_publish(
                        exchange,
                        routing_key,
                        BasicPublishOptions::default(),
                        body,
                        properties,
                    )
                    .await?
                    .await
            })
            .map(|_| ())
            .map_err(channel_error)
    }

    fn consume(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let mut consumer = self.take_consumer(queue)?;
        let next = self
            .connector
            .block_on(async { tokio::time::timeout(timeout, consumer.next()).await });

        match next {
            Err(_elapsed) => {
                self.return_consumer(queue, consumer);
                Ok(None)
            }
            Ok(None) => Err(ChannelError::Closed),
            Ok(Some(Err(err))) => Err(channel_error(err)),
            Ok(Some(Ok(delivery))) => {
                self.return_consumer(queue, consumer);
                Ok(Some(Delivery {
                    exchange: delivery.exchange.as_str().to_string(),
                    routing_key: delivery.routing_key.as_str().to_string(),
                    properties: message_properties(&delivery.properties),
                    body: delivery.data,
                }))
            }
        }
    }
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

fn channel_error(err: lapin::Error) -> ChannelError {
    match err {
        lapin::Error::ProtocolError(amqp) => ChannelError::Rejected(amqp.to_string()),
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            ChannelError::Closed
        }
        other => ChannelError::Transport(other.to_string()),
    }
}

fn basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default();
    if let Some(content_type) = &properties.content_type {
        basic = basic.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(correlation_id) = &properties.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(reply_to) = &properties.reply_to {
        basic = basic.with_reply_to(ShortString::from(reply_to.clone()));
    }
    if properties.persistent {
        basic = basic.with_delivery_mode(DELIVERY_MODE_PERSISTENT);
    }
    basic
}

fn message_properties(basic: &BasicProperties) -> MessageProperties {
    MessageProperties {
        content_type: basic.content_type().as_ref().map(|s| s.as_str().to_string()),
        correlation_id: basic.correlation_id().as_ref().map(|s| s.as_str().to_string()),
        reply_to: basic.reply_to().as_ref().map(|s| s.as_str().to_string()),
        persistent: *basic.delivery_mode() == Some(DELIVERY_MODE_PERSISTENT),
    }
}
