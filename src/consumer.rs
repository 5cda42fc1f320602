//! Reading events back off a bound queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bus::{Channel, ConnectionManager, Connector, ExchangeKind, ExchangeSpec, QueueSpec};
use crate::codec;
use crate::envelope::EventEnvelope;
use crate::error::ConsumeError;

/// A queue bound to an event exchange by a routing key pattern.
///
/// Patterns follow AMQP topic rules, so `book.*` receives every book event
/// and `#.deleted` every deletion.
pub struct EventConsumer<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    exchange: String,
    queue: String,
    routing_key: String,
}

impl<C: Connector> EventConsumer<C> {
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn ensure_exchange(&self, kind: ExchangeKind) -> Result<(), ConsumeError> {
        let connected = self.manager.get_connection()?;
        connected
            .channel
            .declare_exchange(&ExchangeSpec::durable(&self.exchange, kind))?;
        Ok(())
    }

    /// Declare the queue and bind it to the exchange.
    pub fn ensure_queue(&self) -> Result<(), ConsumeError> {
        let connected = self.manager.get_connection()?;
        connected.channel.declare_queue(&QueueSpec::named(&self.queue))?;
        connected
            .channel
            .bind_queue(&self.queue, &self.exchange, &self.routing_key)?;
        debug!(
            queue = %self.queue,
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            "queue bound"
        );
        Ok(())
    }

    /// Next envelope on the queue, or `None` after `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Result<Option<EventEnvelope>, ConsumeError> {
        let connected = self.manager.get_connection()?;
        match connected.channel.consume(&self.queue, timeout)? {
            Some(delivery) => Ok(Some(codec::decode_envelope(&delivery.body)?)),
            None => Ok(None),
        }
    }
}
