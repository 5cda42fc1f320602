use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::context::{RequestContext, Serializer};
use super::retry::{RetryPolicy, Sleep, ThreadSleep};
use crate::bus::{Channel, ConnectionManager, Connector, ExchangeKind, ExchangeSpec, MessageProperties};
use crate::clock::{Clock, SystemClock};
use crate::codec::{self, CONTENT_TYPE};
use crate::envelope::{EventEnvelope, EventHeader, Site};
use crate::error::{ChannelError, PublishError};

/// What happened to an event once the publisher was done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker accepted the message.
    Delivered { attempts: u32 },
    /// Every attempt failed with a transport error; the event was dropped.
    Abandoned { attempts: u32, error: String },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PublishOutcome::Delivered { attempts } | PublishOutcome::Abandoned { attempts, .. } => {
                *attempts
            }
        }
    }
}

enum AttemptFailure {
    /// Worth another attempt on a fresh connection.
    Transient(String),
    Fatal(PublishError),
}

impl From<ChannelError> for AttemptFailure {
    fn from(err: ChannelError) -> Self {
        if err.is_transient() {
            AttemptFailure::Transient(err.to_string())
        } else {
            AttemptFailure::Fatal(err.into())
        }
    }
}

/// Publishes domain events for one site onto one topic exchange.
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use eventcast::bus::{ConnectionManager, InMemoryBroker};
/// use eventcast::{BrokerSettings, EventHeader, EventPublisher, EventType, Site};
///
/// let broker = InMemoryBroker::new();
/// let manager = Arc::new(ConnectionManager::new(broker.clone(), BrokerSettings::default()));
/// let publisher = EventPublisher::new("catalog", Site::new("shop.example.com").unwrap(), manager);
///
/// let outcome = publisher
///     .publish(json!({ "href": "/api/books/1/" }), &EventHeader::new(EventType::Created, "book"))
///     .unwrap();
/// assert!(outcome.is_delivered());
/// assert_eq!(broker.published_to("catalog")[0].routing_key, "book.created");
/// ```
pub struct EventPublisher<C: Connector> {
    exchange: String,
    site: Site,
    manager: Arc<ConnectionManager<C>>,
    retry: RetryPolicy,
    acquire_timeout: Duration,
    clock: Arc<dyn Clock>,
    sleep: Arc<dyn Sleep>,
    script_name: Option<String>,
    language: Option<String>,
}

impl<C: Connector> EventPublisher<C> {
    /// Acquire timeout and script name come from the manager's settings.
    pub fn new(exchange: impl Into<String>, site: Site, manager: Arc<ConnectionManager<C>>) -> Self {
        let settings = manager.settings();
        let acquire_timeout = settings.acquire_timeout;
        let script_name = settings.script_name.clone();
        Self {
            exchange: exchange.into(),
            site,
            manager,
            retry: RetryPolicy::default(),
            acquire_timeout,
            clock: Arc::new(SystemClock),
            sleep: Arc::new(ThreadSleep),
            script_name,
            language: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    /// Language exposed to serializers through the request context.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// The request serializers see when called from this publisher.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::simulated(&self.site)
            .with_script_name(self.script_name.clone())
            .with_language(self.language.clone())
    }

    /// Declare the exchange as durable and non-auto-delete.
    ///
    /// Redeclaring with the same kind is a no-op; a different kind is a
    /// [`PublishError::Configuration`].
    pub fn ensure_exchange(&self, kind: ExchangeKind) -> Result<(), PublishError> {
        let connected = self.manager.get_connection()?;
        connected
            .channel
            .declare_exchange(&ExchangeSpec::durable(&self.exchange, kind))?;
        Ok(())
    }

    /// Publish a raw payload. Anything but a JSON object is sent as `{}`.
    pub fn publish(&self, payload: Value, header: &EventHeader) -> Result<PublishOutcome, PublishError> {
        let data = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.publish_data(data, header)
    }

    /// Run `serializer` against a simulated request, then publish its output.
    pub fn publish_with<T, S>(
        &self,
        item: &T,
        serializer: &S,
        header: &EventHeader,
    ) -> Result<PublishOutcome, PublishError>
    where
        T: ?Sized,
        S: Serializer<T> + ?Sized,
    {
        self.ensure_exchange(ExchangeKind::Topic)?;
        let data = serializer.serialize(item, &self.request_context())?;
        self.deliver(data, header)
    }

    pub fn publish_data(
        &self,
        data: Map<String, Value>,
        header: &EventHeader,
    ) -> Result<PublishOutcome, PublishError> {
        self.ensure_exchange(ExchangeKind::Topic)?;
        self.deliver(data, header)
    }

    fn deliver(
        &self,
        data: Map<String, Value>,
        header: &EventHeader,
    ) -> Result<PublishOutcome, PublishError> {
        let envelope = EventEnvelope::new(header, &self.site, data, self.clock.now())?;
        let body = codec::encode_envelope(&envelope)?;
        let routing_key = envelope.routing_key();

        let mut attempts = 0;
        loop {
            attempts += 1;
            let failure = match self.attempt(&routing_key, &body) {
                Ok(()) => {
                    info!(
                        exchange = %self.exchange,
                        routing_key = %routing_key,
                        identity = %envelope.identity(),
                        attempts,
                        "event published"
                    );
                    return Ok(PublishOutcome::Delivered { attempts });
                }
                Err(AttemptFailure::Fatal(err)) => return Err(err),
                Err(AttemptFailure::Transient(reason)) => reason,
            };

            if !self.retry.allows_retry_after(attempts) {
                error!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    identity = %envelope.identity(),
                    attempts,
                    error = %failure,
                    "giving up on event"
                );
                return Ok(PublishOutcome::Abandoned {
                    attempts,
                    error: failure,
                });
            }

            let delay = self.retry.delay_before_retry(attempts);
            warn!(
                exchange = %self.exchange,
                routing_key = %routing_key,
                attempt = attempts,
                retry_in = ?delay,
                error = %failure,
                "publish failed, retrying"
            );
            self.sleep.sleep(delay);
        }
    }

    /// One publish on whatever connection the manager hands out right now.
    fn attempt(&self, routing_key: &str, body: &[u8]) -> Result<(), AttemptFailure> {
        let connected = self
            .manager
            .get_connection()
            .map_err(|err| AttemptFailure::Transient(err.to_string()))?;
        let producer = connected
            .producer(self.acquire_timeout)
            .map_err(|err| match err {
                PublishError::Connection(err) => AttemptFailure::Transient(err.to_string()),
                other => AttemptFailure::Fatal(other),
            })?;

        producer.declare_exchange(&ExchangeSpec::durable(&self.exchange, ExchangeKind::Topic))?;
        let properties = MessageProperties::default()
            .with_content_type(CONTENT_TYPE)
            .persistent();
        producer.publish(&self.exchange, routing_key, body, &properties)?;
        Ok(())
    }
}
