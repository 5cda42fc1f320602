//! In-memory broker for testing and single-process scenarios.
//!
//! Implements the transport traits with the AMQP behaviour the publisher and
//! RPC client depend on:
//! - exchanges (direct, fanout, topic, headers) with conflict detection
//! - queues and bindings, topic patterns with `*` and `#`
//! - the default exchange routing by queue name
//! - channels closed by the broker after a rejected operation
//!
//! It also exposes fault injection (unreachable broker, dropped connections,
//! failing publishes) and inspection helpers for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::transport::{
    Channel, Connection, Connector, Delivery, ExchangeKind, ExchangeSpec, MessageProperties,
    QueueSpec,
};
use crate::clock::Deadline;
use crate::error::{ChannelError, ConnectionError};

/// In-memory AMQP-like broker.
///
/// Cloning yields another handle to the same broker, so a test can keep one
/// handle for inspection and give another to a `ConnectionManager`.
///
/// ## Example
///
/// ```
/// use eventcast::bus::{
///     Channel, Connection, Connector, ExchangeKind, ExchangeSpec, InMemoryBroker,
///     MessageProperties, QueueSpec,
/// };
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// let channel = broker.connect("memory://").unwrap().open_channel().unwrap();
///
/// channel.declare_exchange(&ExchangeSpec::durable("catalog", ExchangeKind::Topic)).unwrap();
/// channel.declare_queue(&QueueSpec::named("books")).unwrap();
/// channel.bind_queue("books", "catalog", "book.*").unwrap();
///
/// channel.publish("catalog", "book.created", b"hi", &MessageProperties::default()).unwrap();
/// let delivery = channel.consume("books", Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(delivery.routing_key, "book.created");
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    arrived: Condvar,
}

struct State {
    reachable: bool,
    /// Bumped by `close_connections`; handles from older generations are closed.
    generation: u64,
    exchanges: HashMap<String, ExchangeSpec>,
    exchange_declarations: HashMap<String, usize>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<Delivery>,
    failing_publishes: u32,
    connects: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            reachable: true,
            generation: 0,
            exchanges: HashMap::new(),
            exchange_declarations: HashMap::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            published: Vec::new(),
            failing_publishes: 0,
            connects: 0,
        }
    }
}

struct QueueState {
    spec: QueueSpec,
    messages: VecDeque<Delivery>,
}

#[derive(PartialEq, Eq)]
struct Binding {
    queue: String,
    exchange: String,
    pattern: String,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared)
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Close every connection and channel handed out so far.
    pub fn close_connections(&self) {
        self.state().generation += 1;
        self.shared.arrived.notify_all();
    }

    /// Fail the next `count` publishes with a transport error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state().failing_publishes = count;
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// All messages accepted by the broker, in publish order.
    pub fn published(&self) -> Vec<Delivery> {
        self.state().published.clone()
    }

    /// Messages accepted by a given exchange.
    pub fn published_to(&self, exchange: &str) -> Vec<Delivery> {
        self.state()
            .published
            .iter()
            .filter(|d| d.exchange == exchange)
            .cloned()
            .collect()
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.state().exchanges.get(name).cloned()
    }

    pub fn exchange_count(&self) -> usize {
        self.state().exchanges.len()
    }

    /// How many times an exchange was declared, including no-op redeclares.
    pub fn exchange_declarations(&self, name: &str) -> usize {
        self.state()
            .exchange_declarations
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.state().queues.get(name).map(|q| q.spec.clone())
    }

    /// Messages waiting in a queue.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.state()
            .queues
            .get(name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Append a message straight onto a queue, bypassing exchanges.
    pub fn inject(&self, queue: &str, body: Vec<u8>, properties: MessageProperties) -> bool {
        let mut state = self.state();
        let Some(target) = state.queues.get_mut(queue) else {
            return false;
        };
        target.messages.push_back(Delivery {
            exchange: String::new(),
            routing_key: queue.to_string(),
            body,
            properties,
        });
        drop(state);
        self.shared.arrived.notify_all();
        true
    }
}

fn lock(shared: &Shared) -> MutexGuard<'_, State> {
    shared.state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connector for InMemoryBroker {
    type Connection = InMemoryConnection;

    fn connect(&self, url: &str) -> Result<InMemoryConnection, ConnectionError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(ConnectionError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }
        state.connects += 1;
        Ok(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            generation: state.generation,
        })
    }
}

/// Connection handle on an [`InMemoryBroker`].
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    generation: u64,
}

impl Connection for InMemoryConnection {
    type Channel = InMemoryChannel;

    fn is_open(&self) -> bool {
        lock(&self.shared).generation == self.generation
    }

    fn open_channel(&self) -> Result<InMemoryChannel, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::ChannelOpen("connection closed".into()));
        }
        Ok(InMemoryChannel {
            shared: Arc::clone(&self.shared),
            generation: self.generation,
            open: AtomicBool::new(true),
        })
    }
}

/// Channel handle on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    shared: Arc<Shared>,
    generation: u64,
    open: AtomicBool,
}

impl InMemoryChannel {
    /// Lock broker state, failing if this channel is no longer usable.
    fn live_state(&self) -> Result<MutexGuard<'_, State>, ChannelError> {
        let state = lock(&self.shared);
        if !self.open.load(Ordering::SeqCst) || state.generation != self.generation {
            return Err(ChannelError::Closed);
        }
        Ok(state)
    }

    /// The broker closes a channel on a channel-level error.
    fn reject(&self, reason: String) -> ChannelError {
        self.open.store(false, Ordering::SeqCst);
        ChannelError::Rejected(reason)
    }
}

impl Channel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.live_state().is_ok()
    }

    fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), ChannelError> {
        let mut state = self.live_state()?;
        if let Some(existing) = state.exchanges.get(&exchange.name) {
            if existing != exchange {
                let reason = format!(
                    "PRECONDITION_FAILED - inequivalent arg for exchange '{}': declared {} durable={}, existing {} durable={}",
                    exchange.name, exchange.kind, exchange.durable, existing.kind, existing.durable
                );
                drop(state);
                return Err(self.reject(reason));
            }
        } else {
            state
                .exchanges
                .insert(exchange.name.clone(), exchange.clone());
        }
        *state
            .exchange_declarations
            .entry(exchange.name.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    fn declare_queue(&self, queue: &QueueSpec) -> Result<(), ChannelError> {
        let mut state = self.live_state()?;
        let conflicting = state
            .queues
            .get(&queue.name)
            .map(|existing| existing.spec != *queue);
        match conflicting {
            Some(true) => {
                drop(state);
                Err(self.reject(format!(
                    "PRECONDITION_FAILED - inequivalent arg for queue '{}'",
                    queue.name
                )))
            }
            Some(false) => Ok(()),
            None => {
                state.queues.insert(
                    queue.name.clone(),
                    QueueState {
                        spec: queue.clone(),
                        messages: VecDeque::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ChannelError> {
        let mut state = self.live_state()?;
        if !state.queues.contains_key(queue) || !state.exchanges.contains_key(exchange) {
            drop(state);
            return Err(self.reject(format!(
                "NOT_FOUND - cannot bind queue '{}' to exchange '{}'",
                queue, exchange
            )));
        }
        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), ChannelError> {
        let mut state = self.live_state()?;
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Transport("connection reset by peer".into()));
        }

        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let Some(kind) = state.exchanges.get(exchange).map(|e| e.kind) else {
                drop(state);
                return Err(self.reject(format!("NOT_FOUND - no exchange '{}'", exchange)));
            };
            state
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange && routes(kind, &b.pattern, routing_key))
                .map(|b| b.queue.clone())
                .collect()
        };

        let delivery = Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties: properties.clone(),
        };
        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.messages.push_back(delivery.clone());
            }
        }
        state.published.push(delivery);
        drop(state);
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn consume(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Deadline::after(timeout);
        let mut state = self.live_state()?;

        loop {
            let Some(target) = state.queues.get_mut(queue) else {
                drop(state);
                return Err(self.reject(format!("NOT_FOUND - no queue '{}'", queue)));
            };
            if let Some(delivery) = target.messages.pop_front() {
                return Ok(Some(delivery));
            }

            let Some(left) = deadline.remaining() else {
                return Ok(None);
            };
            state = self
                .shared
                .arrived
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if state.generation != self.generation {
                return Err(ChannelError::Closed);
            }
        }
    }
}

fn routes(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == routing_key,
        ExchangeKind::Topic => topic_matches(pattern, routing_key),
        ExchangeKind::Fanout | ExchangeKind::Headers => true,
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}
