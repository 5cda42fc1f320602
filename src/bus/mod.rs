//! Broker plumbing: transport traits, connection management, producer pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            EventPublisher / RpcClient / EventConsumer        │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionManager (Mutex)                   │
//! │  get_connection() -> Connected { connection, channel, pool } │
//! │  reopens a closed channel or connection on demand            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Connector / Connection / Channel traits          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                      │
//!          ▼                                      ▼
//! ┌──────────────────┐                 ┌──────────────────────┐
//! │  InMemoryBroker  │                 │    AmqpConnector     │
//! │   (included)     │                 │  (feature `amqp`)    │
//! └──────────────────┘                 └──────────────────────┘
//! ```

#[cfg(feature = "amqp")]
mod amqp;
mod connection;
mod in_memory_broker;
mod pool;
mod transport;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection, AmqpConnector};
pub use connection::{Connected, ConnectionManager};
pub use in_memory_broker::{topic_matches, InMemoryBroker, InMemoryChannel, InMemoryConnection};
pub use pool::{Producer, ProducerPool};
pub use transport::{
    Channel, ChannelOf, Connection, Connector, Delivery, ExchangeKind, ExchangeSpec,
    MessageProperties, QueueSpec,
};
