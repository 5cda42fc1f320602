//! Connection manager: one lazily opened connection, reopened when it drops.
//!
//! Every publisher, consumer and RPC client built on the same manager shares
//! its connection. The check-then-reopen sequence runs under a single mutex
//! so concurrent callers never race to open duplicate connections.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use super::pool::{Producer, ProducerPool};
use super::transport::{Channel, ChannelOf, Connection, Connector};
use crate::config::BrokerSettings;
use crate::error::{ConnectionError, PublishError};

/// The live connection, its control channel and its producer pool.
pub struct Connected<C: Connector> {
    pub connection: Arc<C::Connection>,
    pub channel: Arc<ChannelOf<C>>,
    producers: Arc<ProducerPool<C::Connection>>,
}

impl<C: Connector> Clone for Connected<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            channel: Arc::clone(&self.channel),
            producers: Arc::clone(&self.producers),
        }
    }
}

impl<C: Connector> Connected<C> {
    fn is_open(&self) -> bool {
        self.connection.is_open() && self.channel.is_open()
    }

    /// Lease a publish channel from this connection's pool.
    pub fn producer(&self, timeout: Duration) -> Result<Producer<C::Connection>, PublishError> {
        self.producers.acquire(timeout)
    }
}

/// Owns the broker connection for everything built on top of it.
///
/// Share it behind an `Arc`:
///
/// ```
/// use std::sync::Arc;
/// use eventcast::bus::{ConnectionManager, InMemoryBroker};
/// use eventcast::BrokerSettings;
///
/// let manager = Arc::new(ConnectionManager::new(InMemoryBroker::new(), BrokerSettings::default()));
/// let first = manager.get_connection().unwrap();
/// let second = manager.get_connection().unwrap();
/// assert!(Arc::ptr_eq(&first.connection, &second.connection));
/// ```
pub struct ConnectionManager<C: Connector> {
    connector: C,
    settings: BrokerSettings,
    live: Mutex<Option<Connected<C>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, settings: BrokerSettings) -> Self {
        Self {
            connector,
            settings,
            live: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Return the cached connection and channel, reopening whatever closed.
    ///
    /// A closed channel on an open connection only gets a new channel; a
    /// closed connection is replaced along with its channel and producer
    /// pool. Connection failures are returned as-is, without retrying.
    pub fn get_connection(&self) -> Result<Connected<C>, ConnectionError> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| ConnectionError::Poisoned("get_connection"))?;

        if let Some(current) = live.as_ref() {
            if current.is_open() {
                return Ok(current.clone());
            }
            if current.connection.is_open() {
                debug!(url = %self.settings.redacted_url(), "reopening closed channel");
                let channel = Arc::new(current.connection.open_channel()?);
                let refreshed = Connected {
                    connection: Arc::clone(&current.connection),
                    channel,
                    producers: Arc::clone(&current.producers),
                };
                *live = Some(refreshed.clone());
                return Ok(refreshed);
            }
        }

        let reconnect = live.is_some();
        let connection = Arc::new(self.connector.connect(&self.settings.url)?);
        let channel = Arc::new(connection.open_channel()?);
        let producers = Arc::new(ProducerPool::new(
            Arc::clone(&connection),
            self.settings.pool_limit,
        ));
        info!(
            url = %self.settings.redacted_url(),
            reconnect,
            "broker connection opened"
        );

        let connected = Connected {
            connection,
            channel,
            producers,
        };
        *live = Some(connected.clone());
        Ok(connected)
    }

    /// Whether a connection is cached and still open.
    pub fn is_connected(&self) -> bool {
        self.live
            .lock()
            .map(|live| live.as_ref().is_some_and(|c| c.connection.is_open()))
            .unwrap_or(false)
    }
}
