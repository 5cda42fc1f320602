//! Bounded pool of publish channels on one connection.
//!
//! Channels are opened lazily up to the limit. `acquire` blocks on a
//! `Condvar` until a producer is returned or the timeout elapses.

use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::transport::{Channel, Connection};
use crate::clock::Deadline;
use crate::error::PublishError;

struct PoolState<Ch> {
    idle: Vec<Ch>,
    /// Channels currently alive, idle or leased.
    created: usize,
}

pub struct ProducerPool<K: Connection> {
    connection: Arc<K>,
    limit: usize,
    state: Mutex<PoolState<K::Channel>>,
    returned: Condvar,
}

impl<K: Connection> ProducerPool<K> {
    /// A limit of zero is treated as one.
    pub fn new(connection: Arc<K>, limit: usize) -> Self {
        Self {
            connection,
            limit: limit.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                created: 0,
            }),
            returned: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Producers currently leased out.
    pub fn in_use(&self) -> usize {
        let state = self.state();
        state.created - state.idle.len()
    }

    fn state(&self) -> MutexGuard<'_, PoolState<K::Channel>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease a producer, waiting up to `timeout` for one to be returned.
    ///
    /// Closed idle channels are discarded and replaced.
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<Producer<K>, PublishError> {
        let deadline = Deadline::after(timeout);
        let mut state = self.state();

        loop {
            while let Some(channel) = state.idle.pop() {
                if channel.is_open() {
                    return Ok(self.lease(channel));
                }
                state.created -= 1;
            }

            if state.created < self.limit {
                state.created += 1;
                drop(state);
                return match self.connection.open_channel() {
                    Ok(channel) => Ok(self.lease(channel)),
                    Err(err) => {
                        self.state().created -= 1;
                        self.returned.notify_one();
                        Err(PublishError::Connection(err))
                    }
                };
            }

            let Some(left) = deadline.remaining() else {
                return Err(PublishError::ResourceExhausted { timeout });
            };
            state = self
                .returned
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lease(self: &Arc<Self>, channel: K::Channel) -> Producer<K> {
        Producer {
            pool: Arc::clone(self),
            channel: Some(channel),
        }
    }

    fn release(&self, channel: K::Channel) {
        let mut state = self.state();
        if channel.is_open() {
            state.idle.push(channel);
        } else {
            state.created -= 1;
        }
        drop(state);
        self.returned.notify_one();
    }
}

/// A leased publish channel; returned to its pool on drop.
pub struct Producer<K: Connection> {
    pool: Arc<ProducerPool<K>>,
    channel: Option<K::Channel>,
}

impl<K: Connection> Deref for Producer<K> {
    type Target = K::Channel;

    fn deref(&self) -> &K::Channel {
        // Only `Drop` takes the channel out.
        self.channel
            .as_ref()
            .unwrap_or_else(|| unreachable!("producer used after release"))
    }
}

impl<K: Connection> Drop for Producer<K> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.release(channel);
        }
    }
}
