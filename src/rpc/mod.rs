//! Request/reply over the broker.
//!
//! The client publishes a MessagePack request to the default exchange with a
//! fresh correlation id and its own exclusive reply queue in `reply_to`. The
//! responder answers on that queue with `{"result": ...}` and the same
//! correlation id. Replies carrying any other correlation id are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Site;

mod client;
mod responder;

pub use client::RpcClient;
pub use responder::RpcResponder;

/// How long a single consume blocks before deadlines and cancellation are
/// checked again.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Body of an RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub event_type: String,
    pub entity_type: String,
    pub entity_site: String,
    pub data: Value,
}

impl RpcRequest {
    pub fn new(
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        site: &Site,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_site: site.domain().to_string(),
            data,
        }
    }
}

/// Cancels an in-flight [`RpcClient::call_cancellable`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
