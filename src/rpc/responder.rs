use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::RpcRequest;
use crate::bus::{Channel, ConnectionManager, Connector, MessageProperties, QueueSpec};
use crate::codec::{self, CONTENT_TYPE};
use crate::error::RpcError;

/// Serves requests arriving on one queue.
pub struct RpcResponder<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    queue: String,
}

impl<C: Connector> RpcResponder<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>, queue: impl Into<String>) -> Self {
        Self {
            manager,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Declare the request queue. Requests sent before it exists are lost.
    pub fn ensure_queue(&self) -> Result<(), RpcError> {
        let connected = self.manager.get_connection()?;
        connected.channel.declare_queue(&QueueSpec::named(&self.queue))?;
        Ok(())
    }

    /// Answer one request with `handler`'s return value.
    ///
    /// Returns `false` when nothing arrived within `timeout`.
    pub fn serve_next<F>(&self, timeout: Duration, handler: F) -> Result<bool, RpcError>
    where
        F: FnOnce(RpcRequest) -> Value,
    {
        let connected = self.manager.get_connection()?;
        let channel = &connected.channel;
        channel.declare_queue(&QueueSpec::named(&self.queue))?;

        let Some(delivery) = channel.consume(&self.queue, timeout)? else {
            return Ok(false);
        };
        let request: RpcRequest = codec::decode(&delivery.body)?;
        let Some(reply_to) = delivery.properties.reply_to else {
            warn!(
                queue = %self.queue,
                event_type = %request.event_type,
                "dropping rpc request without reply_to"
            );
            return Ok(true);
        };

        let result = handler(request);
        let body = codec::encode(&json!({ "result": result }))?;
        let mut properties = MessageProperties::default().with_content_type(CONTENT_TYPE);
        properties.correlation_id = delivery.properties.correlation_id;
        channel.publish("", &reply_to, &body, &properties)?;
        debug!(queue = %self.queue, reply_to = %reply_to, "rpc reply sent");
        Ok(true)
    }
}
