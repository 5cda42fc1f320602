use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CancelToken, RpcRequest, POLL_INTERVAL};
use crate::bus::{Channel, ConnectionManager, Connector, MessageProperties, QueueSpec};
use crate::clock::Deadline;
use crate::codec::{self, CONTENT_TYPE};
use crate::error::RpcError;

/// Sends requests to one routing key and waits for the correlated reply.
///
/// Calls take `&mut self`, so a client has at most one call in flight. Use
/// one client per thread for concurrent calls; each gets its own reply
/// queue.
pub struct RpcClient<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    routing_key: String,
    reply_queue: String,
    default_timeout: Duration,
}

impl<C: Connector> RpcClient<C> {
    /// The default timeout comes from the manager's settings.
    pub fn new(manager: Arc<ConnectionManager<C>>, routing_key: impl Into<String>) -> Self {
        let default_timeout = manager.settings().rpc_timeout;
        Self {
            manager,
            routing_key: routing_key.into(),
            reply_queue: Uuid::new_v4().to_string(),
            default_timeout,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Name of this client's exclusive reply queue.
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Call with the configured default timeout.
    pub fn call_default(&mut self, request: &RpcRequest) -> Result<Value, RpcError> {
        let timeout = self.default_timeout;
        self.call(request, timeout)
    }

    /// Send `request` and return the reply's `result` (`Null` if absent).
    pub fn call(&mut self, request: &RpcRequest, timeout: Duration) -> Result<Value, RpcError> {
        self.exchange(request, timeout, None)
    }

    /// Like [`call`](Self::call), but gives up early once `token` is cancelled.
    pub fn call_cancellable(
        &mut self,
        request: &RpcRequest,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<Value, RpcError> {
        self.exchange(request, timeout, Some(token))
    }

    fn exchange(
        &mut self,
        request: &RpcRequest,
        timeout: Duration,
        token: Option<&CancelToken>,
    ) -> Result<Value, RpcError> {
        let correlation_id = Uuid::new_v4().to_string();
        let connected = self.manager.get_connection()?;
        let channel = &connected.channel;

        channel.declare_queue(&QueueSpec::exclusive(&self.reply_queue))?;
        let body = codec::encode(request)?;
        let properties = MessageProperties::default()
            .with_content_type(CONTENT_TYPE)
            .with_reply_to(&self.reply_queue)
            .with_correlation_id(&correlation_id);
        channel.publish("", &self.routing_key, &body, &properties)?;
        info!(
            routing_key = %self.routing_key,
            site = %request.entity_site,
            event_type = %request.event_type,
            entity_type = %request.entity_type,
            correlation_id = %correlation_id,
            "rpc call sent"
        );

        let deadline = Deadline::after(timeout);
        loop {
            if token.is_some_and(CancelToken::is_cancelled) {
                debug!(correlation_id = %correlation_id, "rpc call cancelled");
                return Err(RpcError::Cancelled { correlation_id });
            }
            let Some(left) = deadline.remaining() else {
                return Err(RpcError::Timeout {
                    correlation_id,
                    waited: timeout,
                });
            };

            let slice = left.min(POLL_INTERVAL);
            let Some(delivery) = channel.consume(&self.reply_queue, slice)? else {
                continue;
            };
            if delivery.properties.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                debug!(
                    expected = %correlation_id,
                    received = ?delivery.properties.correlation_id,
                    "discarding uncorrelated reply"
                );
                continue;
            }

            let reply: Value = codec::decode(&delivery.body)?;
            let result = reply.get("result").cloned().unwrap_or(Value::Null);
            debug!(correlation_id = %correlation_id, "rpc reply received");
            return Ok(result);
        }
    }
}
