//! Event publishing.
//!
//! ```text
//! payload ──► Serializer ──► EventEnvelope ──► MessagePack
//!   (RequestContext)                              │
//!                                                 ▼
//!                         ProducerPool ──► topic exchange
//!                                          routing key `entity.event`
//!                                          (RetryPolicy on transport errors)
//! ```

mod context;
mod event_publisher;
mod retry;
mod worker;

pub use context::{RequestContext, SerdeSerializer, Serializer};
pub use event_publisher::{EventPublisher, PublishOutcome};
pub use retry::{RecordingSleep, RetryPolicy, Sleep, ThreadSleep};
pub use worker::{PublishTicket, PublishWorker, WorkerStats};
