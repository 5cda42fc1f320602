pub mod bus;
mod clock;
pub mod codec;
mod config;
mod consumer;
mod envelope;
mod error;
pub mod http;
mod publisher;
pub mod rpc;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{BrokerSettings, EnvConfig, EnvSource, ProcessEnv, TRUTHY_VALUES};
pub use consumer::EventConsumer;
pub use envelope::{Actor, EventEnvelope, EventHeader, EventType, Site};
pub use error::{
    ChannelError, CodecError, ConfigError, ConnectionError, ConsumeError, EnvelopeError,
    PublishError, RpcError, SerializeError,
};
pub use publisher::{
    EventPublisher, PublishOutcome, PublishTicket, PublishWorker, RecordingSleep, RequestContext,
    RetryPolicy, SerdeSerializer, Serializer, Sleep, ThreadSleep, WorkerStats,
};
pub use rpc::{CancelToken, RpcClient, RpcRequest, RpcResponder};
