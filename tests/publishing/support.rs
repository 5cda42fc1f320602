#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use eventcast::bus::{ConnectionManager, ExchangeKind, InMemoryBroker};
use eventcast::{
    BrokerSettings, EventConsumer, EventPublisher, FixedClock, RecordingSleep, Site,
};

pub const EXCHANGE: &str = "catalog";

pub fn event_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 9, 15, 30).unwrap()
}

/// A broker, a manager on it and a publisher for `example.com` with a fixed
/// clock and a sleeper that only records.
pub struct Harness {
    pub broker: InMemoryBroker,
    pub manager: Arc<ConnectionManager<InMemoryBroker>>,
    pub sleep: Arc<RecordingSleep>,
    pub publisher: EventPublisher<InMemoryBroker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        let broker = InMemoryBroker::new();
        let manager = Arc::new(ConnectionManager::new(broker.clone(), settings));
        let sleep = Arc::new(RecordingSleep::new());
        let publisher = EventPublisher::new(EXCHANGE, site(), Arc::clone(&manager))
            .with_clock(FixedClock(event_time()))
            .with_sleep(sleep.clone());
        Self {
            broker,
            manager,
            sleep,
            publisher,
        }
    }

    /// A consumer bound to the publisher's exchange with `pattern`.
    pub fn consumer(&self, queue: &str, pattern: &str) -> EventConsumer<InMemoryBroker> {
        let consumer = EventConsumer::new(Arc::clone(&self.manager), EXCHANGE, queue, pattern);
        consumer.ensure_exchange(ExchangeKind::Topic).unwrap();
        consumer.ensure_queue().unwrap();
        consumer
    }
}

pub fn site() -> Site {
    Site::new("example.com").unwrap()
}
