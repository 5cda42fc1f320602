//! Background publishing.
//!
//! A [`PublishWorker`] owns a thread that feeds submitted events to an
//! [`EventPublisher`] one at a time, so request handlers never block on the
//! broker or on retry backoff. Each submission hands back a
//! [`PublishTicket`] that reports the outcome once the worker gets to it.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::debug;

use super::event_publisher::{EventPublisher, PublishOutcome};
use crate::bus::Connector;
use crate::envelope::EventHeader;
use crate::error::PublishError;

/// Counters reported when the worker stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: usize,
    pub abandoned: usize,
    /// Events rejected before or during sending (bad envelope, config...).
    pub failed: usize,
}

struct Job {
    payload: Value,
    header: EventHeader,
    reply: Sender<Result<PublishOutcome, PublishError>>,
}

/// Receives the outcome of one submitted event.
pub struct PublishTicket {
    outcome: Receiver<Result<PublishOutcome, PublishError>>,
}

impl PublishTicket {
    /// Block until the worker has handled the event.
    pub fn wait(self) -> Result<PublishOutcome, PublishError> {
        self.outcome.recv().unwrap_or(Err(PublishError::WorkerStopped))
    }

    /// The outcome if it is ready. It is handed out once; later calls
    /// report [`PublishError::WorkerStopped`].
    pub fn try_outcome(&self) -> Option<Result<PublishOutcome, PublishError>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PublishError::WorkerStopped)),
        }
    }
}

/// A thread that publishes submitted events in submission order.
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use eventcast::bus::{ConnectionManager, InMemoryBroker};
/// use eventcast::{BrokerSettings, EventHeader, EventPublisher, EventType, PublishWorker, Site};
///
/// let manager = Arc::new(ConnectionManager::new(InMemoryBroker::new(), BrokerSettings::default()));
/// let publisher = EventPublisher::new("catalog", Site::new("shop.example.com").unwrap(), manager);
/// let worker = PublishWorker::spawn(Arc::new(publisher));
///
/// let ticket = worker.submit(json!({ "href": "/api/books/1/" }), EventHeader::new(EventType::Created, "book"));
/// assert!(ticket.wait().unwrap().is_delivered());
///
/// let stats = worker.stop();
/// assert_eq!(stats.delivered, 1);
/// ```
pub struct PublishWorker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl PublishWorker {
    pub fn spawn<C>(publisher: Arc<EventPublisher<C>>) -> Self
    where
        C: Connector + 'static,
    {
        let (jobs, queue) = mpsc::channel::<Job>();

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();

            // Ends once every sender is gone and the queue is drained.
            for job in queue {
                let outcome = publisher.publish(job.payload, &job.header);
                match &outcome {
                    Ok(PublishOutcome::Delivered { .. }) => stats.delivered += 1,
                    Ok(PublishOutcome::Abandoned { .. }) => stats.abandoned += 1,
                    Err(_) => stats.failed += 1,
                }
                // The submitter may have dropped its ticket.
                let _ = job.reply.send(outcome);
            }

            debug!(exchange = %publisher.exchange(), ?stats, "publish worker stopped");
            stats
        });

        Self {
            jobs: Some(jobs),
            handle: Some(handle),
        }
    }

    /// Queue an event. Never blocks on the broker.
    pub fn submit(&self, payload: Value, header: EventHeader) -> PublishTicket {
        let (reply, outcome) = mpsc::channel();
        if let Some(jobs) = &self.jobs {
            // A send error drops the reply sender, so the ticket reports
            // `WorkerStopped`.
            let _ = jobs.send(Job {
                payload,
                header,
                reply,
            });
        }
        PublishTicket { outcome }
    }

    /// Publish everything already submitted, then stop the thread.
    pub fn stop(mut self) -> WorkerStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WorkerStats {
        self.jobs.take();
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for PublishWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
