use std::sync::Arc;
use std::time::Duration;

use eventcast::codec;
use eventcast::{EventHeader, EventType, PublishWorker, WorkerStats};
use serde_json::json;

use crate::support::{Harness, EXCHANGE};

#[test]
fn events_are_published_in_submission_order() {
    let harness = Harness::new();
    let broker = harness.broker.clone();
    let worker = PublishWorker::spawn(Arc::new(harness.publisher));

    let tickets: Vec<_> = (1..=10)
        .map(|id| {
            worker.submit(
                json!({ "href": format!("/api/books/{}/", id) }),
                EventHeader::new(EventType::Created, "book"),
            )
        })
        .collect();
    for ticket in tickets {
        assert!(ticket.wait().unwrap().is_delivered());
    }

    let identities: Vec<String> = broker
        .published_to(EXCHANGE)
        .iter()
        .map(|d| codec::decode_envelope(&d.body).unwrap().identity().to_string())
        .collect();
    let expected: Vec<String> = (1..=10).map(|id| format!("/api/books/{}/", id)).collect();
    assert_eq!(identities, expected);

    assert_eq!(
        worker.stop(),
        WorkerStats {
            delivered: 10,
            abandoned: 0,
            failed: 0
        }
    );
}

#[test]
fn submit_returns_before_retries_finish() {
    let harness = Harness::new();
    harness.broker.fail_next_publishes(3);
    let sleep = harness.sleep.clone();
    let worker = PublishWorker::spawn(Arc::new(harness.publisher));

    let ticket = worker.submit(
        json!({ "href": "/api/books/1/" }),
        EventHeader::new(EventType::Changed, "book"),
    );
    let outcome = ticket.wait().unwrap();

    assert_eq!(outcome.attempts(), 4);
    assert_eq!(sleep.total(), Duration::from_secs(0 + 2 + 4));
    worker.stop();
}
