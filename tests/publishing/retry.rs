use std::time::Duration;

use eventcast::{BrokerSettings, EventHeader, EventType, PublishError, PublishOutcome, RetryPolicy};
use serde_json::json;

use crate::support::{Harness, EXCHANGE};

fn header() -> EventHeader {
    EventHeader::new(EventType::Changed, "book")
}

#[test]
fn delays_grow_by_two_seconds_from_zero() {
    let harness = Harness::new();
    harness.broker.fail_next_publishes(5);

    let outcome = harness
        .publisher
        .publish(json!({ "href": "/api/books/1/" }), &header())
        .unwrap();

    assert_eq!(outcome, PublishOutcome::Delivered { attempts: 6 });
    let secs: Vec<u64> = harness.sleep.delays().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![0, 2, 4, 6, 8]);
    assert_eq!(harness.broker.published_to(EXCHANGE).len(), 1);
}

#[test]
fn gives_up_after_thirty_attempts_without_error() {
    let harness = Harness::new();
    harness.broker.fail_next_publishes(100);

    let outcome = harness
        .publisher
        .publish(json!({ "href": "/api/books/1/" }), &header())
        .unwrap();

    match outcome {
        PublishOutcome::Abandoned { attempts, error } => {
            assert_eq!(attempts, 30);
            assert!(error.contains("connection reset"));
        }
        other => panic!("expected abandoned, got {:?}", other),
    }

    let delays = harness.sleep.delays();
    assert_eq!(delays.len(), 29);
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
    assert_eq!(delays[15], Duration::from_secs(30));
    assert_eq!(harness.sleep.total(), RetryPolicy::default().total_backoff(29));
    assert!(harness.broker.published_to(EXCHANGE).is_empty());
}

#[test]
fn custom_policy_is_honoured() {
    let harness = Harness::new();
    let publisher = harness.publisher.with_retry_policy(RetryPolicy {
        interval_start: Duration::from_millis(100),
        interval_step: Duration::from_millis(100),
        interval_max: Duration::from_millis(250),
        max_attempts: 4,
    });
    harness.broker.fail_next_publishes(4);

    let outcome = publisher
        .publish(json!({ "href": "/api/books/1/" }), &header())
        .unwrap();

    assert_eq!(outcome.attempts(), 4);
    assert!(!outcome.is_delivered());
    let millis: Vec<u128> = harness.sleep.delays().iter().map(Duration::as_millis).collect();
    assert_eq!(millis, vec![100, 200, 250]);
}

#[test]
fn exhausted_producer_pool_fails_without_retrying() {
    let harness = Harness::with_settings(BrokerSettings {
        pool_limit: 1,
        ..BrokerSettings::default()
    });
    let publisher = harness
        .publisher
        .with_acquire_timeout(Duration::from_millis(20));
    let _held = harness
        .manager
        .get_connection()
        .unwrap()
        .producer(Duration::from_millis(10))
        .unwrap();

    let result = publisher.publish(json!({ "href": "/api/books/1/" }), &header());

    match result {
        Err(PublishError::ResourceExhausted { timeout }) => {
            assert_eq!(timeout, Duration::from_millis(20))
        }
        other => panic!("expected an exhausted pool, got {:?}", other),
    }
    assert!(harness.sleep.delays().is_empty());
    assert!(harness.broker.published_to(EXCHANGE).is_empty());
}
