use eventcast::bus::{ExchangeKind, ExchangeSpec};
use eventcast::{BrokerSettings, ConnectionError, EventHeader, EventType, PublishError};
use serde_json::json;

use crate::support::{Harness, EXCHANGE};

// ============================================================================
// Declaration
// ============================================================================

#[test]
fn ensure_exchange_is_idempotent() {
    let harness = Harness::new();
    harness.publisher.ensure_exchange(ExchangeKind::Topic).unwrap();
    harness.publisher.ensure_exchange(ExchangeKind::Topic).unwrap();

    assert_eq!(harness.broker.exchange_count(), 1);
    assert_eq!(
        harness.broker.exchange(EXCHANGE),
        Some(ExchangeSpec::durable(EXCHANGE, ExchangeKind::Topic))
    );
}

#[test]
fn conflicting_declaration_is_a_configuration_error() {
    let harness = Harness::new();
    harness.publisher.ensure_exchange(ExchangeKind::Fanout).unwrap();

    let result = harness.publisher.ensure_exchange(ExchangeKind::Topic);
    assert!(matches!(result, Err(PublishError::Configuration(_))));

    // Publishing needs a topic exchange, so it fails the same way.
    let result = harness.publisher.publish(
        json!({ "href": "/api/books/1/" }),
        &EventHeader::new(EventType::Created, "book"),
    );
    assert!(matches!(result, Err(PublishError::Configuration(_))));
    assert!(harness.broker.published().is_empty());
}

#[test]
fn every_publish_redeclares_the_exchange() {
    let harness = Harness::new();
    let header = EventHeader::new(EventType::Changed, "book");
    for _ in 0..3 {
        harness
            .publisher
            .publish(json!({ "href": "/api/books/1/" }), &header)
            .unwrap();
    }
    // Once up front and once on the producer, per publish.
    assert_eq!(harness.broker.exchange_declarations(EXCHANGE), 6);
}

// ============================================================================
// Connection loss
// ============================================================================

#[test]
fn publish_reconnects_after_connections_drop() {
    let harness = Harness::new();
    let header = EventHeader::new(EventType::Changed, "book");
    harness
        .publisher
        .publish(json!({ "href": "/api/books/1/" }), &header)
        .unwrap();

    harness.broker.close_connections();
    let outcome = harness
        .publisher
        .publish(json!({ "href": "/api/books/1/" }), &header)
        .unwrap();

    assert!(outcome.is_delivered());
    assert_eq!(harness.broker.connect_count(), 2);
    assert_eq!(harness.broker.published_to(EXCHANGE).len(), 2);
}

#[test]
fn unreachable_broker_is_reported() {
    let harness = Harness::with_settings(BrokerSettings::with_url("amqp://rabbit.invalid:5672/%2f"));
    harness.broker.set_reachable(false);

    let result = harness.publisher.publish(
        json!({ "href": "/api/books/1/" }),
        &EventHeader::new(EventType::Created, "book"),
    );
    assert!(matches!(
        result,
        Err(PublishError::Connection(ConnectionError::Unreachable { .. }))
    ));
}
