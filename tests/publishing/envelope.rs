use std::time::Duration;

use eventcast::codec;
use eventcast::{Actor, EventHeader, EventType, PublishOutcome, RequestContext, SerializeError};
use rstest::rstest;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::support::{event_time, Harness, EXCHANGE};

// ============================================================================
// book.changed on example.com
// ============================================================================

#[test]
fn book_changed_reaches_bound_queue() {
    let harness = Harness::new();
    let consumer = harness.consumer("book-audit", "book.*");

    let outcome = harness
        .publisher
        .publish(
            json!({ "href": "/api/books/1/", "title": "Dune" }),
            &EventHeader::new(EventType::Changed, "book"),
        )
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Delivered { attempts: 1 });

    let envelope = consumer
        .next_event(Duration::from_millis(100))
        .unwrap()
        .expect("event routed to book-audit");
    assert_eq!(envelope.entity_type(), "book");
    assert_eq!(envelope.event_type(), EventType::Changed);
    assert_eq!(envelope.identity(), "/api/books/1/");
    assert_eq!(envelope.entity_site(), "example.com");
    assert_eq!(envelope.user(), "");
    assert_eq!(envelope.event_time(), event_time());
    assert_eq!(envelope.data()["title"], json!("Dune"));

    let sent = harness.broker.published_to(EXCHANGE);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].routing_key, "book.changed");
    assert_eq!(sent[0].properties.content_type.as_deref(), Some(codec::CONTENT_TYPE));
}

#[rstest]
fn routing_key_follows_event_type(
    #[values(
        EventType::Created,
        EventType::Changed,
        EventType::Deleted,
        EventType::Deactivated,
        EventType::Activated,
        EventType::Assigned,
        EventType::Revoked
    )]
    event_type: EventType,
) {
    let harness = Harness::new();
    harness
        .publisher
        .publish(
            json!({ "href": "/api/groups/7/" }),
            &EventHeader::new(event_type, "access_group"),
        )
        .unwrap();

    let sent = harness.broker.published_to(EXCHANGE);
    assert_eq!(sent[0].routing_key, format!("access_group.{}", event_type.as_str()));
}

// ============================================================================
// Identity and actor
// ============================================================================

#[test]
fn explicit_identity_and_actor() {
    let harness = Harness::new();
    harness
        .publisher
        .publish(
            json!({ "href": "/api/books/1/" }),
            &EventHeader::new(EventType::Deleted, "book")
                .with_identity("urn:isbn:9780441013593")
                .with_actor(Actor::Username("paul".into())),
        )
        .unwrap();

    let envelope = codec::decode_envelope(&harness.broker.published_to(EXCHANGE)[0].body).unwrap();
    assert_eq!(envelope.identity(), "urn:isbn:9780441013593");
    assert_eq!(envelope.user(), "https://example.com/api/iam/user/paul/");
}

#[test]
fn wire_format_is_a_msgpack_map() {
    let harness = Harness::new();
    harness
        .publisher
        .publish(
            json!({ "href": "/api/books/1/" }),
            &EventHeader::new(EventType::Created, "book"),
        )
        .unwrap();

    let raw: Map<String, Value> =
        codec::decode(&harness.broker.published_to(EXCHANGE)[0].body).unwrap();
    assert_eq!(raw["event_type"], json!("created"));
    assert_eq!(raw["event_time"], json!("2024-05-17T09:15:30.000000+00:00"));
    assert_eq!(raw["data"], json!({ "href": "/api/books/1/" }));
}

// ============================================================================
// Serializers
// ============================================================================

#[derive(Serialize)]
struct Book {
    href: String,
    title: String,
}

#[test]
fn serde_types_publish_through_serde_serializer() {
    let harness = Harness::new();
    let book = Book {
        href: "/api/books/2/".into(),
        title: "Children of Dune".into(),
    };
    harness
        .publisher
        .publish_with(
            &book,
            &eventcast::SerdeSerializer::new(),
            &EventHeader::new(EventType::Created, "book"),
        )
        .unwrap();

    let envelope = codec::decode_envelope(&harness.broker.published_to(EXCHANGE)[0].body).unwrap();
    assert_eq!(envelope.identity(), "/api/books/2/");
    assert_eq!(envelope.data()["title"], json!("Children of Dune"));
}

#[test]
fn serializer_errors_are_returned() {
    let harness = Harness::new();
    let failing = |_: &Book, _: &RequestContext| -> Result<Map<String, Value>, SerializeError> {
        Err(SerializeError("no title".into()))
    };
    let book = Book {
        href: "/api/books/3/".into(),
        title: String::new(),
    };

    let result = harness.publisher.publish_with(
        &book,
        &failing,
        &EventHeader::new(EventType::Created, "book"),
    );
    assert!(matches!(result, Err(eventcast::PublishError::Serialize(_))));
    assert!(harness.broker.published_to(EXCHANGE).is_empty());
}
