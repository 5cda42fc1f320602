//! Request/reply integration tests against `InMemoryBroker`.
//!
//! A responder thread serves a request queue while one or more clients
//! call it with their own reply queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eventcast::bus::{ConnectionManager, InMemoryBroker, MessageProperties};
use eventcast::codec;
use eventcast::{
    BrokerSettings, CancelToken, EnvConfig, RpcClient, RpcError, RpcRequest, RpcResponder, Site,
};
use serde_json::{json, Value};

const QUEUE: &str = "pricing.rpc";

fn manager(broker: &InMemoryBroker) -> Arc<ConnectionManager<InMemoryBroker>> {
    Arc::new(ConnectionManager::new(
        broker.clone(),
        BrokerSettings::default(),
    ))
}

fn site() -> Site {
    Site::new("shop.example.com").unwrap()
}

/// Serves requests until `running` is cleared, echoing the site and doubling
/// `data.amount`.
fn spawn_responder(broker: &InMemoryBroker, running: Arc<AtomicBool>) -> JoinHandle<usize> {
    let responder = RpcResponder::new(manager(broker), QUEUE);
    responder.ensure_queue().unwrap();
    thread::spawn(move || {
        let mut served = 0;
        while running.load(Ordering::SeqCst) {
            let handled = responder
                .serve_next(Duration::from_millis(20), |request| {
                    let amount = request.data["amount"].as_i64().unwrap_or(0);
                    json!({ "site": request.entity_site, "amount": amount * 2 })
                })
                .unwrap();
            if handled {
                served += 1;
            }
        }
        served
    })
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn call_returns_the_reply_result() {
    let broker = InMemoryBroker::new();
    let running = Arc::new(AtomicBool::new(true));
    let responder = spawn_responder(&broker, Arc::clone(&running));

    let mut client = RpcClient::new(manager(&broker), QUEUE);
    let request = RpcRequest::new("created", "order", &site(), json!({ "amount": 21 }));
    let result = client.call(&request, Duration::from_secs(2)).unwrap();

    assert_eq!(result, json!({ "site": "shop.example.com", "amount": 42 }));

    running.store(false, Ordering::SeqCst);
    assert_eq!(responder.join().unwrap(), 1);
}

#[test]
fn interleaved_clients_get_their_own_replies() {
    let broker = InMemoryBroker::new();
    let running = Arc::new(AtomicBool::new(true));
    let responder = spawn_responder(&broker, Arc::clone(&running));

    let callers: Vec<_> = (1..=4)
        .map(|n| {
            let manager = manager(&broker);
            thread::spawn(move || {
                let mut client = RpcClient::new(manager, QUEUE);
                (1..=5)
                    .map(|i| {
                        let amount: i64 = n * 100 + i;
                        let request =
                            RpcRequest::new("changed", "order", &site(), json!({ "amount": amount }));
                        let result = client.call(&request, Duration::from_secs(5)).unwrap();
                        (amount, result["amount"].as_i64().unwrap())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for caller in callers {
        for (sent, received) in caller.join().unwrap() {
            assert_eq!(received, sent * 2);
        }
    }

    running.store(false, Ordering::SeqCst);
    assert_eq!(responder.join().unwrap(), 20);
}

#[test]
fn largest_configured_timeout_is_usable() {
    let broker = InMemoryBroker::new();
    let running = Arc::new(AtomicBool::new(true));
    let responder = spawn_responder(&broker, Arc::clone(&running));

    let vars = HashMap::from([("GM_RPC_TIMEOUT".to_string(), u64::MAX.to_string())]);
    let settings = BrokerSettings::from_env(&EnvConfig::with_source("GM", vars)).unwrap();
    let mut client = RpcClient::new(
        Arc::new(ConnectionManager::new(broker.clone(), settings)),
        QUEUE,
    );
    assert_eq!(client.default_timeout(), Duration::from_secs(u64::MAX));

    let request = RpcRequest::new("created", "order", &site(), json!({ "amount": 4 }));
    let result = client.call_default(&request).unwrap();
    assert_eq!(result["amount"], json!(8));

    running.store(false, Ordering::SeqCst);
    responder.join().unwrap();
}

#[test]
fn missing_result_is_null() {
    let broker = InMemoryBroker::new();
    let manager = manager(&broker);
    let mut client = RpcClient::new(Arc::clone(&manager), QUEUE);
    // Declares the reply queue.
    let _ = client.call(
        &RpcRequest::new("created", "order", &site(), Value::Null),
        Duration::ZERO,
    );

    // Answer the next call by hand with a reply that has no `result`.
    let reply_queue = client.reply_queue().to_string();
    let responder = RpcResponder::new(Arc::clone(&manager), QUEUE);
    responder.ensure_queue().unwrap();
    let handle = thread::spawn({
        let broker = broker.clone();
        move || {
            while broker.queue_depth(QUEUE) == 0 {
                thread::yield_now();
            }
            let request = broker.published().pop().unwrap();
            let correlation_id = request.properties.correlation_id.unwrap();
            broker.inject(
                &reply_queue,
                codec::encode(&json!({ "status": "ok" })).unwrap(),
                MessageProperties::default().with_correlation_id(correlation_id),
            );
        }
    });

    let result = client
        .call(
            &RpcRequest::new("created", "order", &site(), Value::Null),
            Duration::from_secs(2),
        )
        .unwrap();
    handle.join().unwrap();
    assert_eq!(result, Value::Null);
}

// ============================================================================
// Timeouts and cancellation
// ============================================================================

#[test]
fn call_without_responder_times_out() {
    let broker = InMemoryBroker::new();
    let mut client = RpcClient::new(manager(&broker), QUEUE);

    let result = client.call(
        &RpcRequest::new("created", "order", &site(), json!({})),
        Duration::from_millis(100),
    );
    match result {
        Err(RpcError::Timeout { waited, .. }) => assert_eq!(waited, Duration::from_millis(100)),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn cancellation_from_another_thread() {
    let broker = InMemoryBroker::new();
    let mut client = RpcClient::new(manager(&broker), QUEUE);
    let token = CancelToken::new();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let result = client.call_cancellable(
        &RpcRequest::new("created", "order", &site(), json!({})),
        Duration::from_secs(10),
        &token,
    );
    canceller.join().unwrap();
    assert!(matches!(result, Err(RpcError::Cancelled { .. })));
}
