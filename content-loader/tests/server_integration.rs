//! Integration tests for the content server behind both backends.
//!
//! Run with: `cargo test --test server_integration`

use std::sync::Arc;
use std::time::Duration;

use content_loader::backend::{ContentBackend, LocalBackend, WorkerBackend};
use content_loader::cache::MemoryBackendFactory;
use content_loader::server::{Command, Event, GetResource, ResponseType};
use content_loader::transport::{MockTransport, TransportError};

// ============================================================================
// Helper Functions
// ============================================================================

async fn poll_local<F>(backend: &mut LocalBackend, mut done: F) -> Vec<Event>
where
    F: FnMut(&[Event]) -> bool,
{
    let mut seen = Vec::new();
    for _ in 0..400 {
        seen.extend(backend.poll_events());
        if done(&seen) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    seen
}

fn poll_worker<F>(backend: &mut WorkerBackend, mut done: F) -> Vec<Event>
where
    F: FnMut(&[Event]) -> bool,
{
    let mut seen = Vec::new();
    for _ in 0..400 {
        seen.extend(backend.poll_events());
        if done(&seen) {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    seen
}

fn terminal_count(events: &[Event], request_id: &str) -> usize {
    events
        .iter()
        .filter(|e| match e {
            Event::ResourceData { request_id: id, .. } => id == request_id,
            Event::Error {
                request_id: Some(id),
                ..
            } => id == request_id,
            _ => false,
        })
        .count()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A request against an unopened cache fails at once and leaves origin
/// loads untouched.
#[tokio::test]
async fn test_unopened_cache_leaves_origins_idle() {
    let transport = Arc::new(MockTransport::new());
    let mut backend = LocalBackend::new(
        transport.clone(),
        Arc::new(MemoryBackendFactory::new()),
        tokio::runtime::Handle::current(),
    );
    backend.add_origin("https://a").unwrap();

    backend
        .get_resource(GetResource::new("r1", "level01", "x.bin"))
        .unwrap();
    let events = backend.poll_events();

    assert_eq!(
        events,
        vec![Event::Error {
            message: "Cache level01 is not ready.".to_string(),
            request_id: Some("r1".to_string()),
        }]
    );
    assert!(backend
        .server()
        .origins()
        .records()
        .iter()
        .all(|record| record.load_value() == 0));
    assert_eq!(backend.server().in_flight(), 0);
    assert_eq!(transport.total_calls(), 0);
}

/// Every request terminates exactly once and all origin loads return to zero.
#[tokio::test]
async fn test_mixed_outcomes_release_every_origin() {
    let transport = Arc::new(MockTransport::new());
    for i in 0..6 {
        let body = vec![i as u8; 1000];
        transport.insert(format!("https://a/{i}.bin"), body.clone());
        transport.insert(format!("https://b/{i}.bin"), body);
    }
    transport.insert_error(
        "https://a/3.bin",
        TransportError::Timeout {
            url: "https://a/3.bin".to_string(),
        },
    );
    transport.insert_error(
        "https://b/3.bin",
        TransportError::Timeout {
            url: "https://b/3.bin".to_string(),
        },
    );
    transport.set_chunk_size(100);

    let mut backend = LocalBackend::new(
        transport,
        Arc::new(MemoryBackendFactory::new()),
        tokio::runtime::Handle::current(),
    );
    backend.remove_origin("").unwrap();
    backend.add_origin("https://a").unwrap();
    backend.add_origin("https://b").unwrap();
    backend.open_cache("game").unwrap();
    poll_local(&mut backend, |e| !e.is_empty()).await;

    for i in 0..6 {
        backend
            .get_resource(GetResource::new(format!("r{i}"), "game", format!("{i}.bin")))
            .unwrap();
    }
    let loads: Vec<u32> = backend
        .server()
        .origins()
        .records()
        .iter()
        .map(|r| r.load_value())
        .collect();
    assert_eq!(loads, vec![3, 3]);

    let events = poll_local(&mut backend, |e| {
        (0..6).all(|i| terminal_count(e, &format!("r{i}")) == 1)
    })
    .await;

    for i in 0..6 {
        assert_eq!(terminal_count(&events, &format!("r{i}")), 1);
    }
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Error { request_id: Some(id), .. } if id == "r3"
    )));
    assert!(backend
        .server()
        .origins()
        .records()
        .iter()
        .all(|record| record.load_value() == 0));

    // progress per request never decreases and precedes the terminal event
    for i in 0..6 {
        let id = format!("r{i}");
        let mut last = 0u8;
        let mut finished = false;
        for event in &events {
            match event {
                Event::Progress {
                    request_id,
                    percent,
                } if *request_id == id => {
                    assert!(!finished);
                    assert!(*percent >= last);
                    last = *percent;
                }
                Event::ResourceData { request_id, .. } if *request_id == id => finished = true,
                _ => {}
            }
        }
    }
}

/// The worker backend speaks the same protocol as the in-process one.
#[test]
fn test_worker_backend_matches_local_protocol() {
    let transport = Arc::new(MockTransport::new());
    transport.insert("data.json", br#"{"level": 1}"#.to_vec());
    let mut backend =
        WorkerBackend::spawn(transport.clone(), Arc::new(MemoryBackendFactory::new())).unwrap();

    backend
        .send(Command::GetResource(GetResource::new("early", "game", "data.json")))
        .unwrap();
    backend.open_cache("game").unwrap();
    let events = poll_worker(&mut backend, |e| {
        e.iter().any(|e| matches!(e, Event::CacheReady { .. }))
    });
    assert!(matches!(
        &events[0],
        Event::Error { request_id: Some(id), .. } if id == "early"
    ));

    backend
        .get_resource(
            GetResource::new("r1", "game", "data.json")
                .with_response_type(ResponseType::Json)
                .with_return_cached(true),
        )
        .unwrap();
    let events = poll_worker(&mut backend, |e| terminal_count(e, "r1") == 1);
    let json = events.iter().find_map(|e| match e {
        Event::ResourceData { data, .. } => data.as_json().cloned(),
        _ => None,
    });
    assert_eq!(json, Some(serde_json::json!({ "level": 1 })));

    backend
        .get_resource(GetResource::new("r2", "game", "data.json"))
        .unwrap();
    poll_worker(&mut backend, |e| terminal_count(e, "r2") == 1);
    assert_eq!(transport.calls("data.json"), 1);

    backend.shutdown();
}
