//! Consumer registry tests

use super::*;
use crate::protocol::DeliveryMode;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl Deliver for Recorder {
    fn deliver(&self, consumer_tag: &str, properties: &BasicProperties, body: &[u8]) -> bool {
        self.calls
            .lock()
            .push((consumer_tag.to_string(), properties.id.clone(), body.to_vec()));
        true
    }
}

fn sink() -> Arc<dyn Deliver> {
    Arc::new(Recorder::default())
}

fn registry_with(tags: &[&str]) -> ConsumerRegistry {
    let registry = ConsumerRegistry::new();
    registry.init_queue("queue1");
    for tag in tags {
        registry
            .create(tag, "queue1", true, sink())
            .expect("Failed to create consumer");
    }
    registry
}

#[test]
fn test_round_robin_wraps() {
    let registry = registry_with(&["c1", "c2", "c3"]);

    let chosen: Vec<String> = (0..4)
        .filter_map(|_| registry.choose("queue1"))
        .map(|c| c.tag.clone())
        .collect();
    assert_eq!(chosen, vec!["c1", "c2", "c3", "c1"]);
}

#[test]
fn test_duplicate_tag_is_rejected() {
    let registry = registry_with(&["c1"]);

    let result = registry.create("c1", "queue1", false, sink());
    assert!(matches!(result, Err(TidemqError::Conflict(_))));
    assert_eq!(registry.consumer_count("queue1"), 1);
    assert!(registry.choose("queue1").map_or(false, |c| c.auto_ack));
}

#[test]
fn test_create_requires_initialized_queue() {
    let registry = ConsumerRegistry::new();
    let result = registry.create("c1", "missing", true, sink());
    assert!(matches!(result, Err(TidemqError::NotFound(_))));
    assert!(registry.choose("missing").is_none());
}

#[test]
fn test_remove_shifts_rotation() {
    let registry = registry_with(&["c1", "c2", "c3"]);

    assert_eq!(registry.choose("queue1").map(|c| c.tag.clone()), Some("c1".to_string()));
    assert!(registry.remove("c2", "queue1"));
    assert!(!registry.remove("c2", "queue1"));
    assert!(!registry.exists("c2", "queue1"));

    // cursor is 1, list is now [c1, c3]
    assert_eq!(registry.choose("queue1").map(|c| c.tag.clone()), Some("c3".to_string()));
    assert_eq!(registry.choose("queue1").map(|c| c.tag.clone()), Some("c1".to_string()));
}

#[test]
fn test_empty_queue_has_no_choice() {
    let registry = registry_with(&[]);
    assert!(registry.is_empty("queue1"));
    assert!(registry.choose("queue1").is_none());
    assert!(registry.is_empty("never-declared"));
}

#[test]
fn test_destroy_queue_cancels_consumers() {
    let registry = registry_with(&["c1", "c2"]);
    registry.destroy_queue("queue1");
    assert!(!registry.exists("c1", "queue1"));
    assert_eq!(registry.consumer_count("queue1"), 0);

    // Re-declaring starts from an empty list
    registry.init_queue("queue1");
    assert!(registry.is_empty("queue1"));
}

#[test]
fn test_init_queue_keeps_existing_consumers() {
    let registry = registry_with(&["c1"]);
    registry.init_queue("queue1");
    assert!(registry.exists("c1", "queue1"));
}

#[test]
fn test_consumer_delivers_through_sink() {
    let recorder = Arc::new(Recorder::default());
    let registry = ConsumerRegistry::new();
    registry.init_queue("queue1");
    registry
        .create("c1", "queue1", false, recorder.clone())
        .expect("Failed to create consumer");

    let message = Message {
        properties: BasicProperties::new("m1", DeliveryMode::Durable, "news.music.pop"),
        body: Bytes::from("hello"),
        offset: 8,
        length: 5,
    };
    let consumer = registry.choose("queue1").expect("Expected a consumer");
    assert!(consumer.deliver(&message));

    let calls = recorder.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("c1".to_string(), "m1".to_string(), b"hello".to_vec()));
}

#[test]
fn test_closures_are_sinks() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let closure_sink: Arc<dyn Deliver> =
        Arc::new(move |tag: &str, _props: &BasicProperties, body: &[u8]| {
            captured.lock().push(format!("{}:{}", tag, String::from_utf8_lossy(body)));
        });

    let consumer = Consumer::new("c9", "queue1", true, closure_sink);
    assert!(consumer.deliver(&Message {
        properties: BasicProperties::new("m", DeliveryMode::Undurable, ""),
        body: Bytes::from("x"),
        offset: 0,
        length: 0,
    }));
    assert_eq!(seen.lock().as_slice(), ["c9:x".to_string()]);
}
