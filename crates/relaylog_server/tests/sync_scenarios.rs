//! End-to-end sync scenarios between replicas and the relay.

use proptest::prelude::*;
use relaylog_protocol::{
    Clock, HashIndex, ManualClock, MessageEnvelope, ProtocolError, SyncRequest, SyncResponse,
    Timestamp,
};
use relaylog_server::{ServerConfig, ServerError, SyncServer};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

const BASE: u64 = 1_709_294_400_000;
const GROUP: &str = "g";

/// A client replica: its own clock, the messages it knows, and their index.
struct Replica {
    clock: Clock<ManualClock>,
    index: HashIndex,
    known: BTreeSet<String>,
}

impl Replica {
    fn new(id: &str) -> Self {
        Self {
            clock: Clock::with_wall_clock(id, ManualClock::new(BASE)).unwrap(),
            index: HashIndex::new(),
            known: BTreeSet::new(),
        }
    }

    fn id(&self) -> &str {
        self.clock.replica_id()
    }

    /// Records a local write and returns it ready to send.
    fn write(&mut self, column: &str, value: serde_json::Value) -> MessageEnvelope {
        self.clock.wall().advance(1_000);
        let ts = self.clock.send().unwrap();
        self.index = std::mem::take(&mut self.index).insert(&ts);
        self.known.insert(ts.to_string());
        MessageEnvelope {
            timestamp: ts.to_string(),
            dataset: "todos".into(),
            row: "r1".into(),
            column: column.into(),
            value,
        }
    }

    /// Sends `outgoing` with the local index and merges the catch-up set.
    fn sync(&mut self, server: &SyncServer, outgoing: Vec<MessageEnvelope>) -> SyncResponse {
        let request = SyncRequest::new(GROUP, self.id())
            .with_messages(outgoing)
            .with_index(&self.index);
        let response = server.handle_sync(request).unwrap();
        for message in &response.data.messages {
            if self.known.insert(message.timestamp.clone()) {
                let ts = Timestamp::parse(&message.timestamp).unwrap();
                self.clock.recv(&ts).unwrap();
                self.index = std::mem::take(&mut self.index).insert(&ts);
            }
        }
        response
    }
}

fn server() -> SyncServer {
    SyncServer::new(ServerConfig::default()).unwrap()
}

fn timestamps(response: &SyncResponse) -> Vec<String> {
    response
        .data
        .messages
        .iter()
        .map(|m| m.timestamp.clone())
        .collect()
}

#[test]
fn fresh_sync_returns_the_whole_group() {
    let server = server();
    let mut a = Replica::new("A");
    let batch = vec![a.write("title", json!("milk")), a.write("done", json!(0))];
    let expected: Vec<_> = batch.iter().map(|m| m.timestamp.clone()).collect();
    a.sync(&server, batch);

    let response = server
        .handle_sync(SyncRequest::new(GROUP, "C").with_raw_index(json!({})))
        .unwrap();

    assert_eq!(timestamps(&response), expected);
    assert!(!response.data.index.is_empty());
    assert_eq!(response.data.index.len(), 2);
    assert_eq!(response.data.messages[0].value, json!("milk"));
}

#[test]
fn request_without_index_gets_no_catch_up() {
    let server = server();
    let mut a = Replica::new("A");
    let m = a.write("title", json!("milk"));
    a.sync(&server, vec![m]);

    let response = server.handle_sync(SyncRequest::new(GROUP, "C")).unwrap();
    assert!(response.data.messages.is_empty());
    assert_eq!(response.data.index.len(), 1);
}

#[test]
fn own_messages_are_not_echoed() {
    let server = server();
    let mut a = Replica::new("A");

    let m = a.write("title", json!("milk"));
    let first = a.sync(&server, vec![m]);
    assert!(first.data.messages.is_empty());

    let second = a.sync(&server, vec![]);
    assert!(second.data.messages.is_empty());
    assert_eq!(second.data.index, a.index);
}

#[test]
fn echo_is_suppressed_even_with_a_stale_index() {
    let server = server();
    let mut a = Replica::new("A");
    let m = a.write("title", json!("milk"));
    a.sync(&server, vec![m]);

    let response = server
        .handle_sync(SyncRequest::new(GROUP, "A").with_index(&HashIndex::new()))
        .unwrap();
    assert!(response.data.messages.is_empty());
}

#[test]
fn peer_catches_up() {
    let server = server();
    let mut a = Replica::new("A");
    let mut b = Replica::new("B");

    let m = a.write("title", json!("milk"));
    a.sync(&server, vec![m.clone()]);

    let response = b.sync(&server, vec![]);
    assert_eq!(response.data.messages, vec![m]);
    assert_eq!(b.index, a.index);
}

#[test]
fn replicas_converge() {
    let server = server();
    let mut a = Replica::new("A");
    let mut b = Replica::new("B");

    let from_a = vec![a.write("title", json!("milk")), a.write("qty", json!(2))];
    a.sync(&server, from_a);
    let from_b = vec![b.write("title", json!("eggs")), b.write("note", json!(null))];
    b.sync(&server, from_b);
    a.sync(&server, vec![]);

    let index = server.log().index(GROUP).unwrap();
    assert_eq!(a.index, index);
    assert_eq!(b.index, index);
    assert_eq!(a.known, b.known);
    assert_eq!(index.len(), 4);
}

#[test]
fn retry_is_idempotent() {
    let server = server();
    let mut a = Replica::new("A");
    let batch = vec![a.write("title", json!("milk")), a.write("qty", json!(3.5))];

    let first = server
        .sync(SyncRequest::new(GROUP, "A").with_messages(batch.clone()))
        .unwrap();
    let second = server
        .sync(SyncRequest::new(GROUP, "A").with_messages(batch))
        .unwrap();

    assert_eq!(first.accepted, 2);
    assert_eq!(second.accepted, 0);
    assert_eq!(first.index, second.index);
    assert_eq!(server.store().message_count(GROUP), 2);
}

#[test]
fn duplicate_with_different_content_keeps_the_original() {
    let server = server();
    let mut a = Replica::new("A");
    let original = a.write("title", json!("milk"));
    let mut forged = original.clone();
    forged.value = json!("whisky");

    server
        .sync(SyncRequest::new(GROUP, "A").with_messages(vec![original.clone()]))
        .unwrap();
    server
        .sync(SyncRequest::new(GROUP, "A").with_messages(vec![forged]))
        .unwrap();

    let response = server
        .handle_sync(SyncRequest::new(GROUP, "B").with_index(&HashIndex::new()))
        .unwrap();
    assert_eq!(response.data.messages, vec![original]);
}

#[test]
fn bad_message_rolls_back_the_whole_batch() {
    let server = server();
    let mut a = Replica::new("A");
    let good = a.write("title", json!("milk"));
    let bad = a.write("tags", json!(["dairy"]));

    let err = server
        .sync(SyncRequest::new(GROUP, "A").with_messages(vec![good.clone(), bad]))
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Protocol(ProtocolError::Serialization(_))
    ));
    assert_eq!(server.store().message_count(GROUP), 0);
    assert!(server.log().index(GROUP).unwrap().is_empty());

    let mut malformed = good.clone();
    malformed.timestamp = "2024-03-01 12:00".into();
    let err = server
        .sync(SyncRequest::new(GROUP, "A").with_messages(vec![good, malformed]))
        .unwrap_err();
    assert!(matches!(err, ServerError::Protocol(ProtocolError::Format { .. })));
    assert_eq!(server.store().message_count(GROUP), 0);
}

#[test]
fn foreign_index_is_rejected_not_ignored() {
    let server = server();
    let mut a = Replica::new("A");
    let m = a.write("title", json!("milk"));
    a.sync(&server, vec![m]);

    for foreign in [
        json!([1, 2, 3]),
        json!({"hash": "abc"}),
        json!({"hash": 1, "3": {"hash": 1}}),
        json!({"hash": 1, "minutes": {}}),
    ] {
        let err = server
            .sync(SyncRequest::new(GROUP, "B").with_raw_index(foreign.clone()))
            .unwrap_err();
        assert!(
            matches!(err, ServerError::Protocol(ProtocolError::IndexShape { .. })),
            "{foreign}"
        );
        assert!(err.is_client_error());
    }
}

#[test]
fn groups_are_isolated() {
    let server = server();
    let mut a = Replica::new("A");
    let m = a.write("title", json!("milk"));
    a.sync(&server, vec![m]);

    let response = server
        .handle_sync(SyncRequest::new("other", "B").with_index(&HashIndex::new()))
        .unwrap();
    assert!(response.data.messages.is_empty());
    assert!(response.data.index.is_empty());
}

#[test]
fn concurrent_same_group_syncs_lose_nothing() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 25;

    let server = Arc::new(server());
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let server = Arc::clone(&server);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut replica = Replica::new(&format!("W{w}"));
                let batch: Vec<_> = (0..PER_WRITER)
                    .map(|i| replica.write("n", json!(i)))
                    .collect();
                barrier.wait();
                for message in batch {
                    server
                        .sync(SyncRequest::new(GROUP, replica.id()).with_messages(vec![message]))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let log = server.log();
    let index = log.index(GROUP).unwrap();
    assert_eq!(server.store().message_count(GROUP), WRITERS * PER_WRITER);
    assert_eq!(index.len(), (WRITERS * PER_WRITER) as u64);
    assert_eq!(index, log.rebuild_index(GROUP).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_interleaving_converges(plan in prop::collection::vec((0..3usize, 0..3usize), 1..20)) {
        let server = server();
        let mut replicas = [Replica::new("A"), Replica::new("B"), Replica::new("C")];

        // Each step: replica `writer` writes `count` messages and syncs.
        for (writer, count) in plan {
            let replica = &mut replicas[writer];
            let batch = (0..count).map(|i| replica.write("v", json!(i))).collect();
            replica.sync(&server, batch);
        }
        for replica in &mut replicas {
            replica.sync(&server, vec![]);
        }

        let index = server.log().index(GROUP).unwrap();
        for replica in &replicas {
            prop_assert_eq!(&replica.index, &index);
            prop_assert_eq!(replica.known.len() as u64, index.len());
        }
    }
}
