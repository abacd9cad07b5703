// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for offline sends and outbox reconciliation.
//!
//! Drives the delivery [`Coordinator`] over an in-memory store and a
//! loopback transport pair. The `remote` end stands in for the echo channel:
//! connecting it (and the local end) is what "the transport now accepts
//! sends" means here, and its incoming stream shows the order in which
//! payloads actually went out.
//!
//! These tests validate:
//! - one logical send leaves exactly one delivered or pending row
//! - an offline send queues without touching the preview
//! - a later sweep promotes queued entries with their original timestamps
//! - bulk retry processes entries in global timestamp order across chats
//! - the last-writer-wins preview lets an older retried message win
//! - a store failure or a vanished entry does not stop the rest of a sweep
//! - unread counters track unread rows through receive and read cycles
//! - the connectivity driver reconnects and drains the outbox

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use postbox::clock::ManualClock;
use postbox::connectivity::{self, ConnectivitySignal};
use postbox::delivery::{Coordinator, Notice, RetryOutcome};
use postbox::transport::loopback::LoopbackTransport;
use postbox::transport::{
    ConnectionState, IncomingStream, Transport, TransportError, TransportMode, TransportType,
};
use postbox_store::{ChatId, PendingId, Store};
use tokio::sync::{mpsc, watch};

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    coordinator: Coordinator<LoopbackTransport>,
    notices: mpsc::Receiver<Notice>,
    remote: Arc<LoopbackTransport>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_store(Store::open_in_memory().unwrap())
    }

    fn with_store(store: Store) -> Self {
        let (local, remote) = LoopbackTransport::create_pair(64);
        let clock = Arc::new(ManualClock::new(100));
        let (coordinator, notices) = Coordinator::with_clock(
            store,
            Arc::new(local),
            clock.clone(),
            64,
        );
        Self {
            coordinator,
            notices,
            remote: Arc::new(remote),
            clock,
        }
    }

    fn store(&self) -> &Store {
        self.coordinator.store()
    }

    /// Bring both ends up and return what the remote end receives.
    async fn go_online(&self) -> IncomingStream {
        self.remote.connect().await.unwrap();
        self.coordinator.transport().connect().await.unwrap();
        self.remote.incoming().unwrap()
    }

    async fn send_offline_at(&self, chat: ChatId, body: &str, at: i64) -> PendingId {
        self.clock.set(at);
        let accepted = self
            .coordinator
            .send_message(chat, "You", body, false)
            .await
            .unwrap();
        assert!(!accepted, "transport should refuse while disconnected");
        self.store()
            .list_pending_for_chat(chat)
            .unwrap()
            .into_iter()
            .find(|p| p.body == body && p.timestamp == at)
            .unwrap()
            .id
    }
}

async fn next_payload(stream: &mut IncomingStream) -> String {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for payload")
        .expect("stream ended")
}

// =============================================================================
// Send
// =============================================================================

#[tokio::test]
async fn offline_send_queues_and_leaves_preview_alone() {
    let mut fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();

    fx.send_offline_at(chat, "hi", 100).await;

    let pending = fx.store().list_pending_for_chat(chat).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body, "hi");
    assert!(fx.store().list_messages(chat).unwrap().is_empty());

    let chat_row = fx.store().get_chat(chat).unwrap();
    assert_eq!(chat_row.last_message, "");
    assert_eq!(chat_row.last_message_time, 0);

    assert!(matches!(
        fx.notices.try_recv().unwrap(),
        Notice::Queued { chat_id } if chat_id == chat
    ));
}

#[tokio::test]
async fn retry_after_reconnect_promotes_with_original_timestamp() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    fx.send_offline_at(chat, "hi", 100).await;

    fx.clock.set(5_000);
    let mut remote_inbox = fx.go_online().await;
    let summary = fx.coordinator.retry_pending().await.unwrap();

    assert_eq!(summary.delivered.len(), 1);
    assert_eq!(summary.still_pending, 0);
    assert_eq!(next_payload(&mut remote_inbox).await, "hi");

    assert!(fx.store().list_pending().unwrap().is_empty());
    let messages = fx.store().list_messages(chat).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "hi");
    assert_eq!(messages[0].timestamp, 100);
    assert!(!messages[0].unread);

    let chat_row = fx.store().get_chat(chat).unwrap();
    assert_eq!(chat_row.last_message, "hi");
    assert_eq!(chat_row.last_message_time, 100);
}

#[tokio::test]
async fn every_send_leaves_exactly_one_row() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    let mut remote_inbox = fx.go_online().await;

    // Flags disagreeing with the link in both directions.
    let cases = [(true, "online-up"), (false, "offline-up")];
    for (flag, body) in cases {
        fx.clock.advance(10);
        assert!(fx.coordinator.send_message(chat, "You", body, flag).await.unwrap());
        assert_eq!(next_payload(&mut remote_inbox).await, body);
    }
    fx.coordinator.transport().close().await;
    for (flag, body) in [(true, "online-down"), (false, "offline-down")] {
        fx.clock.advance(10);
        assert!(!fx.coordinator.send_message(chat, "You", body, flag).await.unwrap());
    }

    let delivered: Vec<String> = fx
        .store()
        .list_messages(chat)
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    let pending: Vec<String> = fx
        .store()
        .list_pending_for_chat(chat)
        .unwrap()
        .into_iter()
        .map(|p| p.body)
        .collect();

    assert_eq!(delivered, ["online-up", "online-down"]);
    assert_eq!(pending, ["offline-up", "offline-down"]);
}

#[tokio::test]
async fn refused_send_while_flagged_online_is_recorded_and_noticed() {
    let mut fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();

    let accepted = fx
        .coordinator
        .send_message(chat, "You", "lost", true)
        .await
        .unwrap();

    assert!(!accepted);
    assert_eq!(fx.store().list_messages(chat).unwrap().len(), 1);
    assert!(fx.store().list_pending().unwrap().is_empty());
    assert_eq!(fx.store().get_chat(chat).unwrap().last_message, "lost");
    assert!(matches!(
        fx.notices.try_recv().unwrap(),
        Notice::SendFailed(_)
    ));
}

// =============================================================================
// Receive and read
// =============================================================================

#[tokio::test]
async fn incoming_message_is_unread_and_becomes_preview() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    assert_eq!(fx.store().get_chat(chat).unwrap().unread_count, 0);

    fx.coordinator.save_incoming(chat, "Bot", "hello").unwrap();

    let messages = fx.store().list_messages(chat).unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].unread);
    assert_eq!(messages[0].sender, "Bot");

    let chat_row = fx.store().get_chat(chat).unwrap();
    assert_eq!(chat_row.unread_count, 1);
    assert_eq!(chat_row.last_message, "hello");
}

#[tokio::test]
async fn unread_counter_matches_rows_and_mark_read_is_idempotent() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    let other = fx.coordinator.create_chat("B").unwrap();

    for body in ["one", "two", "three"] {
        fx.clock.advance(1);
        fx.coordinator.save_incoming(chat, "Bot", body).unwrap();
    }
    fx.coordinator.save_incoming(other, "Bot", "elsewhere").unwrap();

    let check = |id: ChatId| {
        let counter = fx.store().get_chat(id).unwrap().unread_count;
        assert_eq!(counter, fx.store().unread_message_count(id).unwrap());
        counter
    };
    assert_eq!(check(chat), 3);

    fx.coordinator.mark_chat_read(chat).unwrap();
    let once = (fx.store().get_chat(chat).unwrap(), fx.store().list_messages(chat).unwrap());
    fx.coordinator.mark_chat_read(chat).unwrap();
    let twice = (fx.store().get_chat(chat).unwrap(), fx.store().list_messages(chat).unwrap());

    assert_eq!(once, twice);
    assert_eq!(check(chat), 0);
    assert_eq!(check(other), 1);
}

#[tokio::test]
async fn discarding_an_absent_entry_is_a_no_op() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    let pending = fx.send_offline_at(chat, "drop me", 100).await;

    fx.coordinator.discard_pending(pending).unwrap();
    fx.coordinator.discard_pending(pending).unwrap();
    fx.coordinator.discard_pending(PendingId::new(9_999)).unwrap();

    assert!(fx.store().list_pending().unwrap().is_empty());
}

// =============================================================================
// Merged view
// =============================================================================

#[tokio::test]
async fn delivered_sorts_before_pending_at_equal_timestamps() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();

    // Queue first so the pending row is older by id, then deliver.
    fx.send_offline_at(chat, "queued", 100).await;
    fx.coordinator.save_incoming(chat, "Bot", "delivered").unwrap();

    let views = fx.coordinator.get_messages(chat).unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].body, "delivered");
    assert!(!views[0].is_pending());
    assert_eq!(views[1].body, "queued");
    assert!(views[1].is_pending());
    assert!(views.iter().all(|v| v.timestamp == 100));
}

// =============================================================================
// Bulk and single retry
// =============================================================================

#[tokio::test]
async fn bulk_retry_is_global_fifo_across_chats() {
    let fx = Fixture::new();
    let a = fx.coordinator.create_chat("A").unwrap();
    let b = fx.coordinator.create_chat("B").unwrap();

    // Enqueued out of time order so the global sort is what matters.
    let a2 = fx.send_offline_at(a, "a2", 300).await;
    let b1 = fx.send_offline_at(b, "b1", 200).await;
    let a1 = fx.send_offline_at(a, "a1", 100).await;
    let b2 = fx.send_offline_at(b, "b2", 400).await;

    let mut remote_inbox = fx.go_online().await;
    let summary = fx.coordinator.retry_pending().await.unwrap();

    assert_eq!(summary.delivered, vec![a1, b1, a2, b2]);
    assert_eq!(summary.attempted(), 4);
    for expected in ["a1", "b1", "a2", "b2"] {
        assert_eq!(next_payload(&mut remote_inbox).await, expected);
    }

    let chat_a = fx.store().get_chat(a).unwrap();
    let chat_b = fx.store().get_chat(b).unwrap();
    assert_eq!((chat_a.last_message.as_str(), chat_a.last_message_time), ("a2", 300));
    assert_eq!((chat_b.last_message.as_str(), chat_b.last_message_time), ("b2", 400));

    let bodies = |chat| -> Vec<String> {
        fx.store()
            .list_messages(chat)
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect()
    };
    assert_eq!(bodies(a), ["a1", "a2"]);
    assert_eq!(bodies(b), ["b1", "b2"]);
    assert!(fx.store().list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn bulk_retry_while_down_keeps_everything_queued() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    fx.send_offline_at(chat, "one", 100).await;
    fx.send_offline_at(chat, "two", 200).await;

    let summary = fx.coordinator.retry_pending().await.unwrap();

    assert!(summary.delivered.is_empty());
    assert_eq!(summary.still_pending, 2);
    assert_eq!(fx.store().list_pending().unwrap().len(), 2);
    assert!(fx.store().list_messages(chat).unwrap().is_empty());
}

#[tokio::test]
async fn older_retried_message_overwrites_newer_preview() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    fx.send_offline_at(chat, "older", 100).await;

    let mut remote_inbox = fx.go_online().await;
    fx.clock.set(200);
    fx.coordinator
        .send_message(chat, "You", "newer", true)
        .await
        .unwrap();
    assert_eq!(next_payload(&mut remote_inbox).await, "newer");
    assert_eq!(fx.store().get_chat(chat).unwrap().last_message, "newer");

    fx.coordinator.retry_pending().await.unwrap();

    // Last writer wins: the preview now shows the older message.
    let chat_row = fx.store().get_chat(chat).unwrap();
    assert_eq!(chat_row.last_message, "older");
    assert_eq!(chat_row.last_message_time, 100);

    // The log itself is still in timestamp order.
    let views = fx.coordinator.get_messages(chat).unwrap();
    let bodies: Vec<&str> = views.iter().map(|v| v.body.as_str()).collect();
    assert_eq!(bodies, ["older", "newer"]);
}

#[tokio::test]
async fn store_failure_on_one_entry_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postbox.db");
    let store = Store::open(&path).unwrap();
    // A second connection installs a trigger that rejects one body.
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON messages
             WHEN NEW.body = 'poison'
             BEGIN SELECT RAISE(ABORT, 'poisoned'); END;",
        )
        .unwrap();

    let mut fx = Fixture::with_store(store);
    let chat = fx.coordinator.create_chat("A").unwrap();
    let ok1 = fx.send_offline_at(chat, "ok1", 100).await;
    let poison = fx.send_offline_at(chat, "poison", 200).await;
    let ok2 = fx.send_offline_at(chat, "ok2", 300).await;
    while fx.notices.try_recv().is_ok() {}

    let mut remote_inbox = fx.go_online().await;
    let summary = fx.coordinator.retry_pending().await.unwrap();

    assert_eq!(summary.delivered, vec![ok1, ok2]);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.still_pending, 0);
    for expected in ["ok1", "poison", "ok2"] {
        assert_eq!(next_payload(&mut remote_inbox).await, expected);
    }

    let left: Vec<PendingId> = fx
        .store()
        .list_pending()
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(left, vec![poison]);
    let bodies: Vec<String> = fx
        .store()
        .list_messages(chat)
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, ["ok1", "ok2"]);
    assert_eq!(fx.store().get_chat(chat).unwrap().last_message, "ok2");

    match fx.notices.try_recv().unwrap() {
        Notice::RetryFailed { pending_id, reason } => {
            assert_eq!(pending_id, poison);
            assert!(reason.contains("poisoned"), "unexpected reason: {reason}");
        }
        other => panic!("expected RetryFailed, got {other:?}"),
    }
}

/// Accepts every payload. On the first send after `victim` is set it
/// deletes that pending entry, as a concurrent discard would.
struct DiscardOnSend {
    store: Store,
    victim: Mutex<Option<PendingId>>,
    signal: watch::Sender<bool>,
}

impl Transport for DiscardOnSend {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _text: &str) -> bool {
        let victim = self.victim.lock().take();
        if let Some(id) = victim {
            self.store.delete_pending(id).unwrap();
        }
        true
    }

    fn incoming(&self) -> Option<IncomingStream> {
        None
    }

    async fn close(&self) {}

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    async fn set_mode(&self, _mode: TransportMode) {}

    fn mode(&self) -> TransportMode {
        TransportMode::Live
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

#[tokio::test]
async fn entry_discarded_mid_sweep_counts_as_vanished() {
    let store = Store::open_in_memory().unwrap();
    let transport = Arc::new(DiscardOnSend {
        store: store.clone(),
        victim: Mutex::new(None),
        signal: watch::channel(true).0,
    });
    let clock = Arc::new(ManualClock::new(100));
    let (coordinator, _notices) =
        Coordinator::with_clock(store, Arc::clone(&transport), clock.clone(), 16);
    let chat = coordinator.create_chat("A").unwrap();

    for body in ["first", "second", "third"] {
        clock.advance(10);
        coordinator
            .send_message(chat, "You", body, false)
            .await
            .unwrap();
    }
    let queued: Vec<PendingId> = coordinator
        .store()
        .list_pending()
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    *transport.victim.lock() = Some(queued[1]);

    let summary = coordinator.retry_pending().await.unwrap();

    assert_eq!(summary.delivered, vec![queued[0], queued[2]]);
    assert_eq!(summary.vanished, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.attempted(), 3);
    assert!(coordinator.store().list_pending().unwrap().is_empty());
    let bodies: Vec<String> = coordinator
        .store()
        .list_messages(chat)
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, ["first", "third"]);
}

#[tokio::test]
async fn single_retry_outcomes() {
    let fx = Fixture::new();
    let a = fx.coordinator.create_chat("A").unwrap();
    let b = fx.coordinator.create_chat("B").unwrap();
    let pending = fx.send_offline_at(a, "hi", 100).await;

    // Not known to be online: no attempt.
    assert_eq!(
        fx.coordinator.retry_single(a, pending, false).await.unwrap(),
        RetryOutcome::Skipped
    );
    // Flag says online but the link is down.
    assert_eq!(
        fx.coordinator.retry_single(a, pending, true).await.unwrap(),
        RetryOutcome::StillPending
    );
    // Wrong chat or unknown id.
    assert_eq!(
        fx.coordinator.retry_single(b, pending, true).await.unwrap(),
        RetryOutcome::NotFound
    );
    assert_eq!(
        fx.coordinator
            .retry_single(a, PendingId::new(9_999), true)
            .await
            .unwrap(),
        RetryOutcome::NotFound
    );
    assert_eq!(fx.store().list_pending().unwrap().len(), 1);

    let mut remote_inbox = fx.go_online().await;
    let outcome = fx.coordinator.retry_single(a, pending, true).await.unwrap();
    assert!(matches!(outcome, RetryOutcome::Delivered(_)));
    assert_eq!(next_payload(&mut remote_inbox).await, "hi");
    assert!(fx.store().list_pending().unwrap().is_empty());
    assert_eq!(fx.store().get_chat(a).unwrap().last_message, "hi");
}

// =============================================================================
// Connectivity driver
// =============================================================================

#[tokio::test]
async fn connectivity_true_reconnects_and_drains_outbox() {
    let fx = Fixture::new();
    let chat = fx.coordinator.create_chat("A").unwrap();
    fx.send_offline_at(chat, "queued-1", 100).await;
    fx.send_offline_at(chat, "queued-2", 200).await;

    fx.remote.connect().await.unwrap();
    let mut remote_inbox = fx.remote.incoming().unwrap();

    let Fixture {
        coordinator,
        notices: _notices,
        remote: _remote,
        ..
    } = fx;
    let coordinator = Arc::new(coordinator);
    let signal = ConnectivitySignal::with_initial(Some(false));
    let driver = connectivity::spawn_reconnect_driver(Arc::clone(&coordinator), signal.subscribe());

    // Offline: nothing moves.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.store().list_pending().unwrap().len(), 2);

    signal.set(Some(true));
    assert_eq!(next_payload(&mut remote_inbox).await, "queued-1");
    assert_eq!(next_payload(&mut remote_inbox).await, "queued-2");

    tokio::time::timeout(Duration::from_secs(5), async {
        while !coordinator.store().list_pending().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("outbox never drained");

    assert!(coordinator.transport().is_connected());
    assert_eq!(coordinator.store().list_messages(chat).unwrap().len(), 2);

    drop(signal);
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("driver did not exit")
        .unwrap();
}

#[tokio::test]
async fn reconcile_reports_connect_failure_and_still_sweeps() {
    let (local, remote) = LoopbackTransport::create_pair(8);
    drop(remote);
    let (coordinator, mut notices) =
        Coordinator::new(Store::open_in_memory().unwrap(), Arc::new(local), 8);
    let chat = coordinator.create_chat("A").unwrap();
    coordinator
        .send_message(chat, "You", "stuck", false)
        .await
        .unwrap();
    let _ = notices.try_recv();

    let summary = connectivity::reconcile(&coordinator).await.unwrap();

    assert_eq!(summary.still_pending, 1);
    assert!(matches!(
        notices.try_recv().unwrap(),
        Notice::ConnectFailed(_)
    ));
    assert_eq!(coordinator.store().list_pending().unwrap().len(), 1);
}
