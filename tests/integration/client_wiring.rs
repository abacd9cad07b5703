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

//! Integration tests for the full client wiring.
//!
//! A [`ChatClient`] over an in-memory store and a real WebSocket transport
//! talks to a `postbox-echo` server, so every payload that goes out comes
//! back in and is routed to a chat as the bot's reply.
//!
//! These tests validate:
//! - online sends are delivered and their echoes saved as unread bot messages
//! - incoming payloads with no chat around create the "Auto Chat"
//! - messages queued while offline drain when connectivity returns
//! - the simulated offline toggle queues and then drains
//! - shutdown stops the tasks and closes the transport

use std::sync::Arc;
use std::time::Duration;

use postbox::client::{AUTO_CHAT_NAME, ChatClient, ClientOptions};
use postbox::connectivity::ConnectivitySignal;
use postbox::delivery::{DeliveryState, Notice};
use postbox::transport::socket::{SocketConfig, SocketTransport};
use postbox::transport::{ConnectionState, Transport, TransportMode};
use postbox_echo::server;
use postbox_store::Store;
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    client: ChatClient<SocketTransport>,
    signal: ConnectivitySignal,
    _notices: mpsc::Receiver<Notice>,
}

async fn start(initial: Option<bool>) -> Harness {
    let (addr, _handle) = server::start_server("127.0.0.1:0").await.unwrap();
    let transport = Arc::new(SocketTransport::new(SocketConfig::new(format!(
        "ws://{addr}/ws"
    ))));
    let signal = ConnectivitySignal::with_initial(initial);
    let (client, notices) = ChatClient::new(
        Store::open_in_memory().unwrap(),
        transport,
        signal.subscribe(),
        ClientOptions::default(),
    );
    client.start();
    Harness {
        client,
        signal,
        _notices: notices,
    }
}

async fn wait_connected(client: &ChatClient<SocketTransport>) {
    let mut state = client.connection_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|up| *up))
        .await
        .expect("never connected")
        .unwrap();
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn online_send_is_echoed_into_the_chat_as_bot() {
    let h = start(Some(true)).await;
    wait_connected(&h.client).await;
    let chat = h.client.create_chat("A").unwrap();

    assert!(h.client.send(chat, "hello").await.unwrap());

    wait_until("echo", || h.client.messages(chat).unwrap().len() == 2).await;
    let views = h.client.messages(chat).unwrap();
    assert_eq!(views[0].sender, "You");
    assert_eq!(views[0].body, "hello");
    assert!(matches!(
        views[0].state,
        DeliveryState::Delivered { unread: false, .. }
    ));
    assert_eq!(views[1].sender, "Bot");
    assert_eq!(views[1].body, "hello");
    assert!(matches!(
        views[1].state,
        DeliveryState::Delivered { unread: true, .. }
    ));

    let chat_row = h.client.chats().unwrap().remove(0);
    assert_eq!(chat_row.unread_count, 1);
    assert_eq!(chat_row.last_message, "hello");

    h.client.mark_read(chat).unwrap();
    assert_eq!(h.client.chats().unwrap()[0].unread_count, 0);
    h.client.shutdown().await;
}

#[tokio::test]
async fn incoming_without_chats_creates_auto_chat() {
    let h = start(Some(true)).await;
    wait_connected(&h.client).await;

    assert!(h.client.coordinator().transport().send("spontaneous").await);

    wait_until("auto chat", || !h.client.chats().unwrap().is_empty()).await;
    let chats = h.client.chats().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].name, AUTO_CHAT_NAME);
    assert_eq!(chats[0].last_message, "spontaneous");
    assert_eq!(chats[0].unread_count, 1);
    h.client.shutdown().await;
}

#[tokio::test]
async fn queued_while_offline_drains_when_signal_turns_true() {
    let h = start(Some(false)).await;
    assert!(!h.client.is_online());
    let chat = h.client.create_chat("A").unwrap();

    assert!(!h.client.send(chat, "first").await.unwrap());
    assert!(!h.client.send(chat, "second").await.unwrap());
    let views = h.client.messages(chat).unwrap();
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(postbox::delivery::MessageView::is_pending));

    h.signal.set(Some(true));

    wait_until("drain", || {
        h.client
            .coordinator()
            .store()
            .list_pending()
            .unwrap()
            .is_empty()
    })
    .await;
    // Both originals plus both echoes.
    wait_until("echoes", || h.client.messages(chat).unwrap().len() == 4).await;

    let views = h.client.messages(chat).unwrap();
    assert!(views.iter().all(|v| !v.is_pending()));
    let from_you: Vec<&str> = views
        .iter()
        .filter(|v| v.sender == "You")
        .map(|v| v.body.as_str())
        .collect();
    assert_eq!(from_you, ["first", "second"]);
    h.client.shutdown().await;
}

#[tokio::test]
async fn simulated_offline_toggle_queues_then_drains() {
    let h = start(Some(true)).await;
    wait_connected(&h.client).await;
    let chat = h.client.create_chat("A").unwrap();
    let transport = Arc::clone(h.client.coordinator().transport());

    transport.set_mode(TransportMode::SimulatedOffline).await;
    h.signal.set(Some(false));
    assert!(!h.client.send(chat, "while offline").await.unwrap());
    assert_eq!(
        h.client.coordinator().store().list_pending().unwrap().len(),
        1
    );

    transport.set_mode(TransportMode::Live).await;
    h.signal.set(Some(true));

    wait_until("drain", || {
        h.client
            .coordinator()
            .store()
            .list_pending()
            .unwrap()
            .is_empty()
    })
    .await;
    assert_eq!(transport.state(), ConnectionState::Connected);
    h.client.shutdown().await;
}

#[tokio::test]
async fn retry_one_needs_the_signal_online() {
    let h = start(Some(false)).await;
    let chat = h.client.create_chat("A").unwrap();
    h.client.send(chat, "later").await.unwrap();
    let pending_id = h.client.messages(chat).unwrap()[0].pending_id().unwrap();

    assert_eq!(
        h.client.retry_one(chat, pending_id).await.unwrap(),
        postbox::delivery::RetryOutcome::Skipped
    );

    h.client.discard(pending_id).unwrap();
    assert!(h.client.messages(chat).unwrap().is_empty());
    h.client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_transport() {
    let h = start(Some(true)).await;
    wait_connected(&h.client).await;

    h.client.shutdown().await;

    assert_eq!(
        h.client.coordinator().transport().state(),
        ConnectionState::Disconnected
    );
    assert!(!h.client.coordinator().transport().send("gone").await);
}
