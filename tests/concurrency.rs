//! Concurrency tests for the relay.
//!
//! Many Connections at once must stay independent: no cross-talk, no
//! reordering, one terminal event each.

mod harness;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use harness::{ClientOptions, TestClient, TestRelay, TestServer};
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use wsbridge::{Message, RelayEvent};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_clients_sequential() {
    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;

    for i in 0..10 {
        let mut client = TestClient::connect(relay.addr).await.unwrap();
        let msg = format!("hello from client {i}");
        client.send_text(&msg).await.unwrap();
        assert_eq!(client.recv_text().await, Some(msg));
        client.close().await;
    }

    let terminal = relay.events.wait_terminal(10).await;
    assert_eq!(terminal.len(), 10);
    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_synchronized_clients() {
    const NUM_CLIENTS: usize = 50;
    const MESSAGES_PER_CLIENT: usize = 20;

    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;
    let addr = relay.addr;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let violations = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for client_id in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        let violations = violations.clone();
        set.spawn(async move {
            let options = ClientOptions {
                compress: client_id % 2 == 0,
                ..ClientOptions::default()
            };
            let mut client = TestClient::connect_with(addr, options).await.unwrap();
            barrier.wait().await;

            for seq in 0..MESSAGES_PER_CLIENT {
                let msg = format!("client:{client_id}:msg:{seq}");
                client.send_text(&msg).await.unwrap();
                if client.recv_text().await.as_deref() != Some(msg.as_str()) {
                    violations.fetch_add(1, Ordering::Relaxed);
                }
            }
            client.close().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert_eq!(violations.load(Ordering::Relaxed), 0, "cross-talk or reordering");
    let terminal = relay.events.wait_terminal(NUM_CLIENTS).await;
    assert!(
        terminal
            .iter()
            .all(|e| matches!(e, RelayEvent::Closed { client_to_backend, .. } if *client_to_backend == MESSAGES_PER_CLIENT as u64))
    );

    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipelined_sends_under_load() {
    const NUM_CLIENTS: usize = 20;
    const MESSAGES_PER_CLIENT: usize = 50;

    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;
    let addr = relay.addr;

    let mut set = JoinSet::new();
    for client_id in 0..NUM_CLIENTS {
        set.spawn(async move {
            let client = TestClient::connect(addr).await.unwrap();
            let (mut rx, tx, control) = client.into_session().into_parts();

            let sent: Vec<Message> = (0..MESSAGES_PER_CLIENT)
                .map(|seq| Message::binary(format!("{client_id}:{seq}").repeat(seq * 50)))
                .collect();
            let send = async {
                for message in sent.iter().cloned() {
                    tx.send(message).await.unwrap();
                }
            };
            let recv = async {
                let mut got = Vec::with_capacity(MESSAGES_PER_CLIENT);
                while got.len() < MESSAGES_PER_CLIENT {
                    got.push(rx.recv().await.unwrap());
                }
                got
            };
            let ((), got) = tokio::join!(send, recv);
            assert_eq!(got, sent);

            control.close(None).await.unwrap();
            control.closed().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    relay.events.wait_terminal(NUM_CLIENTS).await;
    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_clients_torn_down() {
    const NUM_CLIENTS: usize = 30;

    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let mut clients = Vec::new();
    for _ in 0..NUM_CLIENTS {
        let client = TestClient::connect(relay.addr).await.unwrap();
        client.send_text("about to vanish").await.unwrap();
        clients.push(client);
    }
    drop(clients);

    let terminal = relay.events.wait_terminal(NUM_CLIENTS).await;
    assert_eq!(terminal.len(), NUM_CLIENTS);
    assert!(
        terminal
            .iter()
            .all(|e| matches!(e, RelayEvent::Closed { first: wsbridge::relay::Leg::Client, .. }))
    );

    relay.shutdown().await;
    backend.shutdown().await;
}
