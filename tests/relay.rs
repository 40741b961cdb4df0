//! End-to-end relay tests: a real client, the relay, and a real backend,
//! all over loopback TCP.

mod harness;

use harness::{
    ClientOptions, ServerMode, ServerOptions, TestClient, TestRelay, TestServer, closed_port,
    quick_timeouts,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wsbridge::relay::Leg;
use wsbridge::{CloseCode, CloseFrame, Error, Message, ProxyConfig, RelayEvent, Termination};

fn payload(i: usize) -> Message {
    match i % 5 {
        0 => Message::binary(Vec::new()),
        1 => Message::text(format!("message {i}")),
        2 => Message::binary((0..70_000).map(|b| (b + i) as u8).collect::<Vec<u8>>()),
        3 => Message::text("é".repeat(i * 10)),
        _ => Message::text(String::new()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_through_relay() {
    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let mut client = TestClient::connect(relay.addr).await.unwrap();
    client.send_text("hello").await.unwrap();
    assert_eq!(client.recv_text().await, Some("hello".to_string()));

    let termination = client.close().await;
    assert_eq!(
        termination,
        Termination::Closed(Some(CloseFrame::new(CloseCode::Normal, "")))
    );

    let terminal = relay.events.wait_terminal(1).await;
    match &terminal[0] {
        RelayEvent::Closed {
            first,
            client_to_backend,
            backend_to_client,
            ..
        } => {
            assert_eq!(*first, Leg::Client);
            assert_eq!(*client_to_backend, 1);
            assert_eq!(*backend_to_client, 1);
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_order_preserved_both_ways() {
    const N: usize = 60;

    let mut backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Manual,
        compress: true,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let client = TestClient::connect(relay.addr).await.unwrap();
    let (mut client_rx, client_tx, client_control) = client.into_session().into_parts();
    let (mut backend_rx, backend_tx, backend_control) = backend.next_session().await.into_parts();

    let expected: Vec<Message> = (0..N).map(payload).collect();
    let client_side = async {
        let send = async {
            for message in expected.iter().cloned() {
                client_tx.send(message).await.unwrap();
            }
        };
        let recv = async {
            let mut got = Vec::new();
            while got.len() < N {
                got.push(client_rx.recv().await.unwrap());
            }
            got
        };
        tokio::join!(send, recv).1
    };
    let backend_side = async {
        let send = async {
            for message in expected.iter().rev().cloned() {
                backend_tx.send(message).await.unwrap();
            }
        };
        let recv = async {
            let mut got = Vec::new();
            while got.len() < N {
                got.push(backend_rx.recv().await.unwrap());
            }
            got
        };
        tokio::join!(send, recv).1
    };
    let (at_client, at_backend) =
        tokio::time::timeout(harness::WAIT, async { tokio::join!(client_side, backend_side) })
            .await
            .unwrap();

    assert_eq!(at_backend, expected);
    let reversed: Vec<Message> = expected.iter().rev().cloned().collect();
    assert_eq!(at_client, reversed);

    client_control.close(None).await.unwrap();
    assert!(matches!(client_control.closed().await, Termination::Closed(_)));
    assert!(matches!(backend_control.closed().await, Termination::Closed(_)));
    relay.shutdown().await;
}

#[tokio::test]
async fn test_backend_unreachable() {
    let backend = closed_port().await;
    let relay =
        TestRelay::spawn_with(backend, ProxyConfig::new().with_timeouts(quick_timeouts())).await;

    // The relay closes the client transport without answering.
    let result = TestClient::connect(relay.addr).await;
    assert!(result.is_err());

    let terminal = relay.events.wait_terminal(1).await;
    assert!(matches!(
        &terminal[0],
        RelayEvent::Aborted {
            error: Error::BackendConnect { .. }
        }
    ));

    // The relay keeps serving.
    let again = TestClient::connect(relay.addr).await;
    assert!(again.is_err());
    relay.events.wait_terminal(2).await;
    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_close_single_teardown() {
    let mut backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Manual,
        compress: false,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let client = TestClient::connect(relay.addr).await.unwrap();
    let server = backend.next_session().await;
    let client = client.into_session();

    let (a, b) = tokio::join!(
        client.close(CloseCode::Normal, "client"),
        server.close(CloseCode::Normal, "server")
    );
    let _ = (a, b);
    let (client_end, server_end) = tokio::join!(client.closed(), server.closed());
    assert!(matches!(client_end, Termination::Closed(_)));
    assert!(matches!(server_end, Termination::Closed(_)));

    relay.events.wait_terminal(1).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(relay.events.terminal().len(), 1);
    relay.shutdown().await;
}

#[tokio::test]
async fn test_backend_close_forwarded_to_client() {
    let mut backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Manual,
        compress: true,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let client = TestClient::connect(relay.addr).await.unwrap();
    let server = backend.next_session().await;
    server.send(Message::text("last words")).await.unwrap();
    server.close(CloseCode::Other(4001), "shutting down").await.unwrap();

    let mut client = client;
    assert_eq!(client.recv_text().await, Some("last words".into()));
    assert_eq!(
        client.closed().await,
        Termination::Closed(Some(CloseFrame::new(CloseCode::Other(4001), "shutting down")))
    );

    let terminal = relay.events.wait_terminal(1).await;
    assert!(matches!(
        &terminal[0],
        RelayEvent::Closed {
            first: Leg::Backend,
            backend_to_client: 1,
            ..
        }
    ));
    relay.shutdown().await;
}

#[tokio::test]
async fn test_backend_drop_closes_client_with_1014() {
    let mut backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Manual,
        compress: false,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let client = TestClient::connect(relay.addr).await.unwrap();
    drop(backend.next_session().await);

    match client.closed().await {
        Termination::Closed(Some(frame)) => assert_eq!(frame.code, CloseCode::BadGateway),
        other => panic!("unexpected termination {other:?}"),
    }
    relay.shutdown().await;
}

#[tokio::test]
async fn test_backend_rejects_handshake() {
    let backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Reject(403),
        compress: false,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let client = TestClient::connect(relay.addr).await.unwrap();
    match client.closed().await {
        Termination::Closed(Some(frame)) => assert_eq!(frame.code, CloseCode::BadGateway),
        other => panic!("unexpected termination {other:?}"),
    }

    let terminal = relay.events.wait_terminal(1).await;
    assert!(matches!(
        &terminal[0],
        RelayEvent::Aborted {
            error: Error::Handshake(_)
        }
    ));
    relay.shutdown().await;
    backend.shutdown().await;
}

async fn check_extension_independence(client_compress: bool, backend_compress: bool) {
    let backend = TestServer::spawn_with(ServerOptions {
        mode: ServerMode::Echo,
        compress: backend_compress,
    })
    .await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let options = ClientOptions {
        compress: client_compress,
        ..ClientOptions::default()
    };
    let mut client = TestClient::connect_with(relay.addr, options).await.unwrap();
    assert_eq!(!client.extensions().is_empty(), client_compress);

    let text = "compressible ".repeat(10_000);
    let binary: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 251) as u8).collect();
    client.send_text(&text).await.unwrap();
    client.send(Message::binary(binary.clone())).await.unwrap();
    client.send(Message::text("")).await.unwrap();
    assert_eq!(client.recv().await, Some(Message::text(text)));
    assert_eq!(client.recv().await, Some(Message::binary(binary)));
    assert_eq!(client.recv().await, Some(Message::text("")));

    let relaying = relay
        .events
        .events()
        .into_iter()
        .find_map(|e| match e {
            RelayEvent::Relaying {
                client_extensions,
                backend_extensions,
            } => Some((client_extensions, backend_extensions)),
            _ => None,
        })
        .unwrap();
    assert_eq!(!relaying.0.is_empty(), client_compress);
    assert_eq!(!relaying.1.is_empty(), backend_compress);

    client.close().await;
    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn test_compressed_client_plain_backend() {
    check_extension_independence(true, false).await;
}

#[tokio::test]
async fn test_plain_client_compressed_backend() {
    check_extension_independence(false, true).await;
}

#[tokio::test]
async fn test_target_and_headers_forwarded() {
    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let options = ClientOptions::default()
        .header("Cookie", "session=42")
        .header("X-Forwarded-For", "203.0.113.9")
        .header("Sec-WebSocket-Protocol", "chat");
    let options = ClientOptions {
        target: "/rooms/7?token=abc".into(),
        ..options
    };
    let mut client = TestClient::connect_with(relay.addr, options).await.unwrap();
    client.send_text("ping").await.unwrap();
    assert_eq!(client.recv_text().await, Some("ping".into()));

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let forwarded = &requests[0];
    assert_eq!(forwarded.target, "/rooms/7?token=abc");
    assert_eq!(forwarded.key(), Some(client.key()));
    assert_eq!(forwarded.version(), Some("13"));
    assert_eq!(forwarded.headers.get("cookie"), Some("session=42"));
    assert_eq!(forwarded.headers.get("x-forwarded-for"), Some("203.0.113.9"));
    assert!(!forwarded.headers.contains("sec-websocket-protocol"));
    assert_eq!(forwarded.headers.count("host"), 1);

    assert!(relay.events.events().iter().any(|e| matches!(
        e,
        RelayEvent::Accepted { forwarded_for: Some(ip), .. } if ip == "203.0.113.9"
    )));

    client.close().await;
    relay.shutdown().await;
    backend.shutdown().await;
}

#[tokio::test]
async fn test_plain_http_rejected() {
    let backend = TestServer::spawn().await;
    let relay = TestRelay::spawn(backend.addr()).await;

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: relay\r\n\r\n")
        .await
        .unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();

    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(backend.requests().is_empty());
    assert!(relay.events.events().is_empty());

    relay.shutdown().await;
    backend.shutdown().await;
}
