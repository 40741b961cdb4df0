//! Backend for relay testing.
//!
//! Accepts upgrades with the crate's server engine. In echo mode every
//! message is sent straight back; in manual mode sessions are handed to the
//! test; in reject mode every upgrade is refused with an HTTP status.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wsbridge::codec::read_head;
use wsbridge::extensions::ExtensionRegistry;
use wsbridge::protocol::{HandshakeRequest, HandshakeResponse};
use wsbridge::{Config, Engine, Limits, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Echo,
    Manual,
    Reject(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub mode: ServerMode,
    pub compress: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            mode: ServerMode::Echo,
            compress: true,
        }
    }
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<HandshakeRequest>>>,
    sessions: mpsc::UnboundedReceiver<Session>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Compressing echo backend.
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerOptions::default()).await
    }

    pub async fn spawn_with(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (handoff, sessions) = mpsc::unbounded_channel();

        let registry = Arc::new(if options.compress {
            ExtensionRegistry::standard(&Limits::default())
        } else {
            ExtensionRegistry::new()
        });
        let seen = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let registry = registry.clone();
                let seen = seen.clone();
                let handoff = handoff.clone();
                tokio::spawn(async move {
                    handle(stream, options.mode, registry, seen, handoff).await;
                });
            }
        });

        Self {
            addr,
            requests,
            sessions,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Upgrade requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<HandshakeRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Next session accepted in manual mode.
    pub async fn next_session(&mut self) -> Session {
        tokio::time::timeout(super::WAIT, self.sessions.recv())
            .await
            .expect("no backend session within the wait")
            .expect("backend stopped")
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn handle(
    mut stream: TcpStream,
    mode: ServerMode,
    registry: Arc<ExtensionRegistry>,
    seen: Arc<Mutex<Vec<HandshakeRequest>>>,
    handoff: mpsc::UnboundedSender<Session>,
) {
    let mut buf = BytesMut::new();
    let Ok(len) = read_head(&mut stream, &mut buf, 8192).await else {
        return;
    };
    let Ok(request) = HandshakeRequest::parse(&buf[..len]) else {
        return;
    };
    seen.lock().unwrap().push(request.clone());

    if let ServerMode::Reject(status) = mode {
        let mut reply = Vec::new();
        HandshakeResponse::rejection(status, "Forbidden").write_to(&mut reply);
        let _ = stream.write_all(&reply).await;
        let _ = stream.shutdown().await;
        return;
    }

    let rest = buf.split_off(len);
    let engine = Engine::server(stream, request, rest, registry, Config::default());
    let Ok(session) = engine.start().await else {
        return;
    };
    match mode {
        ServerMode::Manual => {
            let _ = handoff.send(session);
        }
        _ => echo(session).await,
    }
}

async fn echo(session: Session) {
    let (mut messages, sender, control) = session.into_parts();
    while let Some(message) = messages.recv().await {
        if sender.send(message).await.is_err() {
            break;
        }
    }
    drop(sender);
    control.shutdown(Duration::from_secs(1)).await;
}
