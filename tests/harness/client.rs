//! WebSocket client for relay testing, built on the client engine.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use wsbridge::extensions::ExtensionRegistry;
use wsbridge::protocol::OutboundRequest;
use wsbridge::{CloseCode, Config, Engine, Limits, Message, Result, Session, Termination};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub compress: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            target: "/".into(),
            headers: Vec::new(),
            compress: true,
        }
    }
}

impl ClientOptions {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub struct TestClient {
    key: String,
    session: Session,
}

impl TestClient {
    /// Compressing client requesting `/`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with(addr, ClientOptions::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, options: ClientOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut request = OutboundRequest::new(options.target, &addr.to_string())?;
        for (name, value) in options.headers {
            request.headers.append(name, value)?;
        }
        let key = request.key.clone();

        let registry = Arc::new(if options.compress {
            ExtensionRegistry::standard(&Limits::default())
        } else {
            ExtensionRegistry::new()
        });
        let session = Engine::client(stream, request, registry, Config::default())
            .with_handshake_timeout(Some(super::WAIT))
            .start()
            .await?;
        Ok(Self { key, session })
    }

    /// `Sec-WebSocket-Key` this client sent.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn extensions(&self) -> &[String] {
        self.session.extensions()
    }

    pub async fn send(&self, message: Message) -> Result<()> {
        self.session.send(message).await
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(Message::text(text)).await
    }

    pub async fn recv(&mut self) -> Option<Message> {
        tokio::time::timeout(super::WAIT, self.session.recv())
            .await
            .expect("no message within the wait")
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            Message::Text(text) => Some(text),
            Message::Binary(data) => panic!("expected text, got {} bytes of binary", data.len()),
        }
    }

    /// Close normally and wait for the handshake to finish.
    pub async fn close(self) -> Termination {
        self.session.close(CloseCode::Normal, "").await.unwrap();
        self.closed().await
    }

    /// Wait for the session to end without closing it.
    pub async fn closed(self) -> Termination {
        tokio::time::timeout(super::WAIT, self.session.closed())
            .await
            .expect("session did not end within the wait")
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}
