//! An open WebSocket leg: one reader task, one writer task, and the handles
//! the rest of the relay uses to talk to them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Config;
use crate::engine::fragmenter::MessageFragmenter;
use crate::engine::{EngineState, Role};
use crate::error::{Error, Result};
use crate::extensions::{DecoderChain, EncoderChain, Negotiation};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, FrameValidator, MessageAssembler, OpCode};

/// How a leg ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The peer sent a close frame, with its code and reason if any.
    Closed(Option<CloseFrame>),
    /// The transport ended without a close frame.
    Dropped,
    /// A protocol violation, transport error, or local failure.
    Failed(Error),
}

impl Termination {
    /// Ended by the close handshake.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Termination::Closed(_))
    }
}

#[derive(Debug, Clone)]
struct Status {
    state: EngineState,
    termination: Option<Termination>,
}

/// Shared by both tasks and every handle. Publishing is first writer wins.
#[derive(Debug)]
struct Shared {
    status: watch::Sender<Status>,
}

impl Shared {
    fn state(&self) -> EngineState {
        self.status.borrow().state
    }

    fn begin_closing(&self) {
        self.status.send_if_modified(|s| {
            if s.state == EngineState::Open {
                s.state = EngineState::Closing;
                true
            } else {
                false
            }
        });
    }

    fn finish(&self, termination: Termination) {
        self.status.send_if_modified(|s| {
            if s.termination.is_some() {
                return false;
            }
            s.state = match termination {
                Termination::Failed(_) => EngineState::Errored,
                _ => EngineState::Closed,
            };
            s.termination = Some(termination);
            true
        });
    }
}

enum Outgoing {
    Message(Message),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

/// An open leg.
///
/// Split it with [`into_parts`](Self::into_parts) to hand the incoming
/// stream and the sender to different tasks.
pub struct Session {
    role: Role,
    extensions: Vec<String>,
    messages: Messages,
    sender: MessageSender,
    control: Control,
}

impl Session {
    pub(crate) fn spawn<S>(
        io: S,
        role: Role,
        negotiation: Negotiation,
        buffered: BytesMut,
        config: &Config,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let extensions = negotiation.names();
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames)
            .with_allowed_rsv(negotiation.rsv());
        let (encoders, decoders) = negotiation.into_pipelines();

        let (read_half, write_half) = tokio::io::split(io);
        let (in_tx, in_rx) = mpsc::channel(config.queue_depth.max(1));
        let (out_tx, out_rx) = mpsc::channel(config.queue_depth.max(1));
        let (status, _) = watch::channel(Status {
            state: EngineState::Open,
            termination: None,
        });
        let shared = Arc::new(Shared { status });

        let reader = ReadLoop {
            frames: FrameReader::new(read_half, validator, buffered, config.read_buffer_size),
            assembler: MessageAssembler::new(config.limits.clone()),
            decoders,
            incoming: in_tx,
            outgoing: out_tx.clone(),
            shared: shared.clone(),
        };
        let writer = WriteLoop {
            frames: FrameWriter::new(write_half, role, config.write_buffer_size),
            encoders,
            fragment_size: config.fragment_size,
            max_message_size: config.limits.max_message_size,
            outgoing: out_rx,
            shared: shared.clone(),
        };

        let reader = tokio::spawn(reader.run().in_current_span());
        let writer = tokio::spawn(writer.run().in_current_span());

        Self {
            role,
            extensions,
            messages: Messages { rx: in_rx },
            sender: MessageSender {
                tx: out_tx.clone(),
                shared: shared.clone(),
            },
            control: Control {
                tx: Some(out_tx),
                shared,
                reader: Some(reader),
                writer: Some(writer),
            },
        }
    }

    /// Role this leg plays.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Names of the extensions negotiated on this leg.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    /// Next incoming message; `None` once the leg has ended.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Queue a message.
    ///
    /// # Errors
    ///
    /// As [`MessageSender::send`].
    pub async fn send(&self, message: Message) -> Result<()> {
        self.sender.send(message).await
    }

    /// Start the close handshake.
    ///
    /// # Errors
    ///
    /// As [`Control::close`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.control.close(Some(CloseFrame::new(code, reason))).await
    }

    /// Wait for the leg to end.
    pub async fn closed(&self) -> Termination {
        self.control.closed().await
    }

    /// Separate the incoming stream, the sender and the control handle.
    #[must_use]
    pub fn into_parts(self) -> (Messages, MessageSender, Control) {
        (self.messages, self.sender, self.control)
    }
}

/// Decoded incoming messages, in arrival order. Ends when the leg ends.
///
/// While nobody reads, the reader task stops reading the transport once the
/// queue is full.
pub struct Messages {
    rx: mpsc::Receiver<Message>,
}

impl Messages {
    /// Next message, or `None` once the leg has ended.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for Messages {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// Queues outgoing messages for the writer task.
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Outgoing>,
    shared: Arc<Shared>,
}

impl MessageSender {
    /// Queue a message, waiting while the writer's queue is full.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` unless the leg is open.
    pub async fn send(&self, message: Message) -> Result<()> {
        if !self.shared.state().can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        self.tx
            .send(Outgoing::Message(message))
            .await
            .map_err(|_| Error::ConnectionClosed(None))
    }
}

/// Lifecycle handle for a leg.
pub struct Control {
    tx: Option<mpsc::Sender<Outgoing>>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Control {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Queue a close frame after any messages already queued. The writer
    /// half-closes the transport once it is sent.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the writer has already stopped.
    pub async fn close(&self, frame: Option<CloseFrame>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed(None))?;
        self.shared.begin_closing();
        tx.send(Outgoing::Close(frame))
            .await
            .map_err(|_| Error::ConnectionClosed(None))
    }

    /// Wait for the leg to end. Any number of callers may wait.
    pub async fn closed(&self) -> Termination {
        let mut rx = self.shared.status.subscribe();
        match rx.wait_for(|s| s.termination.is_some()).await {
            Ok(status) => status.termination.clone().unwrap_or(Termination::Dropped),
            Err(_) => Termination::Dropped,
        }
    }

    /// Termination, if the leg has already ended.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.shared.status.borrow().termination.clone()
    }

    /// Give the writer up to `grace` to flush what is queued, then stop
    /// both tasks and drop the transport. Pending reads are abandoned.
    ///
    /// The writer finishes early once a close frame is written or every
    /// sender is gone.
    pub async fn shutdown(mut self, grace: Duration) {
        self.tx = None;
        if let Some(writer) = self.writer.as_mut() {
            let _ = tokio::time::timeout(grace, writer).await;
        }
        self.abort();
    }

    fn abort(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.abort();
    }
}

struct ReadLoop<R> {
    frames: FrameReader<ReadHalf<R>>,
    assembler: MessageAssembler,
    decoders: DecoderChain,
    incoming: mpsc::Sender<Message>,
    outgoing: mpsc::Sender<Outgoing>,
    shared: Arc<Shared>,
}

impl<R: AsyncRead + Send> ReadLoop<R> {
    async fn run(mut self) {
        let termination = loop {
            match self.step().await {
                Ok(None) => {}
                Ok(Some(termination)) => break termination,
                Err(e) => break self.fail(e).await,
            }
        };
        tracing::debug!(?termination, "reader finished");
        self.shared.finish(termination);
    }

    /// Handle one frame; `Some` once the leg is over.
    async fn step(&mut self) -> Result<Option<Termination>> {
        let Some(frame) = self.frames.read_frame().await? else {
            if self.assembler.is_assembling() {
                tracing::debug!("transport ended inside a fragmented message");
            }
            return Ok(Some(Termination::Dropped));
        };

        match frame.opcode {
            OpCode::Ping => {
                // A busy writer drops the pong rather than stall reading.
                let _ = self.outgoing.try_send(Outgoing::Pong(frame.payload));
            }
            OpCode::Pong => {}
            OpCode::Close => {
                let close = CloseFrame::decode(&frame.payload)?;
                tracing::debug!(close = ?close, "received close frame");
                // Echo; ignored by the writer if our own close went first.
                self.shared.finish(Termination::Closed(close.clone()));
                let _ = self.outgoing.send(Outgoing::Close(close.clone())).await;
                return Ok(Some(Termination::Closed(close)));
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some(assembled) = self.assembler.push(frame)? {
                    let payload = self.decoders.decode(assembled.payload, assembled.rsv)?;
                    let message = if assembled.opcode == OpCode::Text {
                        Message::Text(String::from_utf8(payload).map_err(|_| Error::InvalidUtf8)?)
                    } else {
                        Message::Binary(payload)
                    };
                    tracing::trace!(kind = message.kind(), len = message.len(), "received message");
                    // A dropped consumer only means nobody relays any more.
                    let _ = self.incoming.send(message).await;
                }
            }
        }
        Ok(None)
    }

    async fn fail(&mut self, error: Error) -> Termination {
        if error.is_protocol_violation() {
            tracing::debug!(%error, "protocol violation");
            self.shared.finish(Termination::Failed(error.clone()));
            let close = CloseFrame::new(error.close_code(), "");
            let _ = self.outgoing.send(Outgoing::Close(Some(close))).await;
        } else {
            tracing::debug!(%error, "read failed");
        }
        Termination::Failed(error)
    }
}

struct WriteLoop<W> {
    frames: FrameWriter<WriteHalf<W>>,
    encoders: EncoderChain,
    fragment_size: usize,
    max_message_size: usize,
    outgoing: mpsc::Receiver<Outgoing>,
    shared: Arc<Shared>,
}

impl<W: AsyncWrite + Send> WriteLoop<W> {
    async fn run(mut self) {
        while let Some(item) = self.outgoing.recv().await {
            match self.write(item).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "write failed");
                    self.shared.finish(Termination::Failed(e));
                    return;
                }
            }
        }
        let _ = self.frames.shutdown().await;
    }

    /// Write one queued item; `false` after the close frame.
    async fn write(&mut self, item: Outgoing) -> Result<bool> {
        match item {
            Outgoing::Message(message) => {
                self.write_message(message).await?;
                Ok(true)
            }
            Outgoing::Pong(payload) => {
                self.frames.write_frame(&Frame::pong(payload)).await?;
                self.frames.flush().await?;
                Ok(true)
            }
            Outgoing::Close(close) => {
                let frame = match &close {
                    Some(close) => Frame::close(Some(close.code.as_u16()), &close.reason),
                    None => Frame::close(None, ""),
                };
                self.frames.write_frame(&frame).await?;
                self.frames.flush().await?;
                tracing::debug!(close = ?close, "sent close frame");
                Ok(false)
            }
        }
    }

    async fn write_message(&mut self, message: Message) -> Result<()> {
        let (opcode, payload) = match message {
            Message::Text(text) => (OpCode::Text, text.into_bytes()),
            Message::Binary(data) => (OpCode::Binary, data),
        };
        if payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }

        let (payload, rsv) = self.encoders.encode(payload)?;
        let frames = MessageFragmenter::new(&payload, opcode, rsv, self.fragment_size);
        let fragmented = frames.needs_fragmentation();
        for frame in frames {
            self.frames.write_frame(&frame).await?;
        }
        self.frames.flush().await?;
        tracing::trace!(%opcode, wire_len = payload.len(), fragmented, "sent message");
        Ok(())
    }
}
