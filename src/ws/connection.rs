//! Connection manager task.
//!
//! One task per client owns the socket, the [`Dispatcher`] (pending map and
//! subscriptions) and the reconnect timer. Public handles talk to it over
//! an unbounded command channel; every state mutation happens on this task,
//! so nothing here is locked.
//!
//! ```text
//! Closed --connect()--> Connecting --(open)--> Open --(close/error)--> Closed
//!                            |
//!                            +--(handshake failed)--> Closed
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::dispatcher::Dispatcher;
use super::subscription::{NotifySender, SubscriberId};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::domain::{
    CloseReason, ConnectionEvent, ConnectionState, EventBus, PendingRequest, RequestId,
    RequestOutcome,
};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<WsStream, ClientError>> + Send>>;

/// Instructions from client handles to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Open the socket, or join the handshake already in flight.
    Connect {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Write a serialized request frame and track it until it settles.
    Request {
        id: RequestId,
        method: String,
        text: String,
        reply: oneshot::Sender<RequestOutcome>,
    },
    /// Register a notify subscriber.
    Subscribe {
        event: String,
        subscriber: SubscriberId,
        sender: NotifySender,
    },
    /// Remove a notify subscriber.
    Unsubscribe {
        event: String,
        subscriber: SubscriberId,
    },
    /// Report the size of the pending map.
    PendingCount { reply: oneshot::Sender<usize> },
    /// Tear down the socket and reject everything in flight.
    Close { reply: oneshot::Sender<()> },
}

/// A request accepted while the socket was not yet writable.
struct QueuedRequest {
    id: RequestId,
    method: String,
    text: String,
    reply: oneshot::Sender<RequestOutcome>,
}

impl QueuedRequest {
    fn reject(self, err: ClientError) {
        let _ = self.reply.send(Err(err));
    }
}

enum Step {
    Command(Option<Command>),
    Handshake(Result<WsStream, ClientError>),
    Frame(Option<Result<Message, WsError>>),
    Reconnect,
}

pub(crate) struct ConnectionTask {
    endpoint: Url,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: EventBus,
    dispatcher: Dispatcher,
    socket: Option<WsStream>,
    handshake: Option<Handshake>,
    queued: Vec<QueuedRequest>,
    connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    reconnect_at: Option<Instant>,
    attempts: u32,
}

impl ConnectionTask {
    pub(crate) fn new(
        config: &ClientConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        events: EventBus,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout,
            reconnect: config.reconnect.clone(),
            commands,
            state,
            events,
            dispatcher: Dispatcher::new(),
            socket: None,
            handshake: None,
            queued: Vec::new(),
            connect_waiters: Vec::new(),
            reconnect_at: None,
            attempts: 0,
        }
    }

    /// Runs until every command sender has been dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                outcome = handshake_outcome(&mut self.handshake), if self.handshake.is_some() => {
                    Step::Handshake(outcome)
                }
                frame = next_frame(&mut self.socket), if self.socket.is_some() => Step::Frame(frame),
                () = reconnect_timer(self.reconnect_at), if self.reconnect_at.is_some() => {
                    Step::Reconnect
                }
            };

            match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Command(None) => {
                    self.shutdown().await;
                    break;
                }
                Step::Handshake(outcome) => {
                    self.handshake = None;
                    self.on_handshake(outcome).await;
                }
                Step::Frame(frame) => self.on_frame(frame),
                Step::Reconnect => {
                    self.reconnect_at = None;
                    self.start_handshake();
                }
            }
        }

        tracing::debug!("connection task stopped");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => self.connect(reply),
            Command::Request {
                id,
                method,
                text,
                reply,
            } => {
                let request = QueuedRequest {
                    id,
                    method,
                    text,
                    reply,
                };
                match self.current_state() {
                    ConnectionState::Open => self.write_request(request).await,
                    ConnectionState::Connecting => {
                        tracing::debug!(%id, method = %request.method, "queued until open");
                        self.queued.push(request);
                    }
                    ConnectionState::Closed => request.reject(ClientError::ConnectionClosed),
                }
            }
            Command::Subscribe {
                event,
                subscriber,
                sender,
            } => self.dispatcher.subscribe(event, subscriber, sender),
            Command::Unsubscribe { event, subscriber } => {
                self.dispatcher.unsubscribe(&event, subscriber);
            }
            Command::PendingCount { reply } => {
                let _ = reply.send(self.dispatcher.pending_len());
            }
            Command::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<(), ClientError>>) {
        match self.current_state() {
            ConnectionState::Open => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.connect_waiters.push(reply),
            ConnectionState::Closed => {
                self.connect_waiters.push(reply);
                // An explicit connect supersedes any scheduled reconnect.
                self.reconnect_at = None;
                self.attempts = 0;
                self.start_handshake();
            }
        }
    }

    fn start_handshake(&mut self) {
        tracing::info!(url = %self.endpoint, attempt = self.attempts, "connecting");
        self.set_state(ConnectionState::Connecting);
        self.events.publish(ConnectionEvent::Connecting {
            url: self.endpoint.to_string(),
            attempt: self.attempts,
            timestamp: Utc::now(),
        });
        self.handshake = Some(Box::pin(open_socket(
            self.endpoint.clone(),
            self.connect_timeout,
        )));
    }

    async fn on_handshake(&mut self, outcome: Result<WsStream, ClientError>) {
        match outcome {
            Ok(stream) => {
                self.socket = Some(stream);
                self.attempts = 0;
                self.set_state(ConnectionState::Open);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }

                let queued = std::mem::take(&mut self.queued);
                let flushed = queued.len();
                tracing::info!(url = %self.endpoint, flushed, "connection open");
                self.events.publish(ConnectionEvent::Opened {
                    url: self.endpoint.to_string(),
                    flushed,
                    timestamp: Utc::now(),
                });
                for request in queued {
                    self.write_request(request).await;
                }
            }
            Err(err) => {
                let message = match err {
                    ClientError::Connection(message) => message,
                    other => other.to_string(),
                };
                tracing::warn!(url = %self.endpoint, error = %message, "handshake failed");
                self.set_state(ConnectionState::Closed);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(ClientError::Connection(message.clone())));
                }
                let rejected = self.queued.len();
                for request in self.queued.drain(..) {
                    request.reject(ClientError::Connection(message.clone()));
                }
                self.events.publish(ConnectionEvent::HandshakeFailed {
                    message,
                    rejected,
                    timestamp: Utc::now(),
                });
                // Only reconnect attempts retry; a failed connect() is the caller's call.
                if self.attempts > 0 {
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn write_request(&mut self, request: QueuedRequest) {
        let QueuedRequest {
            id,
            method,
            text,
            reply,
        } = request;
        let Some(socket) = self.socket.as_mut() else {
            let _ = reply.send(Err(ClientError::ConnectionClosed));
            return;
        };

        // Registered before the write so even an immediate reply finds it.
        self.dispatcher
            .register(PendingRequest::new(id, method.clone(), reply));

        match socket.send(Message::text(text)).await {
            Ok(()) => tracing::debug!(%id, %method, "request sent"),
            Err(err) => {
                tracing::warn!(%id, %method, error = %err, "request write failed");
                self.connection_lost(CloseReason::TransportError(err.to_string()));
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                self.dispatcher.dispatch_text(text.as_str());
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    self.dispatcher.dispatch_text(text);
                }
                Err(_) => tracing::warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
            },
            Some(Ok(Message::Close(close))) => {
                tracing::debug!(?close, "server sent close frame");
                self.connection_lost(CloseReason::RemoteClosed);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Err(err)) => self.connection_lost(CloseReason::TransportError(err.to_string())),
            None => self.connection_lost(CloseReason::RemoteClosed),
        }
    }

    fn connection_lost(&mut self, reason: CloseReason) {
        self.socket = None;
        let rejected = self.dispatcher.fail_all(|| ClientError::ConnectionClosed);
        self.set_state(ConnectionState::Closed);
        tracing::warn!(?reason, rejected, "connection lost");
        self.events.publish(ConnectionEvent::Closed {
            reason,
            rejected,
            timestamp: Utc::now(),
        });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect.enabled {
            return;
        }
        if !self.reconnect.allows(self.attempts) {
            tracing::warn!(attempts = self.attempts, "giving up on reconnect");
            self.events.publish(ConnectionEvent::ReconnectAbandoned {
                attempts: self.attempts,
                timestamp: Utc::now(),
            });
            self.attempts = 0;
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        let delay = self.reconnect.delay_for_attempt(self.attempts);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(attempt = self.attempts, delay_ms, "reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
        self.events.publish(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay_ms,
            timestamp: Utc::now(),
        });
    }

    /// Explicit close: cancels handshake and reconnect, rejects everything.
    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.attempts = 0;

        if self.handshake.take().is_some() {
            for waiter in self.connect_waiters.drain(..) {
                let _ = waiter.send(Err(ClientError::Connection(
                    "closed before the handshake completed".to_string(),
                )));
            }
            for request in self.queued.drain(..) {
                request.reject(ClientError::ConnectionClosed);
            }
        }

        let rejected = self.dispatcher.fail_all(|| ClientError::ConnectionClosed);
        let was_open = self.socket.is_some();
        if let Some(mut socket) = self.socket.take() {
            match tokio::time::timeout(self.connect_timeout, socket.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::debug!(error = %err, "close handshake failed"),
                Err(_) => tracing::debug!("close handshake timed out"),
            }
        }
        self.set_state(ConnectionState::Closed);

        if was_open || rejected > 0 {
            tracing::info!(rejected, "connection closed");
            self.events.publish(ConnectionEvent::Closed {
                reason: CloseReason::Requested,
                rejected,
                timestamp: Utc::now(),
            });
        }
    }
}

async fn open_socket(url: Url, limit: Duration) -> Result<WsStream, ClientError> {
    match tokio::time::timeout(limit, tokio_tungstenite::connect_async(url.as_str())).await {
        Ok(Ok((stream, response))) => {
            tracing::debug!(status = %response.status(), "handshake complete");
            Ok(stream)
        }
        Ok(Err(WsError::Http(response))) => Err(ClientError::Connection(format!(
            "handshake rejected with HTTP {}",
            response.status()
        ))),
        Ok(Err(err)) => Err(ClientError::Connection(err.to_string())),
        Err(_) => Err(ClientError::Connection(format!(
            "handshake timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

async fn handshake_outcome(handshake: &mut Option<Handshake>) -> Result<WsStream, ClientError> {
    match handshake.as_mut() {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
