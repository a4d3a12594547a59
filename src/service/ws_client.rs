//! Public client handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;

use crate::config::ClientConfig;
use crate::domain::{
    ClientId, ConnectionEvent, ConnectionState, EventBus, NotifyEvent, RequestIdGenerator,
};
use crate::error::ClientError;
use crate::ws::connection::{Command, ConnectionTask};
use crate::ws::messages::RequestFrame;
use crate::ws::subscription::SubscriberId;

/// Request/response client over one persistent websocket.
///
/// Cheap to clone; clones share the connection. Constructing a client
/// spawns its connection task (so it must happen inside a Tokio runtime)
/// but does not open the socket; call [`WsClient::connect`] for that.
///
/// The connection task stops, closing the socket, once every clone has
/// been dropped. Live [`Subscription`]s do not keep it running; they see
/// `None` from [`Subscription::recv`] and `on()` handlers finish.
#[derive(Debug, Clone)]
pub struct WsClient {
    id: ClientId,
    endpoint: Url,
    request_timeout: Option<Duration>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
    request_ids: RequestIdGenerator,
    subscriber_ids: Arc<AtomicU64>,
}

impl WsClient {
    /// Creates an isolated client for `config` and spawns its task.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let id = ClientId::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Closed);
        let events = EventBus::new(config.event_bus_capacity);

        let task = ConnectionTask::new(&config, command_rx, state_tx, events.clone());
        let span = tracing::info_span!("ws_client", client_id = %id);
        tokio::spawn(task.run().instrument(span));
        tracing::debug!(client_id = %id, endpoint = %config.endpoint, "client created");

        Self {
            id,
            endpoint: config.endpoint,
            request_timeout: config.request_timeout,
            commands,
            state,
            events,
            request_ids: RequestIdGenerator::new(),
            subscriber_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns this client's identifier.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Opens the socket and waits until it is open.
    ///
    /// Resolves immediately when already open and joins the handshake in
    /// flight when already connecting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the handshake fails, times
    /// out, or is cancelled by [`WsClient::close`].
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, outcome) = oneshot::channel();
        self.command(Command::Connect { reply })?;
        outcome.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Sends `method` with `params` and waits for the matching response.
    ///
    /// Requests issued while connecting are written once the socket opens.
    /// Concurrent requests settle independently of each other, in whatever
    /// order the server answers.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Remote`] if the server answered with an error.
    /// - [`ClientError::ConnectionClosed`] if the client is not connected
    ///   or the connection is lost before the response arrives.
    /// - [`ClientError::Connection`] if the request was queued behind a
    ///   handshake that failed.
    /// - [`ClientError::Timeout`] if a request timeout is configured and
    ///   elapses. The request stays pending until the connection closes.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.request_ids.next_id();
        let text = RequestFrame::new(id, method, params).to_text()?;
        let (reply, outcome) = oneshot::channel();
        self.command(Command::Request {
            id,
            method: method.to_string(),
            text,
            reply,
        })?;

        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, outcome).await.map_err(|_| {
                tracing::debug!(%id, method, "request timed out");
                ClientError::Timeout {
                    id,
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => outcome.await,
        };
        outcome.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Typed variant of [`WsClient::send`].
    ///
    /// # Errors
    ///
    /// Everything [`WsClient::send`] returns, plus
    /// [`ClientError::Serialization`] if `params` cannot be encoded or the
    /// result does not decode as `R`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.send(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribes to notify frames named `event` (`"*"` for all).
    ///
    /// The subscription survives reconnects and ends when it is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, event: impl Into<String>) -> Subscription {
        let event = event.into();
        let id = SubscriberId::new(self.subscriber_ids.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = self
            .command(Command::Subscribe {
                event: event.clone(),
                subscriber: id,
                sender,
            })
            .is_ok();

        Subscription {
            event,
            id,
            receiver,
            commands: self.commands.downgrade(),
            active,
        }
    }

    /// Runs `handler` for every notify frame named `event`.
    ///
    /// The handler runs on its own task, so a panicking handler only ends
    /// its own subscription. Dropping the returned handle leaves the
    /// handler running until the client is dropped; call
    /// [`HandlerHandle::unsubscribe`] to stop it sooner.
    pub fn on<F>(&self, event: impl Into<String>, mut handler: F) -> HandlerHandle
    where
        F: FnMut(NotifyEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe(event);
        let event = subscription.event().to_string();
        let task = tokio::spawn(async move {
            while let Some(notify) = subscription.recv().await {
                handler(notify);
            }
        });
        HandlerHandle { event, task }
    }

    /// Closes the socket and rejects every pending request with
    /// [`ClientError::ConnectionClosed`]. Cancels any handshake in flight
    /// and any scheduled reconnect. The client can connect again later.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.command(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the connection reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the connection task
    /// stopped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Receives future connection lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Number of requests written and still awaiting a response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the connection task
    /// has stopped.
    pub async fn pending_count(&self) -> Result<usize, ClientError> {
        let (reply, count) = oneshot::channel();
        self.command(Command::PendingCount { reply })?;
        count.await.map_err(|_| ClientError::ConnectionClosed)
    }

    fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands
            .send(cmd)
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

/// Receiving end of a notify subscription.
#[derive(Debug)]
pub struct Subscription {
    event: String,
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<NotifyEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    active: bool,
}

impl Subscription {
    /// Event name this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Waits for the next notify event.
    ///
    /// Returns `None` once the connection task has stopped, which happens
    /// when the last [`WsClient`] clone is dropped.
    pub async fn recv(&mut self) -> Option<NotifyEvent> {
        self.receiver.recv().await
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<NotifyEvent> {
        self.receiver.try_recv().ok()
    }

    /// Removes the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Nothing to remove once the connection task is gone.
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unsubscribe {
                event: std::mem::take(&mut self.event),
                subscriber: self.id,
            });
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a callback registered with [`WsClient::on`].
#[derive(Debug)]
pub struct HandlerHandle {
    event: String,
    task: JoinHandle<()>,
}

impl HandlerHandle {
    /// Event name the handler listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns `false` once the handler has stopped (unsubscribed,
    /// panicked, or the connection task ended).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the handler and removes its subscription.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}
