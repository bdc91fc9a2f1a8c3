//! Payload delivery over a reconnecting transport.
//!
//! A single [`Dispatcher`] task owns the connection. Extraction tasks hand it
//! payloads through a cloneable [`DispatcherHandle`], which is the only way in.
//! The task:
//!
//! 1. Connects, backing off exponentially between failed attempts
//! 2. Sends each queued payload as one text message
//! 3. On a failed send or a peer close, keeps the undelivered payload at the
//!    head of its backlog, drops the connection, waits out a backoff delay
//!    and goes back to 1
//!
//! Delivery is at-least-once: a payload is only discarded after its send
//! succeeded. A drop after a working session waits the floor delay, so only
//! consecutive connect failures escalate it.
//!
//! The task finishes once every handle is dropped and the queue is drained.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::types::Payload;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub mod backoff;
pub mod codec;
pub mod websocket;

pub use backoff::Backoff;
pub use codec::{codec_for, JsonEnvelopeCodec, LegacyLabelCodec, MessageCodec};
pub use websocket::WebSocketTransport;

/// Connection lifecycle as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting the given delay before the next connect attempt
    Backoff(Duration),
}

/// An established connection that accepts text messages.
pub trait Connection: Send {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Resolves when the peer closes the connection or it fails.
    ///
    /// Must be safe to drop before completion; the dispatcher polls it
    /// alongside the payload queue.
    fn closed(&mut self) -> impl Future<Output = ()> + Send;

    /// Close gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Something the dispatcher can (re)connect to.
pub trait Transport: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, DispatchError>> + Send;

    /// Target description for logs
    fn describe(&self) -> &str;
}

/// Totals reported when the dispatcher finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: u64,
    pub undelivered: u64,
    pub connects: u64,
}

/// Producer side of the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Payload>,
    state: watch::Receiver<ConnectionState>,
}

impl DispatcherHandle {
    /// Queue a payload for delivery.
    ///
    /// Waits while the queue is full. Fails only if the dispatcher task has
    /// stopped.
    pub async fn send(&self, payload: Payload) -> Result<(), DispatchError> {
        self.tx.send(payload).await.map_err(|_| DispatchError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

pub struct Dispatcher<T, C> {
    transport: T,
    codec: C,
    backoff: Backoff,
    rx: mpsc::Receiver<Payload>,
    capacity: usize,
    state: watch::Sender<ConnectionState>,
}

enum Session {
    /// All handles are gone and the queue is empty
    Finished,
    /// The connection was lost; reconnect
    Dropped,
}

impl<T: Transport, C: MessageCodec> Dispatcher<T, C> {
    pub fn new(transport: T, codec: C, config: &DispatchConfig) -> (Self, DispatcherHandle) {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Self {
            transport,
            codec,
            backoff: Backoff::new(config.backoff_floor(), config.backoff_ceiling()),
            rx,
            capacity,
            state: state_tx,
        };
        let handle = DispatcherHandle {
            tx,
            state: state_rx,
        };
        (dispatcher, handle)
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Connection state: {:?}", state);
        self.state.send_replace(state);
    }

    /// Run until every handle is dropped and queued payloads are delivered.
    ///
    /// Once the handles are gone, a failed connect attempt ends the run and
    /// whatever is still queued is reported as undelivered.
    pub async fn run(mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        // taken off the queue but not yet delivered, oldest first
        let mut backlog: VecDeque<Payload> = VecDeque::new();
        let mut input_closed = false;

        loop {
            if input_closed && backlog.is_empty() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let connection = match self.transport.connect().await {
                Ok(connection) => connection,
                Err(e) => {
                    if input_closed {
                        error!("Giving up on {}: {}", self.transport.describe(), e);
                        break;
                    }
                    let delay = self.backoff.next_delay();
                    warn!("{}. Retrying in {:?}", e, delay);
                    self.set_state(ConnectionState::Backoff(delay));
                    self.wait(delay, &mut backlog, &mut input_closed).await;
                    continue;
                }
            };

            report.connects += 1;
            self.backoff.reset();
            self.set_state(ConnectionState::Connected);

            match self.session(connection, &mut backlog, &mut report).await {
                Session::Finished => break,
                Session::Dropped => {
                    self.set_state(ConnectionState::Disconnected);
                    self.backoff.reset();
                    let delay = self.backoff.next_delay();
                    info!("Reconnecting to {} in {:?}", self.transport.describe(), delay);
                    self.set_state(ConnectionState::Backoff(delay));
                    self.wait(delay, &mut backlog, &mut input_closed).await;
                }
            }
        }

        self.rx.close();
        let mut undelivered = backlog.len() as u64;
        while self.rx.try_recv().is_ok() {
            undelivered += 1;
        }
        if undelivered > 0 {
            error!("{} payloads were not delivered", undelivered);
        }
        report.undelivered = undelivered;

        self.set_state(ConnectionState::Disconnected);
        info!(
            delivered = report.delivered,
            undelivered = report.undelivered,
            "Dispatcher stopped"
        );
        report
    }

    /// Sleep out a backoff delay, moving queued payloads into the backlog
    /// meanwhile so a shutdown is noticed before the next attempt.
    async fn wait(&mut self, delay: Duration, backlog: &mut VecDeque<Payload>, input_closed: &mut bool) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let room = backlog.len() < self.capacity;
            tokio::select! {
                _ = &mut sleep => return,
                message = self.rx.recv(), if room && !*input_closed => match message {
                    Some(payload) => backlog.push_back(payload),
                    None => *input_closed = true,
                },
            }
        }
    }

    async fn session(
        &mut self,
        mut connection: T::Connection,
        backlog: &mut VecDeque<Payload>,
        report: &mut DispatchReport,
    ) -> Session {
        loop {
            let payload = match backlog.pop_front() {
                Some(payload) => payload,
                None => {
                    tokio::select! {
                        message = self.rx.recv() => match message {
                            Some(payload) => payload,
                            None => {
                                debug!("All dispatcher handles dropped, closing connection");
                                connection.close().await;
                                return Session::Finished;
                            }
                        },
                        _ = connection.closed() => {
                            warn!("Connection to {} closed by peer", self.transport.describe());
                            return Session::Dropped;
                        }
                    }
                }
            };

            let text = match self.codec.encode(&payload) {
                Ok(text) => text,
                Err(e) => {
                    error!("Dropping payload that cannot be encoded: {}", e);
                    continue;
                }
            };

            match connection.send_text(text).await {
                Ok(()) => {
                    report.delivered += 1;
                    debug!(tag = payload.tag(), "Payload delivered");
                }
                Err(e) => {
                    warn!("{}. Reconnecting", e);
                    backlog.push_front(payload);
                    return Session::Dropped;
                }
            }
        }
    }
}
