// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chat session: owns the connection state, the active stream pump and the
//! message history.

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::{
    Adapter, CancelHandle, ConnectionUpdate, Connector, Listener, PumpEvent, PumpOptions,
    RemoteEndpoint, ServiceRecord, StreamPump, Worker,
};
use crate::state::{ConnectionState, Role};

/// Settings a session applies to every attempt and connection.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub service: ServiceRecord,
    /// Limit on accept/connect. `None` blocks until cancelled.
    pub connect_timeout: Option<Duration>,
    pub pump: PumpOptions,
}

/// A chat message, sent or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub sender: Role,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(content: impl Into<String>, sender: Role) -> Self {
        Self {
            content: content.into(),
            sender,
            timestamp: Local::now(),
        }
    }
}

/// Notifications for whoever presents the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    MessageReceived(Message),
}

struct ActivePump<S> {
    id: u64,
    pump: StreamPump<S>,
}

struct SessionState<S> {
    role: Option<Role>,
    connection: Option<ConnectionState>,
    history: Vec<Message>,
    pump: Option<ActivePump<S>>,
    next_pump_id: u64,
    attempt: Option<u64>,
    next_attempt_id: u64,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl<S> SessionState<S> {
    fn new() -> Self {
        Self {
            role: None,
            connection: None,
            history: Vec::new(),
            pump: None,
            next_pump_id: 0,
            attempt: None,
            next_attempt_id: 0,
            event_tx: None,
        }
    }

    fn can_start(&self) -> bool {
        self.attempt.is_none()
            && !self
                .connection
                .map(|s| s.is_connected() || s.is_attempt_in_flight())
                .unwrap_or(false)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn mark_disconnected(&mut self) {
        if ConnectionState::can_transition(self.connection, ConnectionState::Disconnected) {
            self.connection = Some(ConnectionState::Disconnected);
            info!("Connection state: {}", ConnectionState::Disconnected);
            self.emit(SessionEvent::StateChanged(ConnectionState::Disconnected));
        }
    }
}

struct Inner<A: Adapter> {
    adapter: Arc<A>,
    options: SessionOptions,
    state: Mutex<SessionState<A::Stream>>,
}

impl<A: Adapter> Inner<A> {
    /// Apply a worker update. Runs on the attempt's driver task.
    fn apply(self: &Arc<Self>, attempt: u64, update: ConnectionUpdate<A::Stream>) {
        let ConnectionUpdate {
            state: next,
            stream,
        } = update;
        let mut state = self.state.lock();

        if state.attempt != Some(attempt) {
            debug!("Ignoring {:?} from finished attempt #{}", next, attempt);
            return;
        }
        if next.ends_attempt() {
            state.attempt = None;
        }
        if !ConnectionState::can_transition(state.connection, next) {
            warn!("Ignoring transition {:?} -> {:?}", state.connection, next);
            return;
        }

        state.connection = Some(next);
        info!("Connection state: {}", next);

        if next.is_connected() {
            match stream {
                Some(stream) => self.install_pump(&mut state, stream),
                None => warn!("Connected without a stream"),
            }
        }

        state.emit(SessionEvent::StateChanged(next));
    }

    /// Retire the current pump and start one on `stream`.
    ///
    /// Called with the state lock held, so no other replacement or
    /// delivery interleaves.
    fn install_pump(self: &Arc<Self>, state: &mut SessionState<A::Stream>, stream: A::Stream) {
        if let Some(previous) = state.pump.take() {
            info!("Stopping previous stream pump #{}", previous.id);
            previous.pump.stop();
        }

        let id = state.next_pump_id;
        state.next_pump_id += 1;

        let weak = Arc::downgrade(self);
        let pump = StreamPump::start(stream, self.options.pump.clone(), move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_pump_event(id, event);
            }
        });
        debug!("Started stream pump #{}", id);
        state.pump = Some(ActivePump { id, pump });
    }

    fn on_pump_event(&self, id: u64, event: PumpEvent) {
        let mut state = self.state.lock();
        if state.pump.as_ref().map(|active| active.id) != Some(id) {
            debug!("Ignoring event from retired stream pump #{}", id);
            return;
        }

        match event {
            PumpEvent::Frame(frame) => {
                let message = Message::new(frame.content, frame.sender);
                debug!("Message received from {}", message.sender);
                state.history.push(message.clone());
                state.emit(SessionEvent::MessageReceived(message));
            }
            PumpEvent::Closed => {
                info!("Stream pump #{} ended", id);
                state.pump = None;
                state.mark_disconnected();
            }
        }
    }
}

/// A running listen or connect attempt.
pub struct Attempt {
    cancel: CancelHandle,
    task: JoinHandle<Option<ConnectionState>>,
}

impl Attempt {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the worker to finish and return the last state it reported.
    pub async fn wait(self) -> Option<ConnectionState> {
        self.task.await.ok().flatten()
    }
}

/// A single point-to-point chat channel.
pub struct Session<A: Adapter> {
    inner: Arc<Inner<A>>,
}

impl<A: Adapter> Clone for Session<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Adapter> Session<A> {
    pub fn new(adapter: A, options: SessionOptions) -> Self {
        Self::with_adapter(Arc::new(adapter), options)
    }

    /// Create a session on an adapter the caller keeps using.
    pub fn with_adapter(adapter: Arc<A>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                options,
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.inner.adapter
    }

    pub fn service(&self) -> &ServiceRecord {
        &self.inner.options.service
    }

    /// Take the event receiver (can only be called once).
    ///
    /// Events raised before this call are not buffered.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        let mut state = self.inner.state.lock();
        if state.event_tx.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.event_tx = Some(tx);
        Some(rx)
    }

    /// Whether a new listen or connect attempt may start.
    pub fn can_start(&self) -> bool {
        self.inner.state.lock().can_start()
    }

    /// Wait for one inbound connection as the server.
    pub fn listen(&self) -> Result<Attempt> {
        let attempt = self.begin(Role::Server)?;
        let worker = Listener::new(self.inner.adapter.clone(), self.inner.options.service.clone())
            .with_timeout(self.inner.options.connect_timeout)
            .start();
        Ok(self.drive(attempt, worker))
    }

    /// Connect to `remote` as the client.
    pub fn connect(&self, remote: RemoteEndpoint) -> Result<Attempt> {
        let attempt = self.begin(Role::Client)?;
        let worker = Connector::new(
            self.inner.adapter.clone(),
            self.inner.options.service.clone(),
            remote,
        )
        .with_timeout(self.inner.options.connect_timeout)
        .start();
        Ok(self.drive(attempt, worker))
    }

    fn begin(&self, role: Role) -> Result<u64> {
        let mut state = self.inner.state.lock();
        if !state.can_start() {
            match state.connection {
                Some(current) if current.is_connected() => bail!("Already connected"),
                _ => bail!("A connection attempt is already in progress"),
            }
        }

        let id = state.next_attempt_id;
        state.next_attempt_id += 1;
        state.attempt = Some(id);
        state.role = Some(role);
        info!("Starting {} attempt #{}", role, id);
        Ok(id)
    }

    fn drive(&self, attempt: u64, worker: Worker<A::Stream>) -> Attempt {
        let (mut updates, cancel) = worker.into_parts();
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            let mut last = None;
            while let Some(update) = updates.recv().await {
                last = Some(update.state);
                inner.apply(attempt, update);
            }

            let mut state = inner.state.lock();
            if state.attempt == Some(attempt) {
                state.attempt = None;
            }
            last
        });

        Attempt { cancel, task }
    }

    /// Send a message to the peer.
    ///
    /// Returns `Ok(false)` without touching the history when `content` is
    /// empty or no connection is active.
    pub async fn send(&self, content: &str) -> Result<bool> {
        let (writer, sender) = {
            let mut state = self.inner.state.lock();
            let connected = state.connection.filter(|s| s.is_connected());
            let Some(sender) = connected.and_then(|s| s.role()) else {
                debug!("Not connected, message dropped");
                return Ok(false);
            };
            if content.is_empty() {
                return Ok(false);
            }
            let Some(active) = state.pump.as_ref() else {
                return Ok(false);
            };

            let writer = active.pump.writer();
            state.history.push(Message::new(content, sender));
            (writer, sender)
        };

        writer.write(content, sender).await?;
        Ok(true)
    }

    /// Close the active connection.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        if let Some(active) = state.pump.take() {
            info!("Closing stream pump #{}", active.id);
            active.pump.stop();
        }
        state.mark_disconnected();
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.inner.state.lock().connection
    }

    /// Role of the most recent attempt.
    pub fn role(&self) -> Option<Role> {
        self.inner.state.lock().role
    }

    pub fn is_connected(&self) -> bool {
        self.state().map(|s| s.is_connected()).unwrap_or(false)
    }

    /// Whether a stream pump is currently delivering messages.
    pub fn has_active_pump(&self) -> bool {
        self.inner.state.lock().pump.is_some()
    }

    /// Messages in arrival order.
    pub fn history(&self) -> Vec<Message> {
        self.inner.state.lock().history.clone()
    }
}
