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

//! Plumbing shared by the listener and connector workers.

use anyhow::{anyhow, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::state::ConnectionState;

/// A state change reported by a worker, with the stream once connected.
pub struct ConnectionUpdate<S> {
    pub state: ConnectionState,
    pub stream: Option<S>,
}

impl<S> ConnectionUpdate<S> {
    pub fn state(state: ConnectionState) -> Self {
        Self {
            state,
            stream: None,
        }
    }

    pub fn connected(state: ConnectionState, stream: S) -> Self {
        Self {
            state,
            stream: Some(stream),
        }
    }
}

impl<S> fmt::Debug for ConnectionUpdate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionUpdate")
            .field("state", &self.state)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Cancels a running worker. Cloning shares the same worker.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// A request made before the worker reaches its blocking call is kept
    /// and observed as soon as it does.
    pub fn cancel(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn cancelled(&self) {
        self.notify.notified().await;
    }
}

/// A started listener or connector.
#[derive(Debug)]
pub struct Worker<S> {
    updates: mpsc::Receiver<ConnectionUpdate<S>>,
    cancel: CancelHandle,
}

impl<S> Worker<S> {
    pub(crate) fn new(updates: mpsc::Receiver<ConnectionUpdate<S>>, cancel: CancelHandle) -> Self {
        Self { updates, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Next state change, or `None` once the worker has terminated.
    pub async fn next_update(&mut self) -> Option<ConnectionUpdate<S>> {
        self.updates.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<ConnectionUpdate<S>>, CancelHandle) {
        (self.updates, self.cancel)
    }
}

/// Send side held by the worker task.
pub(crate) struct UpdateSender<S> {
    tx: mpsc::Sender<ConnectionUpdate<S>>,
}

impl<S> UpdateSender<S> {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<ConnectionUpdate<S>>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { tx }, rx)
    }

    pub(crate) async fn emit(&self, update: ConnectionUpdate<S>) {
        // Nobody listening any more is not an error for the worker.
        let _ = self.tx.send(update).await;
    }
}

/// Run a blocking step until it completes, times out or is cancelled.
pub(crate) async fn run_guarded<T, F>(
    cancel: &CancelHandle,
    timeout: Option<Duration>,
    step: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, step).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("Timed out after {:?}", limit)),
            },
            None => step.await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("Cancelled")),
        result = bounded => result,
    }
}
