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

//! Listener: waits for exactly one inbound connection.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::transport::{Adapter, ServiceListener, ServiceRecord};
use super::worker::{run_guarded, CancelHandle, ConnectionUpdate, UpdateSender, Worker};
use crate::state::ConnectionState;

/// Accepts a single connection on the chat service.
pub struct Listener<A: Adapter> {
    adapter: Arc<A>,
    service: ServiceRecord,
    timeout: Option<Duration>,
}

impl<A: Adapter> Listener<A> {
    pub fn new(adapter: Arc<A>, service: ServiceRecord) -> Self {
        Self {
            adapter,
            service,
            timeout: None,
        }
    }

    /// Give up waiting after `timeout`. `None` waits until cancelled.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the accept task.
    ///
    /// Reports `ServerWaitingForConnection` followed by either
    /// `ServerConnected` (with the stream) or `ServerConnectionFailed`.
    pub fn start(self) -> Worker<A::Stream> {
        let (tx, rx) = UpdateSender::channel();
        let cancel = CancelHandle::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            self.run(tx, task_cancel).await;
        });

        Worker::new(rx, cancel)
    }

    async fn run(self, tx: UpdateSender<A::Stream>, cancel: CancelHandle) {
        tx.emit(ConnectionUpdate::state(ConnectionState::ServerWaitingForConnection))
            .await;

        let adapter = self.adapter;
        let service = self.service;

        let accepted = run_guarded(&cancel, self.timeout, async {
            let mut listener = adapter.bind(&service).await?;
            info!("Listening for '{}' ({})", service.name, service.uuid);
            // The listener drops when this block ends, closing the endpoint
            // whatever the outcome.
            listener.accept().await
        })
        .await;

        match accepted {
            Ok(stream) => {
                info!("Inbound connection accepted");
                tx.emit(ConnectionUpdate::connected(
                    ConnectionState::ServerConnected,
                    stream,
                ))
                .await;
            }
            Err(e) => {
                warn!("Listener failed: {:#}", e);
                tx.emit(ConnectionUpdate::state(ConnectionState::ServerConnectionFailed))
                    .await;
            }
        }
    }
}
