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

//! Connector: dials the chat service on one remote device.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::transport::{Adapter, RemoteEndpoint, ServiceRecord};
use super::worker::{run_guarded, CancelHandle, ConnectionUpdate, UpdateSender, Worker};
use crate::state::ConnectionState;

/// Opens a single outbound connection.
pub struct Connector<A: Adapter> {
    adapter: Arc<A>,
    service: ServiceRecord,
    remote: RemoteEndpoint,
    timeout: Option<Duration>,
}

impl<A: Adapter> Connector<A> {
    pub fn new(adapter: Arc<A>, service: ServiceRecord, remote: RemoteEndpoint) -> Self {
        Self {
            adapter,
            service,
            remote,
            timeout: None,
        }
    }

    /// Give up dialing after `timeout`. `None` waits until cancelled.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the connect task.
    ///
    /// Reports `ClientDiscoveryCancel`, `ClientConnecting`, then either
    /// `ClientConnected` (with the stream) or `ClientConnectionFailed`.
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
        // Discovery competes with connection setup for the radio.
        tx.emit(ConnectionUpdate::state(ConnectionState::ClientDiscoveryCancel))
            .await;
        if let Err(e) = self.adapter.cancel_discovery().await {
            warn!("Failed to cancel discovery: {:#}", e);
        }

        tx.emit(ConnectionUpdate::state(ConnectionState::ClientConnecting))
            .await;
        info!("Connecting to {}", self.remote);

        let connected = run_guarded(
            &cancel,
            self.timeout,
            self.adapter.connect(&self.service, &self.remote),
        )
        .await;

        match connected {
            Ok(stream) => {
                info!("Connected to {}", self.remote);
                tx.emit(ConnectionUpdate::connected(
                    ConnectionState::ClientConnected,
                    stream,
                ))
                .await;
            }
            Err(e) => {
                warn!("Failed connecting to {}: {:#}", self.remote, e);
                tx.emit(ConnectionUpdate::state(ConnectionState::ClientConnectionFailed))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::MemoryNetwork;
    use crate::bluetooth::transport::ServiceListener;

    async fn collect_states<S>(worker: &mut Worker<S>) -> Vec<(ConnectionState, bool)> {
        let mut states = Vec::new();
        while let Some(update) = worker.next_update().await {
            states.push((update.state, update.stream.is_some()));
        }
        states
    }

    #[tokio::test]
    async fn test_connects_to_listener() {
        let network = MemoryNetwork::new();
        let server = network.adapter("AA:AA");
        let client = Arc::new(network.adapter("BB:BB"));
        let service = ServiceRecord::default();

        let mut listener = server.bind(&service).await.unwrap();

        let mut worker =
            Connector::new(client.clone(), service, RemoteEndpoint::new("AA:AA")).start();
        let _accepted = listener.accept().await.unwrap();

        assert_eq!(
            collect_states(&mut worker).await,
            vec![
                (ConnectionState::ClientDiscoveryCancel, false),
                (ConnectionState::ClientConnecting, false),
                (ConnectionState::ClientConnected, true),
            ]
        );
        assert_eq!(client.discovery_cancellations(), 1);
    }

    #[tokio::test]
    async fn test_discovery_cancel_failure_is_ignored() {
        let network = MemoryNetwork::new();
        network.fail_discovery_cancel("BB:BB");
        let server = network.adapter("AA:AA");
        let client = Arc::new(network.adapter("BB:BB"));
        let service = ServiceRecord::default();

        let mut listener = server.bind(&service).await.unwrap();

        let mut worker =
            Connector::new(client.clone(), service, RemoteEndpoint::new("AA:AA")).start();
        let _accepted = listener.accept().await.unwrap();

        assert_eq!(
            collect_states(&mut worker).await,
            vec![
                (ConnectionState::ClientDiscoveryCancel, false),
                (ConnectionState::ClientConnecting, false),
                (ConnectionState::ClientConnected, true),
            ]
        );
        assert_eq!(client.discovery_cancellations(), 1);
    }

    #[tokio::test]
    async fn test_no_listener_fails() {
        let network = MemoryNetwork::new();
        let client = Arc::new(network.adapter("BB:BB"));

        let mut worker = Connector::new(
            client,
            ServiceRecord::default(),
            RemoteEndpoint::new("AA:AA"),
        )
        .start();

        assert_eq!(
            collect_states(&mut worker).await,
            vec![
                (ConnectionState::ClientDiscoveryCancel, false),
                (ConnectionState::ClientConnecting, false),
                (ConnectionState::ClientConnectionFailed, false),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_unblocks_connect() {
        let network = MemoryNetwork::new();
        network.stall("AA:AA");
        let client = Arc::new(network.adapter("BB:BB"));

        let mut worker = Connector::new(
            client,
            ServiceRecord::default(),
            RemoteEndpoint::new("AA:AA"),
        )
        .start();

        worker.next_update().await.unwrap();
        assert_eq!(
            worker.next_update().await.unwrap().state,
            ConnectionState::ClientConnecting
        );

        worker.cancel();
        assert_eq!(
            worker.next_update().await.unwrap().state,
            ConnectionState::ClientConnectionFailed
        );
    }

    #[tokio::test]
    async fn test_timeout_fails() {
        let network = MemoryNetwork::new();
        network.stall("AA:AA");
        let client = Arc::new(network.adapter("BB:BB"));

        let mut worker = Connector::new(
            client,
            ServiceRecord::default(),
            RemoteEndpoint::new("AA:AA"),
        )
        .with_timeout(Some(Duration::from_millis(20)))
        .start();

        let states = collect_states(&mut worker).await;
        assert_eq!(
            states.last(),
            Some(&(ConnectionState::ClientConnectionFailed, false))
        );
    }
}
