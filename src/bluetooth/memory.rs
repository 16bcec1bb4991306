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

//! In-process loopback radio.
//!
//! Every [`MemoryAdapter`] created from the same [`MemoryNetwork`] can bind
//! services and dial the others by address. Streams are
//! [`tokio::io::DuplexStream`] pairs.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::transport::{Adapter, RemoteEndpoint, ServiceListener, ServiceRecord};

/// Bytes buffered in each direction of a loopback stream.
const STREAM_BUFFER: usize = 64 * 1024;

type ServiceKey = (String, Uuid);

#[derive(Default)]
struct Registry {
    services: HashMap<ServiceKey, mpsc::UnboundedSender<DuplexStream>>,
    stalled: HashSet<String>,
    discovery_failures: HashSet<String>,
}

/// Shared medium connecting loopback adapters.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter reachable under `address`.
    pub fn adapter(&self, address: impl Into<String>) -> MemoryAdapter {
        MemoryAdapter {
            address: address.into(),
            network: self.clone(),
            discovery_cancellations: AtomicUsize::new(0),
        }
    }

    /// Make every connect to `address` hang instead of completing.
    pub fn stall(&self, address: impl Into<String>) {
        self.registry.lock().stalled.insert(address.into());
    }

    /// Make discovery cancellation on `address` report an error.
    pub fn fail_discovery_cancel(&self, address: impl Into<String>) {
        self.registry.lock().discovery_failures.insert(address.into());
    }

    /// Whether a service is currently bound on `address`.
    pub fn is_bound(&self, address: &str, uuid: Uuid) -> bool {
        self.registry
            .lock()
            .services
            .contains_key(&(address.to_string(), uuid))
    }
}

/// Loopback stand-in for a local radio.
pub struct MemoryAdapter {
    address: String,
    network: MemoryNetwork,
    discovery_cancellations: AtomicUsize,
}

impl MemoryAdapter {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// How many times discovery cancellation was requested.
    pub fn discovery_cancellations(&self) -> usize {
        self.discovery_cancellations.load(Ordering::SeqCst)
    }
}

impl Adapter for MemoryAdapter {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn bind(&self, service: &ServiceRecord) -> Result<MemoryListener> {
        let key = (self.address.clone(), service.uuid);
        let mut registry = self.network.registry.lock();

        if registry.services.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("Service {} already bound on {}", service.uuid, self.address),
            )
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        registry.services.insert(key.clone(), tx.clone());
        debug!("Bound {} on {}", service.uuid, self.address);

        Ok(MemoryListener {
            key,
            tx,
            rx,
            network: self.network.clone(),
        })
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.discovery_cancellations.fetch_add(1, Ordering::SeqCst);
        if self.network.registry.lock().discovery_failures.contains(&self.address) {
            return Err(anyhow!("Discovery cancel failed on {}", self.address));
        }
        Ok(())
    }

    async fn connect(
        &self,
        service: &ServiceRecord,
        remote: &RemoteEndpoint,
    ) -> Result<DuplexStream> {
        let target = {
            let registry = self.network.registry.lock();
            if registry.stalled.contains(&remote.address) {
                None
            } else {
                Some(
                    registry
                        .services
                        .get(&(remote.address.clone(), service.uuid))
                        .cloned(),
                )
            }
        };

        let Some(target) = target else {
            debug!("Connect to {} stalled", remote.address);
            return futures::future::pending().await;
        };

        let refused = || -> anyhow::Error {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("No service {} on {}", service.uuid, remote.address),
            )
            .into()
        };

        let target = target.ok_or_else(refused)?;
        let (local, peer) = tokio::io::duplex(STREAM_BUFFER);
        target.send(peer).map_err(|_| refused())?;

        debug!("{} connected to {}", self.address, remote.address);
        Ok(local)
    }
}

/// Bound loopback service. Unregisters on drop.
pub struct MemoryListener {
    key: ServiceKey,
    tx: mpsc::UnboundedSender<DuplexStream>,
    rx: mpsc::UnboundedReceiver<DuplexStream>,
    network: MemoryNetwork,
}

impl ServiceListener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<DuplexStream> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("Listener closed"))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut registry = self.network.registry.lock();
        let ours = registry
            .services
            .get(&self.key)
            .map(|tx| tx.same_channel(&self.tx))
            .unwrap_or(false);
        if ours {
            registry.services.remove(&self.key);
        }
    }
}
