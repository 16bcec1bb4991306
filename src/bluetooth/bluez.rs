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

//! BlueZ radio using RFCOMM profiles.

use anyhow::{anyhow, bail, Context, Result};
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, Stream};
use bluer::{Address, AdapterEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Adapter, RemoteEndpoint, ServiceListener, ServiceRecord};

/// Profile settings applied when registering the service.
#[derive(Debug, Clone, Default)]
pub struct BluezOptions {
    /// Fixed RFCOMM channel; BlueZ picks one when unset.
    pub channel: Option<u16>,
    pub require_authentication: bool,
    pub require_authorization: bool,
}

/// A paired Bluetooth device.
#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub address: Address,
    pub name: String,
}

impl PairedDevice {
    pub fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint::new(self.address.to_string()).with_name(self.name.clone())
    }
}

/// A device seen during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub address: Address,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn endpoint(&self) -> RemoteEndpoint {
        let endpoint = RemoteEndpoint::new(self.address.to_string());
        match &self.name {
            Some(name) => endpoint.with_name(name.clone()),
            None => endpoint,
        }
    }
}

/// Local BlueZ adapter.
pub struct BluezAdapter {
    session: bluer::Session,
    adapter: bluer::Adapter,
    options: BluezOptions,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Open the named adapter, or the default one.
    pub async fn new(adapter_name: Option<&str>, options: BluezOptions) -> Result<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            options,
            discovery: Mutex::new(None),
        })
    }

    /// Power the adapter on if needed.
    pub async fn ensure_powered(&self) -> Result<()> {
        if !self.adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            self.adapter.set_powered(true).await?;
        }
        Ok(())
    }

    /// Get the adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    /// Get paired devices.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PairedDevice {
                    address: addr,
                    name,
                });
            }
        }

        debug!("{} paired devices", devices.len());
        Ok(devices)
    }

    /// Start scanning for nearby devices.
    ///
    /// Replaces a scan already running. The scan stops when the receiver
    /// is dropped or [`Adapter::cancel_discovery`] is called.
    pub async fn start_discovery(&self) -> Result<mpsc::Receiver<DiscoveredDevice>> {
        let events = self.adapter.discover_devices().await?;
        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::channel(32);
        info!("Discovery started on {}", adapter.name());

        let task = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let name = match adapter.device(address) {
                    Ok(device) => device.name().await.ok().flatten(),
                    Err(_) => None,
                };
                debug!("Discovered device: {} {:?}", address, name);
                if tx.send(DiscoveredDevice { address, name }).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    fn profile(&self, service: &ServiceRecord, role: Role) -> Profile {
        Profile {
            uuid: service.uuid,
            name: Some(service.name.clone()),
            role: Some(role),
            channel: match role {
                Role::Server => self.options.channel,
                Role::Client => None,
            },
            require_authentication: Some(self.options.require_authentication),
            require_authorization: Some(self.options.require_authorization),
            auto_connect: Some(false),
            ..Default::default()
        }
    }
}

impl Adapter for BluezAdapter {
    type Stream = Stream;
    type Listener = ProfileListener;

    async fn bind(&self, service: &ServiceRecord) -> Result<ProfileListener> {
        let handle = self
            .session
            .register_profile(self.profile(service, Role::Server))
            .await
            .context("Failed to register RFCOMM profile")?;
        info!("RFCOMM profile '{}' registered ({})", service.name, service.uuid);
        Ok(ProfileListener { handle })
    }

    async fn cancel_discovery(&self) -> Result<()> {
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
            info!("Discovery cancelled");
        }
        Ok(())
    }

    async fn connect(&self, service: &ServiceRecord, remote: &RemoteEndpoint) -> Result<Stream> {
        let address: Address = remote
            .address
            .parse()
            .map_err(|_| anyhow!("Invalid Bluetooth address: {}", remote.address))?;

        let mut handle = self
            .session
            .register_profile(self.profile(service, Role::Client))
            .await
            .context("Failed to register RFCOMM profile")?;

        let device = self.adapter.device(address)?;
        let dial = device.connect_profile(&service.uuid);
        tokio::pin!(dial);
        let mut dialed = false;

        // BlueZ hands the stream over through the profile handle, possibly
        // before connect_profile returns.
        loop {
            tokio::select! {
                result = &mut dial, if !dialed => {
                    dialed = true;
                    if let Err(e) = result {
                        bail!("Connect profile failed: {}", e);
                    }
                }
                request = handle.next() => {
                    let request = request.ok_or_else(|| anyhow!("RFCOMM profile unregistered"))?;
                    if request.device() == address {
                        return Ok(request.accept()?);
                    }
                    warn!("Rejecting connection from unexpected device {}", request.device());
                    request.reject(ReqError::Rejected);
                }
            }
        }
    }
}

/// Server-role profile waiting for connect requests.
pub struct ProfileListener {
    handle: ProfileHandle,
}

impl ServiceListener for ProfileListener {
    type Stream = Stream;

    async fn accept(&mut self) -> Result<Stream> {
        let request = self
            .handle
            .next()
            .await
            .ok_or_else(|| anyhow!("RFCOMM profile unregistered"))?;
        info!("Connection request from {}", request.device());
        Ok(request.accept()?)
    }
}
