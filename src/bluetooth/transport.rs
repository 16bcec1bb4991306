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

//! Radio abstraction used by the listener and connector.

use anyhow::Result;
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Service UUID both peers register and dial.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x318c6089_985c_4773_b7ca_4c6130e4209e);

/// Human-readable name of the service record.
pub const SERVICE_NAME: &str = "rfcomm-chat";

/// Identity of the chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            uuid: SERVICE_UUID,
            name: SERVICE_NAME.to_string(),
        }
    }
}

/// A remote device picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub address: String,
    pub name: Option<String>,
}

impl RemoteEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// A local radio able to publish and dial the chat service.
pub trait Adapter: Send + Sync + 'static {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bound service endpoint waiting for inbound connections.
    type Listener: ServiceListener<Stream = Self::Stream>;

    /// Register the service record and start accepting on it.
    fn bind(&self, service: &ServiceRecord) -> impl Future<Output = Result<Self::Listener>> + Send;

    /// Stop any running device discovery.
    fn cancel_discovery(&self) -> impl Future<Output = Result<()>> + Send;

    /// Open a stream to the service on a remote device.
    fn connect(
        &self,
        service: &ServiceRecord,
        remote: &RemoteEndpoint,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Listening side of a bound service. Dropping it closes the endpoint.
pub trait ServiceListener: Send + 'static {
    type Stream;

    /// Wait for the next inbound connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Stream>> + Send;
}
