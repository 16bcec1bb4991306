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

//! Bluetooth communication module.
//!
//! Listener and connector workers, the RFCOMM stream pump and the radios
//! they run on.

pub mod bluez;
mod connector;
mod listener;
pub mod memory;
pub mod protocol;
mod pump;
mod transport;
mod worker;

pub use bluez::{BluezAdapter, BluezOptions, DiscoveredDevice, PairedDevice};
pub use connector::Connector;
pub use listener::Listener;
pub use memory::{MemoryAdapter, MemoryNetwork};
pub use protocol::{Frame, FrameDecoder, Framing};
pub use pump::{PumpEvent, PumpOptions, PumpWriter, StreamPump};
pub use transport::{
    Adapter, RemoteEndpoint, ServiceListener, ServiceRecord, SERVICE_NAME, SERVICE_UUID,
};
pub use worker::{CancelHandle, ConnectionUpdate, Worker};
