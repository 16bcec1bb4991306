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

//! Point-to-point text chat over a Bluetooth RFCOMM stream.
//!
//! One peer listens, the other connects; once connected both exchange
//! frames tagged with the sender's role through a [`session::Session`].

pub mod bluetooth;
pub mod config;
pub mod session;
pub mod state;

pub use config::Config;
pub use session::{Attempt, Message, Session, SessionEvent, SessionOptions};
pub use state::{ConnectionState, Role};
