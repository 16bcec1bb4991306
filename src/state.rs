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

//! Connection lifecycle states and peer roles.

use std::fmt;

/// Which side of the channel a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The connector, tagged `0` on the wire.
    Client,
    /// The listener, tagged `1` on the wire.
    Server,
}

impl Role {
    /// ASCII digit used as the trailing sender tag of a frame.
    pub fn tag(&self) -> u8 {
        match self {
            Role::Client => b'0',
            Role::Server => b'1',
        }
    }

    /// Parse a trailing sender tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'0' => Some(Role::Client),
            b'1' => Some(Role::Server),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of the single connection.
///
/// There is no idle variant: a session that has never attempted a
/// connection holds `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    ServerWaitingForConnection,
    ServerConnectionFailed,
    ServerConnected,
    ClientDiscoveryCancel,
    ClientConnecting,
    ClientConnected,
    ClientConnectionFailed,
    /// The active stream ended, either closed by the remote or locally.
    Disconnected,
}

impl ConnectionState {
    /// Side of the connection this state belongs to.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::ServerWaitingForConnection
            | Self::ServerConnectionFailed
            | Self::ServerConnected => Some(Role::Server),
            Self::ClientDiscoveryCancel
            | Self::ClientConnecting
            | Self::ClientConnected
            | Self::ClientConnectionFailed => Some(Role::Client),
            Self::Disconnected => None,
        }
    }

    /// Sending and receiving are only enabled in connected states.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::ServerConnected | Self::ClientConnected)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ServerConnectionFailed | Self::ClientConnectionFailed)
    }

    /// A listener or connector worker is still running.
    pub fn is_attempt_in_flight(&self) -> bool {
        matches!(
            self,
            Self::ServerWaitingForConnection | Self::ClientDiscoveryCancel | Self::ClientConnecting
        )
    }

    /// Last state a listener or connector worker reports.
    pub fn ends_attempt(&self) -> bool {
        self.is_connected() || self.is_failure()
    }

    /// Check a transition against the lifecycle table.
    pub fn can_transition(from: Option<Self>, to: Self) -> bool {
        use ConnectionState::*;

        let idle = match from {
            None => true,
            Some(state) => state.is_failure() || state == Disconnected,
        };

        match to {
            ServerWaitingForConnection | ClientDiscoveryCancel => idle,
            ServerConnected | ServerConnectionFailed => from == Some(ServerWaitingForConnection),
            ClientConnecting => from == Some(ClientDiscoveryCancel),
            ClientConnected => from == Some(ClientConnecting),
            ClientConnectionFailed => {
                matches!(from, Some(ClientConnecting) | Some(ClientDiscoveryCancel))
            }
            Disconnected => from.map(|s| s.is_connected()).unwrap_or(false),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerWaitingForConnection => "Server is waiting for connection",
            Self::ServerConnectionFailed => "Server connection has failed",
            Self::ServerConnected => "Server is now connected",
            Self::ClientDiscoveryCancel => "Client discovery has been cancelled",
            Self::ClientConnecting => "Client is connecting",
            Self::ClientConnected => "Client is now connected",
            Self::ClientConnectionFailed => "Client connection has failed",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
