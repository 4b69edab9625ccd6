// Copyright (C) 2026 The Hub Authors. This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thiserror::Error;

/// Errors the protocol layer (§4.B) and connection handler (§4.E) raise
/// while interpreting messages on an already-established connection.
/// Distinct from transport failure, which is represented by the transport
/// simply reporting `Closed`/`SendFailed` rather than an error value (§4.A).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("first message was not REGISTER")]
    NotRegisteredYet,
    #[error("duplicate REGISTER on an already-registered connection")]
    DuplicateRegister,
    #[error("empty client_id on REGISTER")]
    EmptyClientId,
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("registration timed out waiting for first message")]
    RegistrationTimeout,
}

/// Errors raised while routing a task to a target device (§4.E, §7
/// "routing-failure").
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    #[error("target device not connected")]
    TargetDeviceNotConnected,
    #[error("empty client id")]
    EmptyClientId,
    #[error("empty task content")]
    EmptyTaskContent,
}

impl RoutingError {
    /// The exact `detail` string §6's HTTP dispatch surface specifies for
    /// this failure, distinct from (and more precisely worded than) the
    /// internal `Display` impl above.
    pub fn http_detail(&self) -> &'static str {
        match self {
            RoutingError::TargetDeviceNotConnected => "Client not online",
            RoutingError::EmptyClientId => "Empty client ID",
            RoutingError::EmptyTaskContent => "Empty task content",
        }
    }
}
