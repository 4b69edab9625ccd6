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

//! Types shared by every side of the hub: the wire message taxonomy (§6 of
//! the design), client/session identifiers, and error enums that cross
//! component boundaries. Nothing in here knows about axum, tokio, or how a
//! client got connected — that's `hub-core` and the `hub` binary.

pub mod client;
pub mod error;
pub mod message;
pub mod session;

pub use client::ClientKind;
pub use error::{ProtocolError, RoutingError};
pub use message::Message;
pub use session::{CancelReason, SessionState};
