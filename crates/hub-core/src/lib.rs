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

//! The hub's stateful core: client registry, command/result correlation,
//! and session lifecycle management. Transport-agnostic — `MessageSink` is
//! the only seam to the outside world, implemented for real sockets by the
//! `hub` binary and by `MockSink` here for tests.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::Client;
pub use dispatcher::{CommandDispatcher, CommandResult};
pub use error::{Cancelled, UnknownPlatform};
pub use registry::{AddOutcome, ClientRegistry, InMemoryClientRegistry, NewClientParams};
pub use session::{
    AgentLoop, AgentLoopError, NoopAgentLoop, ResultCallback, Session, SessionManager,
    SessionResult, SingleCommandAgentLoop,
};
pub use transport::{MessageSink, MockSink, SendFailed};
