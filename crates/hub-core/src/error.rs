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

/// §7 "session-setup-failure": the platform named at session creation has
/// no registered factory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no session factory registered for platform {0:?}")]
pub struct UnknownPlatform(pub String);

/// Raised by `CommandDispatcher::await_result` when the session's
/// background activity is cancelled while suspended (§4.D: "Cancellation
/// MUST interrupt any outstanding await_result suspension").
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session was cancelled while awaiting a command result")]
pub struct Cancelled;
