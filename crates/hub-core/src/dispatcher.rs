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

//! §3/§4.D `CommandDispatcher`: the bridge between a session's agent loop
//! (sender of `COMMAND`, awaiter of its result) and the connection handler
//! (receiver of `COMMAND_RESULTS`, resolver of the waiting agent). The
//! request/response idiom — a map of correlation ids to one-shot result
//! channels, registered before the request goes out — mirrors the
//! teacher's `RpcSession` (`oneshot::channel()` handed to the connection
//! thread, resolved when the matching reply arrives), adapted from a
//! synchronous blocking `recv()` to an async `.await` since the agent loop
//! here runs as a tokio task rather than on its own OS thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hub_common::Message;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use crate::error::Cancelled;
use crate::transport::MessageSink;

/// The opaque structured value a device returns in `COMMAND_RESULTS.payload`.
pub type CommandResult = Value;

/// Per-session command/result correlation. One dispatcher per `Session`; its
/// `send_and_await` is the device-executes-a-command primitive the agent
/// loop uses, and `set_result` is how the connection handler feeds a
/// `COMMAND_RESULTS` back in.
pub struct CommandDispatcher {
    session_id: Uuid,
    task_name: String,
    transport: Arc<dyn MessageSink>,
    waiters: Mutex<HashMap<Uuid, tokio::sync::oneshot::Sender<CommandResult>>>,
    cancel_token: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        session_id: Uuid,
        task_name: String,
        transport: Arc<dyn MessageSink>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            task_name,
            transport,
            waiters: Mutex::new(HashMap::new()),
            cancel_token,
        }
    }

    async fn suspend_for(&self, response_id: Uuid, rx: tokio::sync::oneshot::Receiver<CommandResult>) -> Result<CommandResult, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                self.waiters.lock().unwrap().remove(&response_id);
                Err(Cancelled)
            }
            result = rx => result.map_err(|_| Cancelled),
        }
    }

    /// Send the session's opening `TASK_ASSIGNMENT` — the wire type the
    /// first command in a session's lifetime takes (§6), distinct from the
    /// generic `COMMAND` any later round of the agent loop sends — and
    /// suspend until the matching `COMMAND_RESULTS` arrives or the session
    /// is cancelled. `prev_response_id` is nil per §4.B, since there is no
    /// earlier response in this session to correlate against.
    pub async fn assign_task(&self, request_text: &str) -> Result<CommandResult, Cancelled> {
        let response_id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.waiters.lock().unwrap().insert(response_id, tx);

        let msg = Message::TaskAssignment {
            session_id: self.session_id.to_string(),
            response_id: response_id.to_string(),
            task_name: self.task_name.clone(),
            request: request_text.to_string(),
            prev_response_id: None,
        };
        if self.transport.send(msg).await.is_err() {
            trace!(session_id = %self.session_id, %response_id, "task assignment send failed, peer gone");
        }

        self.suspend_for(response_id, rx).await
    }

    /// Send a fresh `COMMAND` carrying `payload` and suspend until the
    /// matching `COMMAND_RESULTS` arrives (`await_result`, §3) or the
    /// session is cancelled. Used for every round after the session's
    /// opening `TASK_ASSIGNMENT`.
    ///
    /// The correlation id is minted and its waiter registered *before* the
    /// message is sent (§5: "the dispatcher assigns response_id before
    /// sending, so an early-arriving COMMAND_RESULTS for that id finds a
    /// registered waiter").
    pub async fn await_result(&self, payload: Value) -> Result<CommandResult, Cancelled> {
        let response_id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.waiters.lock().unwrap().insert(response_id, tx);

        let msg = Message::Command {
            session_id: self.session_id.to_string(),
            response_id: response_id.to_string(),
            payload,
        };
        // §7: transport-closed during send is logged and not raised further
        // — the message is simply lost and the peer is already headed
        // through disconnect cleanup, which will cancel this session.
        if self.transport.send(msg).await.is_err() {
            trace!(session_id = %self.session_id, %response_id, "command send failed, peer gone");
        }

        self.suspend_for(response_id, rx).await
    }

    /// Deliver a `COMMAND_RESULTS` payload to whichever `await_result` call
    /// is waiting on `response_id`. A `response_id` with no registered
    /// waiter (already resolved, or never issued) is silently discarded —
    /// the correlation round-trip law permits at most one delivery per id.
    pub fn set_result(&self, response_id: Uuid, result: CommandResult) {
        if let Some(tx) = self.waiters.lock().unwrap().remove(&response_id) {
            let _ = tx.send(result);
        } else {
            trace!(session_id = %self.session_id, %response_id, "discarding result for unknown/already-resolved response_id");
        }
    }
}
