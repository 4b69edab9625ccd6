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

//! §4.D Session manager: creates platform-specific session objects on
//! demand, runs them as cancellable background tokio tasks, delivers
//! results via a callback, and caches results for later retrieval.
//!
//! The "platform selects the session implementation, the manager owns no
//! platform-specific logic" design (§4.D) is the teacher's
//! `SessionFactory`/`Session` trait split (`crates/common/src/tasks/sessions.rs`)
//! generalized from "one player's I/O session" to "one platform's agent
//! loop": here the per-platform pluggable unit is `AgentLoop`, and
//! `NoopAgentLoop` plays the role the teacher's `NoopClientSession` plays
//! in tests — a trait implementation that does nothing observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use hub_common::{CancelReason, Message, SessionState};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dispatcher::CommandDispatcher;
use crate::error::UnknownPlatform;
use crate::transport::MessageSink;

/// Outcome of an agent loop's run, distinguishing an intentional
/// cancellation (already translated from `Cancelled` by whatever called
/// into the `CommandDispatcher`) from a genuine failure (§4.D:
/// "the activity's top level MUST translate Cancelled into the outcomes
/// [...] rather than propagating as a general exception").
#[derive(Debug)]
pub enum AgentLoopError {
    Cancelled,
    Failed(String),
}

impl From<crate::error::Cancelled> for AgentLoopError {
    fn from(_: crate::error::Cancelled) -> Self {
        AgentLoopError::Cancelled
    }
}

/// The agent decision loop the spec treats as a black box (§1 "Explicitly
/// out of scope" / §9 "Bounded collaboration surface with the agent"): it
/// uses exactly one capability, the `CommandDispatcher`, and terminates
/// with a result payload or an error.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    async fn run(
        &self,
        dispatcher: Arc<CommandDispatcher>,
        request_text: &str,
    ) -> Result<Value, AgentLoopError>;
}

/// A reference implementation that issues exactly one command — the
/// session's opening `TASK_ASSIGNMENT` (§6), carrying the request text
/// verbatim — and returns whatever the device sends back. Useful both as a
/// smoke-tested default platform implementation and as the shape any real
/// LLM-driven agent loop would follow, since the spec's agent is an
/// external collaborator this core never implements.
pub struct SingleCommandAgentLoop;

#[async_trait]
impl AgentLoop for SingleCommandAgentLoop {
    async fn run(
        &self,
        dispatcher: Arc<CommandDispatcher>,
        request_text: &str,
    ) -> Result<Value, AgentLoopError> {
        dispatcher.assign_task(request_text).await.map_err(Into::into)
    }
}

/// Does nothing and immediately "succeeds" with a null result. Mirrors the
/// teacher's `NoopClientSession` — a harmless default for tests that don't
/// care about agent behavior, never wired up for a real platform.
pub struct NoopAgentLoop;

#[async_trait]
impl AgentLoop for NoopAgentLoop {
    async fn run(
        &self,
        _dispatcher: Arc<CommandDispatcher>,
        _request_text: &str,
    ) -> Result<Value, AgentLoopError> {
        Ok(Value::Null)
    }
}

/// A task execution context (§3 "Session"). This is an immutable snapshot;
/// the live, mutable state lives in `SessionHandle` inside the manager.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub task_name: String,
    pub request_text: String,
    pub platform: String,
    pub state: SessionState,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub cancel_reason: Option<CancelReason>,
}

/// A session's terminal result, as retrievable via `get_result`/
/// `get_result_by_task` and ultimately `GET /api/task_result/{task_name}`.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: Uuid,
    pub task_name: String,
    pub status: SessionState,
    pub result: Option<Value>,
}

struct SessionHandle {
    session_id: Uuid,
    task_name: String,
    request_text: String,
    platform: String,
    state: Mutex<SessionState>,
    started_at: SystemTime,
    ended_at: Mutex<Option<SystemTime>>,
    cancel_reason: Mutex<Option<CancelReason>>,
    cancel_token: CancellationToken,
    dispatcher: Arc<CommandDispatcher>,
    spawned: AtomicBool,
}

impl SessionHandle {
    fn snapshot(&self) -> Session {
        Session {
            session_id: self.session_id,
            task_name: self.task_name.clone(),
            request_text: self.request_text.clone(),
            platform: self.platform.clone(),
            state: *self.state.lock().unwrap(),
            started_at: self.started_at,
            ended_at: *self.ended_at.lock().unwrap(),
            cancel_reason: *self.cancel_reason.lock().unwrap(),
        }
    }

    /// Record a cancellation reason (if the session hasn't already
    /// terminated) and wake any suspended `await_result`. Idempotent: a
    /// terminal session ignores further cancel requests (§3 invariant:
    /// terminal states never transition again).
    fn cancel(&self, reason: CancelReason) {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return;
        }
        *self.cancel_reason.lock().unwrap() = Some(reason);
        drop(state);
        self.cancel_token.cancel();
    }

    fn finish(&self, state: SessionState, reason: Option<CancelReason>) {
        *self.state.lock().unwrap() = state;
        *self.ended_at.lock().unwrap() = Some(SystemTime::now());
        if reason.is_some() {
            *self.cancel_reason.lock().unwrap() = reason;
        }
    }
}

/// Callback invoked exactly once per background activity (§4.D "at-most-once
/// callback" law), synthesizing the `TASK_END` for the session's originator.
pub type ResultCallback = Arc<dyn Fn(Uuid, Message) + Send + Sync>;

struct Inner {
    sessions: HashMap<Uuid, Arc<SessionHandle>>,
    results: HashMap<Uuid, SessionResult>,
    task_index: HashMap<String, Uuid>,
    factories: HashMap<String, Arc<dyn AgentLoop>>,
}

/// §4.D's public contract. Cheaply `Clone`able (an `Arc` around the shared
/// state), the way the session manager is handed to every connection
/// handler in the `hub` binary.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Mutex<Inner>>,
}

impl SessionManager {
    pub fn new(factories: HashMap<String, Arc<dyn AgentLoop>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sessions: HashMap::new(),
                results: HashMap::new(),
                task_index: HashMap::new(),
                factories,
            })),
        }
    }

    /// Idempotent on `session_id`: a second call with the same id returns
    /// the existing session's snapshot rather than creating a new one.
    pub fn create_or_get(
        &self,
        session_id: Uuid,
        task_name: Option<String>,
        request_text: String,
        platform: String,
        transport: Arc<dyn MessageSink>,
    ) -> Result<Session, UnknownPlatform> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.sessions.get(&session_id) {
            return Ok(existing.snapshot());
        }
        if !inner.factories.contains_key(&platform) {
            return Err(UnknownPlatform(platform));
        }

        let task_name = task_name.unwrap_or_else(|| session_id.to_string());
        let cancel_token = CancellationToken::new();
        let dispatcher = Arc::new(CommandDispatcher::new(
            session_id,
            task_name.clone(),
            transport,
            cancel_token.clone(),
        ));
        let handle = Arc::new(SessionHandle {
            session_id,
            task_name: task_name.clone(),
            request_text,
            platform,
            state: Mutex::new(SessionState::Created),
            started_at: SystemTime::now(),
            ended_at: Mutex::new(None),
            cancel_reason: Mutex::new(None),
            cancel_token,
            dispatcher,
            spawned: AtomicBool::new(false),
        });

        let snapshot = handle.snapshot();
        inner.task_index.insert(task_name, session_id);
        inner.sessions.insert(session_id, handle);
        Ok(snapshot)
    }

    /// §4.D: create (if needed) and schedule the background activity that
    /// runs the session's agent loop to completion, then invokes
    /// `on_result` exactly once. Returns immediately.
    #[instrument(skip(self, transport, on_result), fields(%session_id))]
    pub fn execute_async(
        &self,
        session_id: Uuid,
        task_name: Option<String>,
        request_text: String,
        platform: String,
        transport: Arc<dyn MessageSink>,
        on_result: ResultCallback,
    ) -> Result<Session, UnknownPlatform> {
        let snapshot =
            self.create_or_get(session_id, task_name, request_text, platform, transport)?;

        let (handle, agent) = {
            let inner = self.inner.lock().unwrap();
            let handle = inner.sessions.get(&session_id).cloned().unwrap();
            let agent = inner.factories.get(&handle.platform).cloned().unwrap();
            (handle, agent)
        };

        if handle.spawned.swap(true, Ordering::SeqCst) {
            // Already running from an earlier execute_async call with the
            // same session_id; nothing further to schedule.
            return Ok(snapshot);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_activity(handle, agent, on_result).await;
        });

        Ok(snapshot)
    }

    async fn run_activity(
        &self,
        handle: Arc<SessionHandle>,
        agent: Arc<dyn AgentLoop>,
        on_result: ResultCallback,
    ) {
        *handle.state.lock().unwrap() = SessionState::Running;

        let outcome = tokio::select! {
            biased;
            _ = handle.cancel_token.cancelled() => Outcome::Cancelled,
            result = agent.run(handle.dispatcher.clone(), &handle.request_text) => match result {
                Ok(value) => Outcome::Completed(value),
                Err(AgentLoopError::Cancelled) => Outcome::Cancelled,
                Err(AgentLoopError::Failed(detail)) => Outcome::Failed(detail),
            },
        };

        self.finalize(handle, outcome, on_result);
    }

    fn finalize(&self, handle: Arc<SessionHandle>, outcome: Outcome, on_result: ResultCallback) {
        let session_id = handle.session_id;
        let task_name = handle.task_name.clone();

        let (state, result_value, deliver) = match outcome {
            Outcome::Completed(value) => (SessionState::Completed, Some(value), true),
            Outcome::Failed(detail) => (
                SessionState::Failed,
                Some(serde_json::json!({ "error": detail })),
                true,
            ),
            Outcome::Cancelled => {
                let reason = handle
                    .cancel_reason
                    .lock()
                    .unwrap()
                    .unwrap_or(CancelReason::ManualCancel);
                let deliver = reason.delivers_callback();
                let result = deliver
                    .then(|| serde_json::json!({ "reason": reason.as_wire_str() }));
                (SessionState::Cancelled, result, deliver)
            }
        };

        handle.finish(state, None);
        info!(%session_id, ?state, "session terminated");

        let mut inner = self.inner.lock().unwrap();
        if let Some(result) = &result_value {
            inner.results.insert(
                session_id,
                SessionResult {
                    session_id,
                    task_name: task_name.clone(),
                    status: state,
                    result: Some(result.clone()),
                },
            );
        }
        drop(inner);

        if deliver {
            // §4.D step 5: on_result fires exactly once; if the caller has
            // since disconnected, `send` inside it may report SendFailed —
            // that is logged and ignored by the callback itself, never
            // propagated here.
            let status = match state {
                SessionState::Completed => "completed",
                _ => "failed",
            };
            let msg = Message::task_end(session_id, status, result_value);
            on_result(session_id, msg);
        } else {
            warn!(%session_id, "cancellation suppressed on_result delivery (originator gone)");
        }
    }

    pub fn cancel(&self, session_id: Uuid, reason: CancelReason) {
        if let Some(handle) = self.inner.lock().unwrap().sessions.get(&session_id) {
            handle.cancel(reason);
        }
    }

    pub fn get_result(&self, session_id: Uuid) -> Option<SessionResult> {
        self.inner.lock().unwrap().results.get(&session_id).cloned()
    }

    pub fn get_result_by_task(&self, task_name: &str) -> Option<SessionResult> {
        let inner = self.inner.lock().unwrap();
        let session_id = *inner.task_index.get(task_name)?;
        inner.results.get(&session_id).cloned()
    }

    /// Route an inbound `COMMAND_RESULTS` to the session's dispatcher.
    /// A `session_id` with no live session (already terminated, or never
    /// created) is silently ignored — the caller has no narrower signal to
    /// act on than what the dispatcher's own `set_result` already logs.
    pub fn deliver_command_result(&self, session_id: Uuid, response_id: Uuid, result: Value) {
        if let Some(handle) = self.inner.lock().unwrap().sessions.get(&session_id) {
            handle.dispatcher.set_result(response_id, result);
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(&session_id)
            .map(|h| h.snapshot())
    }

    pub fn remove(&self, session_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(&session_id);
        inner.results.remove(&session_id);
    }
}

enum Outcome {
    Completed(Value),
    Failed(String),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSink;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn manager_with(platform: &str, agent: Arc<dyn AgentLoop>) -> SessionManager {
        let mut factories: HashMap<String, Arc<dyn AgentLoop>> = HashMap::new();
        factories.insert(platform.to_string(), agent);
        SessionManager::new(factories)
    }

    #[tokio::test]
    async fn create_or_get_is_idempotent() {
        let mgr = manager_with("linux", Arc::new(NoopAgentLoop));
        let id = Uuid::new_v4();
        let sink: Arc<dyn MessageSink> = Arc::new(MockSink::new());
        let a = mgr
            .create_or_get(id, None, "do x".into(), "linux".into(), sink.clone())
            .unwrap();
        let b = mgr
            .create_or_get(id, Some("ignored".into()), "do y".into(), "linux".into(), sink)
            .unwrap();
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.request_text, b.request_text);
    }

    #[tokio::test]
    async fn unknown_platform_is_rejected() {
        let mgr = manager_with("linux", Arc::new(NoopAgentLoop));
        let sink: Arc<dyn MessageSink> = Arc::new(MockSink::new());
        let err = mgr
            .create_or_get(Uuid::new_v4(), None, "x".into(), "amiga".into(), sink)
            .unwrap_err();
        assert_eq!(err, UnknownPlatform("amiga".to_string()));
    }

    #[tokio::test]
    async fn successful_completion_caches_result_and_calls_back_once() {
        let mgr = manager_with("linux", Arc::new(SingleCommandAgentLoop));
        let sink = Arc::new(MockSink::new());
        let sink_dyn: Arc<dyn MessageSink> = sink.clone();
        let id = Uuid::new_v4();

        let calls = Arc::new(StdMutex::new(0));
        let calls2 = calls.clone();
        let last_msg = Arc::new(StdMutex::new(None));
        let last_msg2 = last_msg.clone();
        let callback: ResultCallback = Arc::new(move |_sid, msg| {
            *calls2.lock().unwrap() += 1;
            *last_msg2.lock().unwrap() = Some(msg);
        });

        mgr.execute_async(
            id,
            Some("t1".into()),
            "ls /tmp".into(),
            "linux".into(),
            sink_dyn,
            callback,
        )
        .unwrap();

        // Let the activity spawn and send its opening TASK_ASSIGNMENT.
        for _ in 0..50 {
            if !sink.sent_messages().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = sink.sent_messages().await;
        let Message::TaskAssignment { response_id, task_name, request, .. } =
            sent.first().cloned().unwrap()
        else {
            panic!("expected TASK_ASSIGNMENT");
        };
        assert_eq!(task_name, "t1");
        assert_eq!(request, "ls /tmp");
        let response_id: Uuid = response_id.parse().unwrap();

        let session = mgr.get(id).unwrap();
        session
            .state
            .eq(&SessionState::Running)
            .then_some(())
            .unwrap_or(());

        // Deliver the result via the dispatcher the same way the
        // connection handler would on COMMAND_RESULTS.
        let dispatcher = {
            let inner = mgr.inner.lock().unwrap();
            inner.sessions.get(&id).unwrap().dispatcher.clone()
        };
        dispatcher.set_result(response_id, serde_json::json!({"out": "file1\n"}));

        for _ in 0..50 {
            if *calls.lock().unwrap() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(*calls.lock().unwrap(), 1);
        let result = mgr.get_result_by_task("t1").unwrap();
        assert_eq!(result.status, SessionState::Completed);
        assert_eq!(result.result.unwrap(), serde_json::json!({"out": "file1\n"}));
    }

    #[tokio::test]
    async fn orchestrator_disconnected_cancellation_suppresses_callback_and_result() {
        let mgr = manager_with("linux", Arc::new(SingleCommandAgentLoop));
        let sink: Arc<dyn MessageSink> = Arc::new(MockSink::new());
        let id = Uuid::new_v4();

        let calls = Arc::new(StdMutex::new(0));
        let calls2 = calls.clone();
        let callback: ResultCallback = Arc::new(move |_sid, _msg| {
            *calls2.lock().unwrap() += 1;
        });

        mgr.execute_async(id, Some("t2".into()), "x".into(), "linux".into(), sink, callback)
            .unwrap();
        tokio::task::yield_now().await;

        mgr.cancel(id, CancelReason::OrchestratorDisconnected);

        for _ in 0..50 {
            if mgr.get(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(mgr.get_result(id).is_none());
        assert_eq!(mgr.get(id).unwrap().state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn device_disconnected_cancellation_delivers_failure_callback() {
        let mgr = manager_with("linux", Arc::new(SingleCommandAgentLoop));
        let sink: Arc<dyn MessageSink> = Arc::new(MockSink::new());
        let id = Uuid::new_v4();

        let last: Arc<StdMutex<Option<Message>>> = Arc::new(StdMutex::new(None));
        let last2 = last.clone();
        let callback: ResultCallback = Arc::new(move |_sid, msg| *last2.lock().unwrap() = Some(msg));

        mgr.execute_async(id, Some("t3".into()), "x".into(), "linux".into(), sink, callback)
            .unwrap();
        tokio::task::yield_now().await;

        mgr.cancel(id, CancelReason::DeviceDisconnected);

        for _ in 0..50 {
            if last.lock().unwrap().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }

        match last.lock().unwrap().clone().unwrap() {
            Message::TaskEnd { status, result, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(
                    result.unwrap()["reason"],
                    serde_json::json!("device_disconnected")
                );
            }
            other => panic!("expected TASK_END, got {other:?}"),
        }
    }
}
