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

//! §4.E Connection handler: one instance per accepted WebSocket, running
//! the AwaitingRegister → Registered → CleaningUp state machine. Mirrors
//! the teacher's `WebSocketConnection::handle` command-dispatch loop
//! (`crates/web-host/src/host/ws_connection.rs`), generalized from one
//! `select!` arm per event source to one `match` arm per wire message type.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::StreamExt;
use hub_common::client::AttributeBag;
use hub_common::{CancelReason, ClientKind, Message, ProtocolError, RoutingError};
use hub_core::{AddOutcome, ClientRegistry, MessageSink, NewClientParams};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::AxumSink;

pub async fn run(state: AppState, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let transport: Arc<dyn MessageSink> = Arc::new(AxumSink::new(sink));

    let Some((client_id, _kind)) = await_register(&state, &transport, &mut stream).await else {
        return;
    };

    registered_loop(&state, &transport, &mut stream, &client_id).await;
    clean_up(&state, &client_id).await;
}

/// AwaitingRegister: accept exactly one inbound message, which must be a
/// valid `REGISTER`. Returns `None` on timeout, malformed input, or a
/// rejected registration — in all of those cases the connection is already
/// closed and there's nothing further for the caller to do.
async fn await_register(
    state: &AppState,
    transport: &Arc<dyn MessageSink>,
    stream: &mut (impl futures_util::Stream<Item = Result<WsMessage, axum::Error>> + Unpin),
) -> Option<(String, ClientKind)> {
    let first = tokio::time::timeout(state.config.registration_timeout, stream.next()).await;

    let msg = match first {
        Ok(Some(Ok(WsMessage::Text(text)))) => parse_message(&text),
        _ => {
            warn!("registration timed out or connection closed before REGISTER");
            return None;
        }
    };

    let Some(Message::Register {
        client_id,
        client_type,
        platform,
        metadata,
        target_id,
    }) = msg
    else {
        let _ = transport
            .send(Message::RegisterError {
                detail: ProtocolError::NotRegisteredYet.to_string(),
            })
            .await;
        return None;
    };

    if client_id.is_empty() {
        let _ = transport
            .send(Message::RegisterError {
                detail: ProtocolError::EmptyClientId.to_string(),
            })
            .await;
        return None;
    }

    let Some(kind) = ClientKind::from_wire_str(&client_type) else {
        let _ = transport
            .send(Message::RegisterError {
                detail: format!("unknown client_type {client_type:?}"),
            })
            .await;
        return None;
    };

    if kind == ClientKind::Constellation {
        if let Some(target) = &target_id {
            if state.registry.get_device(target).is_none() {
                let _ = transport
                    .send(Message::RegisterError {
                        detail: RoutingError::TargetDeviceNotConnected.to_string(),
                    })
                    .await;
                return None;
            }
        }
    }

    let metadata_bag: AttributeBag = metadata
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    // REGISTER carries one free-form bag on the wire; for a device it
    // doubles as the self-reported system_info the merge rule (§4.C)
    // overlays, since there is no separate wire field for it.
    let (system_info, overlay) = match kind {
        ClientKind::Device => (
            Some(metadata_bag.clone()),
            Some(state.config.device_overlay.clone()),
        ),
        ClientKind::Constellation => (None, None),
    };

    let outcome = state.registry.add(NewClientParams {
        client_id: client_id.clone(),
        kind,
        platform,
        transport: transport.clone(),
        metadata: metadata_bag,
        system_info,
        overlay,
    });

    if let AddOutcome::Evicted(prior) = outcome {
        info!(client_id = %client_id, "registration evicted a prior connection under this id");
        cancel_and_drain(state, &prior.client_id, prior.kind).await;
        prior.transport.close();
    }

    let _ = transport
        .send(Message::RegisterConfirm {
            client_id: client_id.clone(),
        })
        .await;
    info!(client_id = %client_id, ?kind, "registered");
    Some((client_id, kind))
}

/// Registered: the single inbound dispatch loop. Each inbound message
/// resets the liveness timer (the `timeout` wrapping every `stream.next()`
/// call is recreated every iteration, which *is* resetting it — the spec
/// imposes no further distinction between "reset on message" and "a fresh
/// deadline measured from the last message").
#[instrument(skip_all, fields(%client_id))]
async fn registered_loop(
    state: &AppState,
    transport: &Arc<dyn MessageSink>,
    stream: &mut (impl futures_util::Stream<Item = Result<WsMessage, axum::Error>> + Unpin),
    client_id: &str,
) {
    loop {
        let next = tokio::time::timeout(state.config.liveness_timeout, stream.next()).await;
        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "websocket stream error");
                break;
            }
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(_) => {
                debug!("liveness timeout expired");
                break;
            }
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let Some(msg) = parse_message(&text) else {
            let detail = ProtocolError::Malformed("invalid JSON or unknown type".to_string());
            let _ = transport.send(Message::error(detail.to_string())).await;
            continue;
        };

        dispatch(state, transport, client_id, msg).await;
    }
}

async fn dispatch(state: &AppState, transport: &Arc<dyn MessageSink>, client_id: &str, msg: Message) {
    match msg {
        Message::Heartbeat { timestamp } => {
            let _ = transport.send(Message::HeartbeatAck { timestamp }).await;
        }

        Message::Task {
            session_id,
            task_name,
            request,
            target_id: None,
            ..
        } => {
            let session_id = session_id
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(Uuid::new_v4);
            let own_transport: Arc<dyn MessageSink> = transport.clone();
            let outcome = state.sessions.execute_async(
                session_id,
                task_name,
                request,
                state.config.default_platform.clone(),
                own_transport.clone(),
                on_result_to(own_transport),
            );
            if let Err(err) = outcome {
                let _ = transport.send(Message::error(err.to_string())).await;
                return;
            }
            state.registry.add_device_session(client_id, session_id);
            let _ = transport.send(Message::Ack { session_id: session_id.to_string() }).await;
        }

        Message::Task {
            session_id,
            task_name,
            request,
            target_id: Some(target_id),
            ..
        } => {
            let Some(target) = state.registry.get_device(&target_id) else {
                let detail = RoutingError::TargetDeviceNotConnected.to_string();
                let _ = transport.send(Message::error(detail)).await;
                return;
            };
            let session_id = session_id
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(Uuid::new_v4);

            let orchestrator_transport: Arc<dyn MessageSink> = transport.clone();
            let device_transport = target.transport.clone();
            let on_result = on_result_to_both(orchestrator_transport, device_transport.clone());

            let result = state.sessions.execute_async(
                session_id,
                task_name,
                request,
                target.platform.clone(),
                device_transport,
                on_result,
            );
            if let Err(err) = result {
                let _ = transport.send(Message::error(err.to_string())).await;
                return;
            }
            state.registry.add_orchestrator_session(client_id, session_id);
            state.registry.add_device_session(&target_id, session_id);
            let _ = transport.send(Message::Ack { session_id: session_id.to_string() }).await;
        }

        Message::CommandResults { session_id, prev_response_id, payload } => {
            if let (Ok(session_id), Ok(response_id)) =
                (session_id.parse(), prev_response_id.parse())
            {
                state.sessions.deliver_command_result(session_id, response_id, payload);
            }
        }

        Message::TaskEnd { session_id, .. } => {
            // Open Question 3's resolution: a device-originated TASK_END is
            // advisory, not authoritative. Route it through the ordinary
            // cancellation path so the orchestrator still gets a synthesized
            // TASK_END, rather than trusting the device's own payload.
            if let Ok(session_id) = session_id.parse() {
                state.sessions.cancel(session_id, CancelReason::DeviceReported);
            }
        }

        Message::DeviceInfoRequest { target_id, request_id } => {
            let system_info = state
                .registry
                .device_system_info(&target_id)
                .map(|bag| serde_json::to_value(bag).unwrap_or_default())
                .unwrap_or_else(|| serde_json::json!({}));
            let _ = transport
                .send(Message::DeviceInfoResponse { request_id, system_info })
                .await;
        }

        Message::Error { detail, .. } => {
            warn!(client_id, %detail, "peer reported error");
        }

        Message::Register { .. } => {
            let _ = transport
                .send(Message::error(ProtocolError::DuplicateRegister.to_string()))
                .await;
        }

        other => {
            let detail = ProtocolError::UnknownMessageType(other.type_name().to_string());
            let _ = transport.send(Message::error(detail.to_string())).await;
        }
    }
}

fn on_result_to(transport: Arc<dyn MessageSink>) -> hub_core::ResultCallback {
    Arc::new(move |session_id, msg| {
        let transport = transport.clone();
        tokio::spawn(async move {
            // §7: transport-closed during send is logged and not raised
            // further — the originator is already headed through its own
            // disconnect cleanup.
            if transport.send(msg).await.is_err() {
                debug!(%session_id, "task_end send failed, peer gone");
            }
        });
    })
}

fn on_result_to_both(
    orchestrator: Arc<dyn MessageSink>,
    device: Arc<dyn MessageSink>,
) -> hub_core::ResultCallback {
    Arc::new(move |session_id, msg| {
        let orchestrator = orchestrator.clone();
        let device = device.clone();
        tokio::spawn(async move {
            if orchestrator.send(msg.clone()).await.is_err() {
                debug!(%session_id, "task_end send to orchestrator failed, peer gone");
            }
            if device.send(msg).await.is_err() {
                debug!(%session_id, "task_end send to device failed, peer gone");
            }
        });
    })
}

/// CleaningUp: drain both session indices for `client_id`, cancel every
/// drained session with the reason matching this client's kind, remove the
/// registry entry. Draining before removing means no new session can be
/// added under this id in the window (§4.E ordering note).
async fn clean_up(state: &AppState, client_id: &str) {
    let Some(client) = state.registry.get(client_id) else {
        return;
    };
    cancel_and_drain(state, client_id, client.kind).await;
    if let Some(removed) = state.registry.remove(client_id) {
        removed.transport.close();
    }
}

async fn cancel_and_drain(state: &AppState, client_id: &str, kind: ClientKind) {
    let reason = match kind {
        ClientKind::Device => CancelReason::DeviceDisconnected,
        ClientKind::Constellation => CancelReason::OrchestratorDisconnected,
    };
    let mut sessions = state.registry.drain_orchestrator_sessions(client_id);
    sessions.extend(state.registry.drain_device_sessions(client_id));
    for session_id in sessions {
        state.sessions.cancel(session_id, reason);
    }
}

fn parse_message(text: &str) -> Option<Message> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{InMemoryClientRegistry, MockSink, NewClientParams, SingleCommandAgentLoop};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::state::ServerConfig;

    fn test_state() -> AppState {
        let mut factories: HashMap<String, Arc<dyn hub_core::AgentLoop>> = HashMap::new();
        factories.insert("linux".to_string(), Arc::new(SingleCommandAgentLoop));
        AppState::new(
            Arc::new(InMemoryClientRegistry::new()),
            hub_core::SessionManager::new(factories),
            ServerConfig {
                default_platform: "linux".to_string(),
                registration_timeout: Duration::from_secs(10),
                liveness_timeout: Duration::from_secs(30),
                device_overlay: Default::default(),
            },
        )
    }

    fn register(state: &AppState, client_id: &str, kind: ClientKind) -> Arc<MockSink> {
        let sink = Arc::new(MockSink::new());
        state.registry.add(NewClientParams {
            client_id: client_id.to_string(),
            kind,
            platform: "linux".to_string(),
            transport: sink.clone(),
            metadata: Default::default(),
            system_info: None,
            overlay: None,
        });
        sink
    }

    /// Poll `sink` until it holds at least one message matching `pred`, or
    /// panic after a generous number of scheduler yields. Session
    /// background activities run on separately spawned tasks, so tests
    /// observe their effects asynchronously rather than immediately after
    /// the triggering call returns.
    async fn wait_for_message(sink: &MockSink, pred: impl Fn(&Message) -> bool) -> Message {
        for _ in 0..500 {
            if let Some(msg) = sink.sent_messages().await.iter().find(|m| pred(m)).cloned() {
                return msg;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected message never arrived");
    }

    // S6: a second REGISTER under the same client_id evicts the first,
    // closes its transport, and cancels its sessions.
    #[tokio::test]
    async fn reregistration_evicts_prior_connection_and_cancels_its_sessions() {
        let state = test_state();
        let prior_sink = register(&state, "dev-A", ClientKind::Device);
        let session_id = Uuid::new_v4();
        state.registry.add_device_session("dev-A", session_id);
        state.sessions.create_or_get(
            session_id,
            Some("t1".into()),
            "x".into(),
            "linux".into(),
            prior_sink.clone(),
        ).unwrap();

        let new_sink: Arc<dyn MessageSink> = Arc::new(MockSink::new());
        let register_msg = serde_json::to_string(&Message::Register {
            client_id: "dev-A".to_string(),
            client_type: "device".to_string(),
            platform: "linux".to_string(),
            metadata: None,
            target_id: None,
        })
        .unwrap();
        let mut stream = futures_util::stream::iter(vec![Ok(WsMessage::Text(register_msg.into()))]);

        let result = await_register(&state, &new_sink, &mut stream).await;
        assert_eq!(result, Some(("dev-A".to_string(), ClientKind::Device)));

        assert!(prior_sink.is_closed());
        assert_eq!(state.registry.list(), vec!["dev-A".to_string()]);
        assert!(state.registry.drain_device_sessions("dev-A").is_empty());
    }

    // S4: a device disconnecting mid-task cancels the session with
    // DeviceDisconnected and the orchestrator still gets a TASK_END.
    #[tokio::test]
    async fn device_disconnect_mid_task_notifies_orchestrator() {
        let state = test_state();
        let orchestrator_sink = register(&state, "orc-1", ClientKind::Constellation);
        register(&state, "dev-A", ClientKind::Device);

        let orchestrator_transport: Arc<dyn MessageSink> = orchestrator_sink.clone();
        dispatch(
            &state,
            &orchestrator_transport,
            "orc-1",
            Message::Task {
                session_id: None,
                task_name: Some("t2".into()),
                request: "x".into(),
                target_id: Some("dev-A".to_string()),
                request_id: None,
            },
        )
        .await;

        let ack = wait_for_message(&orchestrator_sink, |m| matches!(m, Message::Ack { .. })).await;
        assert!(matches!(ack, Message::Ack { .. }));

        clean_up(&state, "dev-A").await;

        let task_end =
            wait_for_message(&orchestrator_sink, |m| matches!(m, Message::TaskEnd { .. })).await;
        match task_end {
            Message::TaskEnd { status, result, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(
                    result.unwrap()["reason"],
                    serde_json::json!("device_disconnected")
                );
            }
            _ => unreachable!(),
        }
    }

    // S5: an orchestrator disconnecting suppresses TASK_END delivery
    // entirely — nobody is notified of the cancelled session.
    #[tokio::test]
    async fn orchestrator_disconnect_suppresses_task_end() {
        let state = test_state();
        let orchestrator_sink = register(&state, "orc-1", ClientKind::Constellation);
        let device_sink = register(&state, "dev-A", ClientKind::Device);

        let orchestrator_transport: Arc<dyn MessageSink> = orchestrator_sink.clone();
        dispatch(
            &state,
            &orchestrator_transport,
            "orc-1",
            Message::Task {
                session_id: None,
                task_name: Some("t3".into()),
                request: "x".into(),
                target_id: Some("dev-A".to_string()),
                request_id: None,
            },
        )
        .await;
        wait_for_message(&orchestrator_sink, |m| matches!(m, Message::Ack { .. })).await;

        clean_up(&state, "orc-1").await;

        // Give the background activity's finalize a chance to run if it
        // were (incorrectly) going to deliver anything.
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }

        let orchestrator_sent = orchestrator_sink.sent_messages().await;
        assert!(!orchestrator_sent.iter().any(|m| matches!(m, Message::TaskEnd { .. })));
        let device_sent = device_sink.sent_messages().await;
        assert!(!device_sent.iter().any(|m| matches!(m, Message::TaskEnd { .. })));
        assert!(state.registry.drain_orchestrator_sessions("orc-1").is_empty());
    }
}
