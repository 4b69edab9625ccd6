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

//! §4.F / §6 HTTP dispatch surface. Deliberately thin: every handler here
//! validates its inputs and then defers to the registry / session manager
//! for anything non-trivial.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hub_common::RoutingError;
use hub_core::{ClientRegistry, MessageSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;

fn routing_status(err: &RoutingError) -> StatusCode {
    match err {
        RoutingError::EmptyClientId | RoutingError::EmptyTaskContent => StatusCode::BAD_REQUEST,
        RoutingError::TargetDeviceNotConnected => StatusCode::NOT_FOUND,
    }
}

fn validate_dispatch_request(body: &DispatchRequest) -> Result<(), RoutingError> {
    if body.client_id.is_empty() {
        return Err(RoutingError::EmptyClientId);
    }
    if body.request.is_empty() {
        return Err(RoutingError::EmptyTaskContent);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub client_id: String,
    pub request: String,
    #[serde(default)]
    pub task_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub status: &'static str,
    pub task_name: String,
    pub client_id: String,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    fn new(detail: impl Into<String>) -> Json<Self> {
        Json(Self { detail: detail.into() })
    }
}

pub async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, (StatusCode, Json<ErrorBody>)> {
    if let Err(err) = validate_dispatch_request(&body) {
        return Err((routing_status(&err), ErrorBody::new(err.http_detail())));
    }

    let Some(device) = state.registry.get_device(&body.client_id) else {
        let err = RoutingError::TargetDeviceNotConnected;
        return Err((routing_status(&err), ErrorBody::new(err.http_detail())));
    };

    let session_id = Uuid::new_v4();
    let task_name = body.task_name.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let device_transport = device.transport.clone();

    let on_result: hub_core::ResultCallback = Arc::new(move |session_id, msg| {
        let device_transport = device_transport.clone();
        tokio::spawn(async move {
            // §7: transport-closed during send is logged and not raised
            // further.
            if MessageSink::send(device_transport.as_ref(), msg).await.is_err() {
                debug!(%session_id, "task_end send failed, peer gone");
            }
        });
    });

    let outcome = state.sessions.execute_async(
        session_id,
        Some(task_name.clone()),
        body.request,
        device.platform.clone(),
        device.transport.clone(),
        on_result,
    );
    if let Err(err) = outcome {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new(err.to_string())));
    }
    state.registry.add_device_session(&body.client_id, session_id);

    info!(client_id = %body.client_id, %session_id, task_name, "dispatched via HTTP");

    Ok(Json(DispatchResponse {
        status: "dispatched",
        task_name,
        client_id: body.client_id,
        session_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub online_clients: Vec<String>,
}

pub async fn clients(State(state): State<AppState>) -> Json<ClientsResponse> {
    Json(ClientsResponse {
        online_clients: state.registry.list(),
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
pub enum TaskResultResponse {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "done")]
    Done { result: Option<serde_json::Value> },
}

pub async fn task_result(
    State(state): State<AppState>,
    Path(task_name): Path<String>,
) -> Json<TaskResultResponse> {
    match state.sessions.get_result_by_task(&task_name) {
        Some(result) => Json(TaskResultResponse::Done { result: result.result }),
        None => Json(TaskResultResponse::Pending),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub online_clients: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        online_clients: state.registry.list(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_common::ClientKind;
    use hub_core::{InMemoryClientRegistry, MockSink, NewClientParams, NoopAgentLoop, SessionManager};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::state::ServerConfig;

    fn state_with_device(client_id: &str) -> AppState {
        let registry: Arc<dyn hub_core::ClientRegistry> = Arc::new(InMemoryClientRegistry::new());
        registry.add(NewClientParams {
            client_id: client_id.to_string(),
            kind: ClientKind::Device,
            platform: "linux".to_string(),
            transport: Arc::new(MockSink::new()),
            metadata: Default::default(),
            system_info: None,
            overlay: None,
        });

        let mut factories: HashMap<String, std::sync::Arc<dyn hub_core::AgentLoop>> = HashMap::new();
        factories.insert("linux".to_string(), std::sync::Arc::new(NoopAgentLoop));

        AppState::new(
            registry,
            SessionManager::new(factories),
            ServerConfig {
                default_platform: "linux".to_string(),
                registration_timeout: Duration::from_secs(10),
                liveness_timeout: Duration::from_secs(30),
                device_overlay: Default::default(),
            },
        )
    }

    // S1 (dispatch half): a connected device accepts a dispatched task and
    // the response carries the fields the caller needs to poll for a result.
    #[tokio::test]
    async fn dispatch_to_connected_device_returns_dispatched() {
        let state = state_with_device("dev-A");
        let body = DispatchRequest {
            client_id: "dev-A".to_string(),
            request: "ls /tmp".to_string(),
            task_name: Some("t1".to_string()),
        };

        let response = dispatch(State(state), Json(body)).await.unwrap().0;
        assert_eq!(response.status, "dispatched");
        assert_eq!(response.task_name, "t1");
        assert_eq!(response.client_id, "dev-A");
    }

    // S2: an empty request is rejected before any session is created.
    #[tokio::test]
    async fn dispatch_with_empty_request_is_rejected() {
        let state = state_with_device("dev-A");
        let body = DispatchRequest {
            client_id: "dev-A".to_string(),
            request: String::new(),
            task_name: None,
        };

        let (status, Json(err)) = dispatch(State(state), Json(body)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err.detail, "Empty task content");
    }

    // S3: a target that was never registered, or isn't online, is "not found"
    // rather than any other failure mode.
    #[tokio::test]
    async fn dispatch_to_offline_target_is_not_found() {
        let state = state_with_device("dev-A");
        let body = DispatchRequest {
            client_id: "nobody".to_string(),
            request: "foo".to_string(),
            task_name: None,
        };

        let (status, Json(err)) = dispatch(State(state), Json(body)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail, "Client not online");
    }

    #[tokio::test]
    async fn task_result_for_unknown_task_name_is_pending_not_404() {
        let state = state_with_device("dev-A");
        let Json(response) = task_result(State(state), Path("nope".to_string())).await;
        assert!(matches!(response, TaskResultResponse::Pending));
    }

    #[tokio::test]
    async fn clients_and_health_list_online_clients() {
        let state = state_with_device("dev-A");
        let Json(clients_resp) = clients(State(state.clone())).await;
        assert_eq!(clients_resp.online_clients, vec!["dev-A".to_string()]);

        let Json(health_resp) = health(State(state)).await;
        assert_eq!(health_resp.status, "healthy");
        assert_eq!(health_resp.online_clients, vec!["dev-A".to_string()]);
    }
}
