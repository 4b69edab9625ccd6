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

//! The wire message taxonomy (§6). `Message` is a tagged union discriminated
//! on a `type` field, exactly the shape the design notes (§9) call for.
//! Every variant here corresponds to a row in §6's message table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A message exchanged over a client's persistent connection.
///
/// Deserialization is tolerant of unknown fields (extra fields on a known
/// type are ignored) but not of unknown `type` discriminators — those
/// surface as `ProtocolError::UnknownMessageType` so the connection handler
/// can apply §4.B's "must be surfaced, not silently dropped" rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "REGISTER")]
    Register {
        client_id: String,
        client_type: String,
        platform: String,
        #[serde(default)]
        metadata: Option<Value>,
        #[serde(default)]
        target_id: Option<String>,
    },
    #[serde(rename = "REGISTER_CONFIRM")]
    RegisterConfirm { client_id: String },
    #[serde(rename = "REGISTER_ERROR")]
    RegisterError { detail: String },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    #[serde(rename = "HEARTBEAT_ACK")]
    HeartbeatAck {
        #[serde(default)]
        timestamp: Option<f64>,
    },

    #[serde(rename = "TASK")]
    Task {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        task_name: Option<String>,
        request: String,
        #[serde(default)]
        target_id: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(rename = "TASK_ASSIGNMENT")]
    TaskAssignment {
        session_id: String,
        response_id: String,
        task_name: String,
        request: String,
        #[serde(default)]
        prev_response_id: Option<String>,
    },
    #[serde(rename = "ACK")]
    Ack { session_id: String },

    #[serde(rename = "COMMAND")]
    Command {
        session_id: String,
        response_id: String,
        payload: Value,
    },
    #[serde(rename = "COMMAND_RESULTS")]
    CommandResults {
        session_id: String,
        prev_response_id: String,
        payload: Value,
    },
    #[serde(rename = "TASK_END")]
    TaskEnd {
        session_id: String,
        status: String,
        #[serde(default)]
        result: Option<Value>,
    },

    #[serde(rename = "DEVICE_INFO_REQUEST")]
    DeviceInfoRequest {
        target_id: String,
        request_id: String,
    },
    #[serde(rename = "DEVICE_INFO_RESPONSE")]
    DeviceInfoResponse {
        request_id: String,
        system_info: Value,
    },

    #[serde(rename = "ERROR")]
    Error {
        detail: String,
        #[serde(default)]
        session_id: Option<String>,
    },
}

impl Message {
    /// The uppercase-snake `type` discriminator, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Register { .. } => "REGISTER",
            Message::RegisterConfirm { .. } => "REGISTER_CONFIRM",
            Message::RegisterError { .. } => "REGISTER_ERROR",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::HeartbeatAck { .. } => "HEARTBEAT_ACK",
            Message::Task { .. } => "TASK",
            Message::TaskAssignment { .. } => "TASK_ASSIGNMENT",
            Message::Ack { .. } => "ACK",
            Message::Command { .. } => "COMMAND",
            Message::CommandResults { .. } => "COMMAND_RESULTS",
            Message::TaskEnd { .. } => "TASK_END",
            Message::DeviceInfoRequest { .. } => "DEVICE_INFO_REQUEST",
            Message::DeviceInfoResponse { .. } => "DEVICE_INFO_RESPONSE",
            Message::Error { .. } => "ERROR",
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Message::Error {
            detail: detail.into(),
            session_id: None,
        }
    }

    pub fn error_for_session(session_id: Uuid, detail: impl Into<String>) -> Self {
        Message::Error {
            detail: detail.into(),
            session_id: Some(session_id.to_string()),
        }
    }

    pub fn task_end(session_id: Uuid, status: &'static str, result: Option<Value>) -> Self {
        Message::TaskEnd {
            session_id: session_id.to_string(),
            status: status.to_string(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_round_trips_with_optional_fields_absent() {
        let json = r#"{"type":"REGISTER","client_id":"dev-A","client_type":"device","platform":"linux"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            Message::Register {
                client_id: "dev-A".to_string(),
                client_type: "device".to_string(),
                platform: "linux".to_string(),
                metadata: None,
                target_id: None,
            }
        );
    }

    #[test]
    fn unknown_type_fails_to_deserialize() {
        let json = r#"{"type":"FROBNICATE","foo":"bar"}"#;
        let result: Result<Message, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn command_results_round_trips() {
        let msg = Message::CommandResults {
            session_id: "s1".to_string(),
            prev_response_id: "r1".to_string(),
            payload: serde_json::json!({"ok": true}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn task_end_status_matches_terminal_state() {
        use crate::session::SessionState;
        let msg = Message::task_end(Uuid::nil(), SessionState::Failed.as_task_end_status(), None);
        match msg {
            Message::TaskEnd { status, .. } => assert_eq!(status, "failed"),
            _ => panic!("expected TaskEnd"),
        }
    }
}
