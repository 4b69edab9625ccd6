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

use serde::{Deserialize, Serialize};

/// A task execution context's lifecycle state (§3 "Session").
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: a session in one of
/// those states never transitions again (invariant in §3/§8.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// The wire `status` string used in `TASK_END` (§6).
    pub fn as_task_end_status(&self) -> &'static str {
        match self {
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
            SessionState::Created | SessionState::Running => {
                unreachable!("TASK_END only synthesized for terminal states")
            }
        }
    }
}

/// Why a session's background activity was cancelled (§3, §4.D).
///
/// `DeviceReported` is this implementation's resolution of Open Question 3
/// in §9: a device-originated `TASK_END` is treated as an advisory
/// termination signal rather than authoritative completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    DeviceDisconnected,
    OrchestratorDisconnected,
    ManualCancel,
    Timeout,
    DeviceReported,
}

impl CancelReason {
    /// Whether `on_result` should still be invoked when a session is
    /// cancelled for this reason (§4.D's cancellation policy table).
    pub fn delivers_callback(&self) -> bool {
        !matches!(self, CancelReason::OrchestratorDisconnected)
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            CancelReason::DeviceDisconnected => "device_disconnected",
            CancelReason::OrchestratorDisconnected => "orchestrator_disconnected",
            CancelReason::ManualCancel => "manual_cancel",
            CancelReason::Timeout => "timeout",
            CancelReason::DeviceReported => "device_reported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_orchestrator_disconnected_suppresses_callback() {
        assert!(!CancelReason::OrchestratorDisconnected.delivers_callback());
        assert!(CancelReason::DeviceDisconnected.delivers_callback());
        assert!(CancelReason::ManualCancel.delivers_callback());
        assert!(CancelReason::Timeout.delivers_callback());
        assert!(CancelReason::DeviceReported.delivers_callback());
    }

    #[test]
    fn terminal_states_are_exactly_completed_failed_cancelled() {
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }
}
