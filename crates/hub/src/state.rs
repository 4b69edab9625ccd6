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

use std::sync::Arc;
use std::time::Duration;

use hub_common::client::DeviceOverlay;
use hub_core::{ClientRegistry, InMemoryClientRegistry, SessionManager};

/// Everything shared across connection handlers and HTTP routes. Cheaply
/// `Clone`able, the way `axum::extract::State` expects.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn ClientRegistry>,
    pub sessions: SessionManager,
    pub config: Arc<ServerConfig>,
}

/// Process-wide knobs, all sourced from CLI flags (§6 "Environment / startup
/// flags"). None of these affect the protocol's semantics, only its bindings.
pub struct ServerConfig {
    pub default_platform: String,
    pub registration_timeout: Duration,
    pub liveness_timeout: Duration,
    /// §4.C "Metadata merge rule": applied to every device's self-reported
    /// `system_info` at registration time.
    pub device_overlay: DeviceOverlay,
}

impl AppState {
    pub fn new(registry: Arc<dyn ClientRegistry>, sessions: SessionManager, config: ServerConfig) -> Self {
        Self {
            registry,
            sessions,
            config: Arc::new(config),
        }
    }
}

pub fn default_registry() -> Arc<dyn ClientRegistry> {
    Arc::new(InMemoryClientRegistry::new())
}
