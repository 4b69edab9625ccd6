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

//! §4.C Client registry: the authoritative directory of connections plus
//! the two session-index side-maps. Map-based indices rather than
//! back-pointers on `Session`, per §9's design note — drains return id
//! lists the caller uses to look up and cancel.
//!
//! All mutation goes through one `Mutex<Inner>`, matching the teacher's
//! `ConnectionRegistryMemory` (`Arc<Mutex<Inner>>`): §5 requires the three
//! tables be mutated under one lock discipline, and none of the critical
//! sections here ever `.await`, so a std `Mutex` is the right tool (no risk
//! of holding it across a suspension point).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use hub_common::client::{merge_system_info, AttributeBag, DeviceOverlay};
use hub_common::ClientKind;
use uuid::Uuid;

use crate::client::Client;
use crate::transport::MessageSink;

/// Parameters for `ClientRegistry::add`.
pub struct NewClientParams {
    pub client_id: String,
    pub kind: ClientKind,
    pub platform: String,
    pub transport: Arc<dyn MessageSink>,
    pub metadata: AttributeBag,
    /// Devices only. Merged with `overlay` per §4.C's merge rule.
    pub system_info: Option<AttributeBag>,
    pub overlay: Option<DeviceOverlay>,
}

/// Result of `add`: whether a prior client under the same id was evicted.
/// The caller (the connection handler) is responsible for draining and
/// cancelling the evicted client's sessions — the registry does not do
/// this itself, so that eviction and cancellation remain atomic from the
/// caller's point of view (§4.E "Registered" on successful re-registration,
/// and S6 in §8).
pub enum AddOutcome {
    Added,
    Evicted(Client),
}

pub trait ClientRegistry: Send + Sync {
    fn add(&self, params: NewClientParams) -> AddOutcome;
    fn get(&self, client_id: &str) -> Option<Client>;
    /// Returns a client iff present AND `kind == Device`. The only form of
    /// existence check permitted before a task dispatch (§4.C).
    fn get_device(&self, client_id: &str) -> Option<Client>;
    fn remove(&self, client_id: &str) -> Option<Client>;
    fn list(&self) -> Vec<String>;

    fn add_orchestrator_session(&self, client_id: &str, session_id: Uuid);
    fn add_device_session(&self, device_id: &str, session_id: Uuid);
    /// Remove and return, atomically, so the caller can process the drained
    /// ids without a second party racing to re-add under this client_id.
    fn drain_orchestrator_sessions(&self, client_id: &str) -> Vec<Uuid>;
    fn drain_device_sessions(&self, device_id: &str) -> Vec<Uuid>;

    fn device_system_info(&self, device_id: &str) -> Option<AttributeBag>;
}

struct Inner {
    clients: HashMap<String, Client>,
    orchestrator_sessions: HashMap<String, HashSet<Uuid>>,
    device_sessions: HashMap<String, HashSet<Uuid>>,
}

/// In-memory implementation. The spec's Non-goals rule out cross-restart
/// persistence entirely ("sessions are ephemeral"), so unlike the teacher's
/// `ConnectionRegistryMemory` there is no pluggable persistence backend
/// here — this *is* the registry, not one of several storage strategies.
pub struct InMemoryClientRegistry {
    inner: Mutex<Inner>,
}

impl InMemoryClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                orchestrator_sessions: HashMap::new(),
                device_sessions: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn add(&self, params: NewClientParams) -> AddOutcome {
        let system_info = match (&params.kind, params.system_info, &params.overlay) {
            (ClientKind::Device, Some(info), Some(overlay)) => merge_system_info(info, overlay),
            (ClientKind::Device, Some(info), None) => info,
            (ClientKind::Device, None, Some(overlay)) => {
                merge_system_info(AttributeBag::new(), overlay)
            }
            _ => AttributeBag::new(),
        };

        let client = Client {
            client_id: params.client_id.clone(),
            kind: params.kind,
            platform: params.platform,
            connected_at: SystemTime::now(),
            metadata: params.metadata,
            system_info,
            transport: params.transport,
        };

        let mut inner = self.inner.lock().unwrap();
        let prior = inner.clients.insert(params.client_id, client);
        match prior {
            Some(prior) => AddOutcome::Evicted(prior),
            None => AddOutcome::Added,
        }
    }

    fn get(&self, client_id: &str) -> Option<Client> {
        self.inner.lock().unwrap().clients.get(client_id).cloned()
    }

    fn get_device(&self, client_id: &str) -> Option<Client> {
        self.get(client_id).filter(|c| c.is_device())
    }

    fn remove(&self, client_id: &str) -> Option<Client> {
        self.inner.lock().unwrap().clients.remove(client_id)
    }

    fn list(&self) -> Vec<String> {
        self.inner.lock().unwrap().clients.keys().cloned().collect()
    }

    fn add_orchestrator_session(&self, client_id: &str, session_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .orchestrator_sessions
            .entry(client_id.to_string())
            .or_default()
            .insert(session_id);
    }

    fn add_device_session(&self, device_id: &str, session_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .device_sessions
            .entry(device_id.to_string())
            .or_default()
            .insert(session_id);
    }

    fn drain_orchestrator_sessions(&self, client_id: &str) -> Vec<Uuid> {
        self.inner
            .lock()
            .unwrap()
            .orchestrator_sessions
            .remove(client_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    fn drain_device_sessions(&self, device_id: &str) -> Vec<Uuid> {
        self.inner
            .lock()
            .unwrap()
            .device_sessions
            .remove(device_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    fn device_system_info(&self, device_id: &str) -> Option<AttributeBag> {
        self.get_device(device_id).map(|c| c.system_info)
    }
}
