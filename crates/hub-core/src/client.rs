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
use std::time::SystemTime;

use hub_common::ClientKind;
use hub_common::client::AttributeBag;

use crate::transport::MessageSink;

/// A connected peer (§3 "Client"). Owns exactly one transport handle; the
/// registry hands out clones of this struct (the transport handle is
/// `Arc`'d) rather than references, so callers can route a message to a
/// client without holding the registry lock while they do it.
#[derive(Clone)]
pub struct Client {
    pub client_id: String,
    pub kind: ClientKind,
    pub platform: String,
    pub connected_at: SystemTime,
    pub metadata: AttributeBag,
    /// Richer key/value bag: OS, resolution, installed apps, capabilities,
    /// tags. Devices only; empty for constellations.
    pub system_info: AttributeBag,
    pub transport: Arc<dyn MessageSink>,
}

impl Client {
    pub fn is_device(&self) -> bool {
        self.kind == ClientKind::Device
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("kind", &self.kind)
            .field("platform", &self.platform)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
