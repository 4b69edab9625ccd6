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
use std::collections::HashMap;

/// What kind of peer is on the other end of a connection.
///
/// A `Device` executes tasks locally; a `Constellation` orchestrates tasks
/// across one or more devices by targeting their `client_id`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Device,
    Constellation,
}

impl ClientKind {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ClientKind::Device => "device",
            ClientKind::Constellation => "constellation",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "device" => Some(ClientKind::Device),
            "constellation" => Some(ClientKind::Constellation),
            _ => None,
        }
    }
}

/// A free-form key/value bag, as supplied at registration (`metadata`) or
/// merged from device-reported capabilities (`system_info`).
pub type AttributeBag = HashMap<String, serde_json::Value>;

/// Server-side overlay applied to a device's self-reported `system_info` at
/// registration time (§4.C "Metadata merge rule").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverlay {
    /// Injected verbatim as `system_info.custom_metadata`.
    #[serde(default)]
    pub custom_metadata: AttributeBag,
    /// Unioned into `system_info.supported_features`.
    #[serde(default)]
    pub additional_features: Vec<String>,
    /// Replaces `system_info.tags` outright, when present.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Auto-detected scalar fields the overlay must never override.
pub const PROTECTED_SCALAR_FIELDS: &[&str] = &["os", "memory", "resolution"];

/// Apply the merge rule from §4.C: `merged = system_info ∪ {custom_metadata
/// := overlay.custom_metadata}`, with `supported_features` unioned and
/// `tags` replaced only when the overlay supplies them. Auto-detected
/// scalar fields in `PROTECTED_SCALAR_FIELDS` are never overwritten by the
/// overlay even if present under the same key.
pub fn merge_system_info(
    mut system_info: AttributeBag,
    overlay: &DeviceOverlay,
) -> AttributeBag {
    system_info.insert(
        "custom_metadata".to_string(),
        serde_json::to_value(&overlay.custom_metadata).unwrap_or(serde_json::Value::Null),
    );

    let mut features: Vec<String> = system_info
        .get("supported_features")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    for f in &overlay.additional_features {
        if !features.contains(f) {
            features.push(f.clone());
        }
    }
    system_info.insert(
        "supported_features".to_string(),
        serde_json::to_value(features).unwrap(),
    );

    if let Some(tags) = &overlay.tags {
        system_info.insert(
            "tags".to_string(),
            serde_json::to_value(tags).unwrap(),
        );
    }

    system_info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_string() {
        assert_eq!(ClientKind::from_wire_str("device"), Some(ClientKind::Device));
        assert_eq!(
            ClientKind::from_wire_str("constellation"),
            Some(ClientKind::Constellation)
        );
        assert_eq!(ClientKind::from_wire_str("robot"), None);
    }

    #[test]
    fn merge_unions_features_and_preserves_scalars() {
        let mut system_info = AttributeBag::new();
        system_info.insert("os".to_string(), serde_json::json!("linux"));
        system_info.insert(
            "supported_features".to_string(),
            serde_json::json!(["screenshot"]),
        );

        let overlay = DeviceOverlay {
            custom_metadata: AttributeBag::from([(
                "fleet".to_string(),
                serde_json::json!("prod"),
            )]),
            additional_features: vec!["clipboard".to_string(), "screenshot".to_string()],
            tags: Some(vec!["edge".to_string()]),
        };

        let merged = merge_system_info(system_info, &overlay);

        assert_eq!(merged["os"], serde_json::json!("linux"));
        let mut features = merged["supported_features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        features.sort();
        assert_eq!(features, vec!["clipboard", "screenshot"]);
        assert_eq!(merged["tags"], serde_json::json!(["edge"]));
        assert_eq!(merged["custom_metadata"]["fleet"], serde_json::json!("prod"));
    }

    #[test]
    fn overlay_without_tags_leaves_system_info_tags_untouched() {
        let mut system_info = AttributeBag::new();
        system_info.insert("tags".to_string(), serde_json::json!(["original"]));
        let overlay = DeviceOverlay::default();
        let merged = merge_system_info(system_info, &overlay);
        assert_eq!(merged["tags"], serde_json::json!(["original"]));
    }
}
