//! Entity metadata shared between integrations and the engine.

use serde::Deserialize;
use serde::Serialize;

/// Platform (namespace) an entity belongs to.
///
/// Stable IDs are unique within a platform, and the persisted registry is
/// keyed by platform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Sensor,
    BinarySensor,
    Fan,
    Light,
    DeviceTracker,
}

/// Descriptive metadata for an entity, sent once on discovery and again
/// whenever it changes (for example after a device rename).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInfo {
    pub entity_id: String,
    pub unique_id: String,
    pub platform: Platform,
    pub name: String,
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
}

/// Public entity ID for a stable ID within a platform.
pub fn entity_id_for(platform: Platform, unique_id: &str) -> String {
    format!("{}.{}", platform, unique_id.to_lowercase())
}
