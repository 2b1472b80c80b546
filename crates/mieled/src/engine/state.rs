use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::entity::EntityInfo;

/// Primary value of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl From<bool> for EntityValue {
    fn from(value: bool) -> Self {
        EntityValue::Bool(value)
    }
}

impl From<i64> for EntityValue {
    fn from(value: i64) -> Self {
        EntityValue::Integer(value)
    }
}

impl From<f64> for EntityValue {
    fn from(value: f64) -> Self {
        EntityValue::Number(value)
    }
}

impl From<String> for EntityValue {
    fn from(value: String) -> Self {
        EntityValue::Text(value)
    }
}

impl From<&str> for EntityValue {
    fn from(value: &str) -> Self {
        EntityValue::Text(value.to_string())
    }
}

/// Current state of a single entity.
///
/// A `None` value means the state is unknown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub value: Option<EntityValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EntityState {
    pub fn new(value: Option<EntityValue>) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: Option<&str>) -> Self {
        self.unit = unit.map(str::to_string);
        self
    }
}

/// An entity as tracked by the engine: its metadata and latest state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub integration: String,
    #[serde(flatten)]
    pub info: EntityInfo,
    pub state: EntityState,
}

/// Centralized snapshot of the entire engine state, keyed by entity ID.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: BTreeMap<String, EntityRecord>,
}
