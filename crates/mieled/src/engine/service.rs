//! Service calls routed from the API to integrations.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Entity and device selectors for a service call.
///
/// Each field accepts either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, deserialize_with = "one_or_many")]
    pub entity_id: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub device_id: Vec<String>,
}

impl Target {
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty() && self.device_id.is_empty()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A request to invoke `domain.service` on a set of targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub target: Target,
    pub data: Map<String, Value>,
}

impl ServiceCall {
    /// Build a call from a request body.
    ///
    /// `entity_id` and `device_id` are lifted out of the body into the
    /// target; everything else is passed to the service as data.
    pub fn from_body(
        domain: impl Into<String>,
        service: impl Into<String>,
        mut body: Map<String, Value>,
    ) -> Result<Self, ServiceError> {
        let mut selectors = Map::new();
        for key in ["entity_id", "device_id"] {
            if let Some(value) = body.remove(key) {
                selectors.insert(key.to_string(), value);
            }
        }
        let target: Target = serde_json::from_value(Value::Object(selectors))
            .map_err(|e| ServiceError::InvalidData(format!("invalid target: {}", e)))?;

        Ok(Self {
            domain: domain.into(),
            service: service.into(),
            target,
            data: body,
        })
    }
}

/// Outcome of a successful service call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServiceResponse {
    /// Device IDs the command was delivered to.
    pub dispatched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("unknown service: {domain}.{service}")]
    UnknownService { domain: String, service: String },

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("authorization expired")]
    AuthExpired,

    #[error("{0}")]
    Failed(String),
}

pub type ServiceResult = Result<ServiceResponse, ServiceError>;
