//! Normalized device records and their typed state facets.
//!
//! The device listing is kept as raw JSON per device (`state`) and decoded
//! facet by facet on demand, so one malformed facet never hides the others.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use super::capability;
use super::capability::HardwareType;

/// Facet names as they appear under `state`, plus the compound capability
/// keys that gate a single part of a facet.
pub mod keys {
    pub const STATUS: &str = "status";
    pub const PROGRAM_ID: &str = "ProgramID";
    pub const PROGRAM_TYPE: &str = "programType";
    pub const PROGRAM_PHASE: &str = "programPhase";
    pub const REMAINING_TIME: &str = "remainingTime";
    pub const START_TIME: &str = "startTime";
    pub const ELAPSED_TIME: &str = "elapsedTime";
    pub const TARGET_TEMPERATURE: &str = "targetTemperature";
    pub const TEMPERATURE: &str = "temperature";
    pub const SIGNAL_INFO: &str = "signalInfo";
    pub const SIGNAL_FAILURE: &str = "signalFailure";
    pub const SIGNAL_DOOR: &str = "signalDoor";
    pub const REMOTE_ENABLE: &str = "remoteEnable";
    pub const DRYING_STEP: &str = "dryingStep";
    pub const SPINNING_SPEED: &str = "spinningSpeed";
    pub const VENTILATION_STEP: &str = "ventilationStep";
    pub const PLATE_STEP: &str = "plateStep";
    pub const ECO_FEEDBACK: &str = "ecoFeedback";
    pub const BATTERY_LEVEL: &str = "batteryLevel";
    pub const LIGHT: &str = "light";

    pub const TARGET_TEMPERATURE_FIRST: &str = "targetTemperature.0";
    pub const ECO_ENERGY: &str = "ecoFeedback.energyConsumption";
    pub const ECO_WATER: &str = "ecoFeedback.waterConsumption";
    pub const MOBILE_START: &str = "remoteEnable.mobileStart";
}

/// Devices keyed by device ID (fabrication number).
pub type DeviceMap = BTreeMap<String, Device>;

/// A `{value_raw, value_localized}` pair, used for status, program and step facets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScalarStatus {
    #[serde(default)]
    pub value_raw: Option<i64>,

    #[serde(default, deserialize_with = "localized_label")]
    pub value_localized: Option<String>,
}

// Some facets (spinning speed) report their label as a number.
fn localized_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Hundredths of a degree; `-32768` means no reading
    pub value_raw: i64,

    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default)]
    pub value: Option<f64>,

    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoFeedback {
    #[serde(default)]
    pub current_energy_consumption: Option<Quantity>,

    #[serde(default)]
    pub current_water_consumption: Option<Quantity>,

    /// Fraction of the program's typical energy use, 0.0-1.0
    #[serde(default)]
    pub energy_forecast: Option<f64>,

    #[serde(default)]
    pub water_forecast: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEnable {
    #[serde(default)]
    pub full_remote_control: Option<bool>,

    #[serde(default)]
    pub smart_grid: Option<bool>,

    #[serde(default)]
    pub mobile_start: Option<bool>,
}

/// A decoded state facet.
#[derive(Debug, Clone, PartialEq)]
pub enum Facet {
    Status(ScalarStatus),
    Time(Vec<i64>),
    Temperatures(Vec<TemperatureReading>),
    Signal(bool),
    Remote(RemoteEnable),
    /// `None` when the API sends a null block
    Consumption(Option<EcoFeedback>),
    Battery(i64),
    Steps(Vec<ScalarStatus>),
    Light(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    Status,
    Time,
    Temperatures,
    Signal,
    Remote,
    Consumption,
    Battery,
    Steps,
    Light,
}

impl FacetKind {
    /// Shape of the facet stored under `name`.
    pub fn of(name: &str) -> Option<Self> {
        Some(match name {
            keys::STATUS
            | keys::PROGRAM_ID
            | keys::PROGRAM_TYPE
            | keys::PROGRAM_PHASE
            | keys::DRYING_STEP
            | keys::SPINNING_SPEED
            | keys::VENTILATION_STEP => FacetKind::Status,
            keys::REMAINING_TIME | keys::START_TIME | keys::ELAPSED_TIME => FacetKind::Time,
            keys::TARGET_TEMPERATURE | keys::TEMPERATURE => FacetKind::Temperatures,
            keys::SIGNAL_INFO | keys::SIGNAL_FAILURE | keys::SIGNAL_DOOR => FacetKind::Signal,
            keys::REMOTE_ENABLE => FacetKind::Remote,
            keys::ECO_FEEDBACK => FacetKind::Consumption,
            keys::BATTERY_LEVEL => FacetKind::Battery,
            keys::PLATE_STEP => FacetKind::Steps,
            keys::LIGHT => FacetKind::Light,
            _ => return None,
        })
    }

    pub fn decode(self, raw: &Value) -> Result<Facet, serde_json::Error> {
        Ok(match self {
            FacetKind::Status => Facet::Status(ScalarStatus::deserialize(raw)?),
            FacetKind::Time => Facet::Time(Vec::deserialize(raw)?),
            FacetKind::Temperatures => Facet::Temperatures(Vec::deserialize(raw)?),
            FacetKind::Signal => Facet::Signal(bool::deserialize(raw)?),
            FacetKind::Remote => Facet::Remote(RemoteEnable::deserialize(raw)?),
            FacetKind::Consumption => Facet::Consumption(Option::deserialize(raw)?),
            FacetKind::Battery => Facet::Battery(i64::deserialize(raw)?),
            FacetKind::Steps => Facet::Steps(Vec::deserialize(raw)?),
            FacetKind::Light => Facet::Light(i64::deserialize(raw)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Gateway {
    pub tech_type: Option<String>,
    pub release_version: Option<String>,
}

/// One appliance from the device listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub device_id: String,
    pub hardware_type: HardwareType,
    /// Localized type name from the API
    pub type_name: Option<String>,
    /// User-assigned name; often empty
    pub name: String,
    pub model: Option<String>,
    pub gateway: Gateway,
    pub state: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawDevice {
    ident: RawIdent,
    #[serde(default)]
    state: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIdent {
    #[serde(rename = "type")]
    device_type: RawType,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    device_ident_label: Option<RawIdentLabel>,
    #[serde(default)]
    xkm_ident_label: Option<RawXkmIdentLabel>,
}

#[derive(Deserialize)]
struct RawType {
    value_raw: HardwareType,
    #[serde(default)]
    value_localized: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIdentLabel {
    #[serde(default)]
    fab_number: Option<String>,
    #[serde(default)]
    tech_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawXkmIdentLabel {
    #[serde(default)]
    tech_type: Option<String>,
    #[serde(default)]
    release_version: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl Device {
    /// Normalize one listing entry. `key` is the listing key, used as the
    /// device ID when the ident block carries no fabrication number.
    pub fn from_raw(key: &str, raw: Value) -> Result<Self, serde_json::Error> {
        let raw: RawDevice = serde_json::from_value(raw)?;
        let label = raw.ident.device_ident_label;
        let device_id = label
            .as_ref()
            .and_then(|l| non_empty(l.fab_number.clone()))
            .unwrap_or_else(|| key.to_string());
        let xkm = raw.ident.xkm_ident_label;

        Ok(Self {
            device_id,
            hardware_type: raw.ident.device_type.value_raw,
            type_name: non_empty(raw.ident.device_type.value_localized),
            name: raw.ident.device_name.unwrap_or_default(),
            model: label.and_then(|l| non_empty(l.tech_type)),
            gateway: Gateway {
                tech_type: xkm.as_ref().and_then(|x| non_empty(x.tech_type.clone())),
                release_version: xkm.and_then(|x| non_empty(x.release_version)),
            },
            state: raw.state.unwrap_or_default(),
        })
    }

    /// User name, else the localized type name, else the built-in type name.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.type_name
            .clone()
            .or_else(|| capability::type_name(self.hardware_type).map(str::to_string))
            .unwrap_or_else(|| self.device_id.clone())
    }

    pub fn has_facet(&self, name: &str) -> bool {
        self.state.contains_key(name)
    }

    /// Decode the facet stored under `name`. Missing, unknown or malformed
    /// facets yield `None`.
    pub fn facet(&self, name: &str) -> Option<Facet> {
        let raw = self.state.get(name)?;
        let kind = FacetKind::of(name)?;
        match kind.decode(raw) {
            Ok(facet) => Some(facet),
            Err(e) => {
                debug!(
                    "Malformed {} facet on device {}: {}",
                    name, self.device_id, e
                );
                None
            }
        }
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarStatus> {
        match self.facet(name)? {
            Facet::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Raw status code, if the status facet is present and well formed.
    pub fn status_code(&self) -> Option<i64> {
        self.scalar(keys::STATUS)?.value_raw
    }

    pub fn time(&self, name: &str) -> Option<Vec<i64>> {
        match self.facet(name)? {
            Facet::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn temperatures(&self, name: &str) -> Option<Vec<TemperatureReading>> {
        match self.facet(name)? {
            Facet::Temperatures(t) => Some(t),
            _ => None,
        }
    }

    pub fn signal(&self, name: &str) -> Option<bool> {
        match self.facet(name)? {
            Facet::Signal(b) => Some(b),
            _ => None,
        }
    }

    pub fn remote_enable(&self) -> Option<RemoteEnable> {
        match self.facet(keys::REMOTE_ENABLE)? {
            Facet::Remote(r) => Some(r),
            _ => None,
        }
    }

    pub fn eco_feedback(&self) -> Option<EcoFeedback> {
        match self.facet(keys::ECO_FEEDBACK)? {
            Facet::Consumption(eco) => eco,
            _ => None,
        }
    }

    pub fn battery_level(&self) -> Option<i64> {
        match self.facet(keys::BATTERY_LEVEL)? {
            Facet::Battery(level) => Some(level),
            _ => None,
        }
    }

    pub fn plate_steps(&self) -> Option<Vec<ScalarStatus>> {
        match self.facet(keys::PLATE_STEP)? {
            Facet::Steps(steps) => Some(steps),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<i64> {
        match self.facet(keys::LIGHT)? {
            Facet::Light(light) => Some(light),
            _ => None,
        }
    }
}
