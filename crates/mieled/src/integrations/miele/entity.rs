//! Miele entities: their descriptors and the per-entity decoder state that
//! turns device facets into engine values.

use chrono::NaiveDateTime;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use super::decode;
use super::decode::Consumption;
use super::decode::ConsumptionTracker;
use super::decode::TimeTracker;
use super::model::Device;
use super::model::ScalarStatus;
use super::model::keys;
use crate::engine::EntityInfo;
use crate::engine::EntityState;
use crate::engine::EntityValue;
use crate::engine::Platform;
use crate::engine::entity_id_for;

/// Fan speed steps exposed by hoods.
pub const FAN_SPEED_COUNT: i64 = 4;

/// Where an entity's value comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueSource {
    /// Device status, with identity attributes
    Device,
    /// Device status, with program and timing attributes
    Status,
    Text(&'static str),
    PlateStep(usize),
    Temperature {
        facet: &'static str,
        index: usize,
        whole_degrees: bool,
    },
    Time {
        facet: &'static str,
        decreasing: bool,
    },
    Consumption(Consumption),
    Forecast(Consumption),
    Battery,
    Signal(&'static str),
    MobileStart,
    Fan,
    Light,
}

/// Human label for a facet key.
pub fn label(key: &str) -> &str {
    match key {
        keys::STATUS => "Status",
        keys::PROGRAM_ID => "Program ID",
        keys::PROGRAM_TYPE => "Program Type",
        keys::PROGRAM_PHASE => "Program Phase",
        keys::TARGET_TEMPERATURE => "Target Temperature",
        keys::TEMPERATURE => "Temperature",
        keys::DRYING_STEP => "Drying Step",
        keys::SPINNING_SPEED => "Spin Speed",
        keys::VENTILATION_STEP => "Ventilation Step",
        keys::PLATE_STEP => "Plate Step",
        keys::REMAINING_TIME => "Remaining Time",
        keys::ELAPSED_TIME => "Elapsed Time",
        keys::START_TIME => "Start Time",
        keys::BATTERY_LEVEL => "Battery Level",
        keys::LIGHT => "Light",
        "energyConsumption" => "Energy",
        "waterConsumption" => "Water Consumption",
        "energyForecast" => "Energy cons. forecast",
        "waterForecast" => "Water cons. forecast",
        "fan" => "Fan",
        other => other,
    }
}

/// `device_id [_key] [_index]`
pub fn stable_id(device_id: &str, key: Option<&str>, index: Option<usize>) -> String {
    let mut id = device_id.to_string();
    if let Some(key) = key {
        id.push('_');
        id.push_str(key);
    }
    if let Some(index) = index {
        id.push('_');
        id.push_str(&index.to_string());
    }
    id
}

/// Everything needed to register and evaluate one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub platform: Platform,
    pub unique_id: String,
    pub entity_id: String,
    pub device_id: String,
    pub name: String,
    pub source: ValueSource,
}

impl EntityDescriptor {
    pub fn new(
        platform: Platform,
        device: &Device,
        key: Option<&str>,
        index: Option<usize>,
        name_suffix: Option<String>,
        source: ValueSource,
    ) -> Self {
        let unique_id = stable_id(&device.device_id, key, index);
        let display = device.display_name();
        let name = match name_suffix {
            Some(suffix) => format!("{} {}", display, suffix),
            None => display,
        };
        Self {
            platform,
            entity_id: entity_id_for(platform, &unique_id),
            unique_id,
            device_id: device.device_id.clone(),
            name,
            source,
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self.source {
            ValueSource::Temperature { .. } => Some("temperature"),
            ValueSource::Consumption(Consumption::Energy) => Some("energy"),
            ValueSource::Consumption(Consumption::Water) => Some("water"),
            ValueSource::Battery => Some("battery"),
            ValueSource::Signal(keys::SIGNAL_DOOR) => Some("door"),
            ValueSource::Signal(_) => Some("problem"),
            ValueSource::MobileStart => Some("running"),
            _ => None,
        }
    }

    pub fn state_class(&self) -> Option<&'static str> {
        match self.source {
            ValueSource::Consumption(_) => Some("total_increasing"),
            ValueSource::Forecast(_) | ValueSource::Battery => Some("measurement"),
            _ => None,
        }
    }

    pub fn info(&self) -> EntityInfo {
        EntityInfo {
            entity_id: self.entity_id.clone(),
            unique_id: self.unique_id.clone(),
            platform: self.platform,
            name: self.name.clone(),
            device_id: Some(self.device_id.clone()),
            device_class: self.device_class().map(str::to_string),
            state_class: self.state_class().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
enum Cache {
    None,
    Consumption(ConsumptionTracker),
    Time(TimeTracker),
}

/// A materialized entity and its decoder cache.
#[derive(Debug, Clone)]
pub struct MieleEntity {
    pub descriptor: EntityDescriptor,
    cache: Cache,
}

impl MieleEntity {
    pub fn new(descriptor: EntityDescriptor) -> Self {
        let cache = match descriptor.source {
            ValueSource::Consumption(kind) => Cache::Consumption(ConsumptionTracker::new(kind)),
            ValueSource::Time { decreasing, .. } => Cache::Time(TimeTracker::new(decreasing)),
            _ => Cache::None,
        };
        Self { descriptor, cache }
    }

    /// Compute the entity's state from the latest device record.
    pub fn evaluate(&mut self, device: &Device, now: NaiveDateTime) -> EntityState {
        let status = device.status_code();

        match (self.descriptor.source, &mut self.cache) {
            (ValueSource::Device, _) => EntityState {
                value: device.scalar(keys::STATUS).as_ref().and_then(decode::status_value),
                unit: None,
                attributes: device_attributes(device),
            },
            (ValueSource::Status, _) => EntityState {
                value: device.scalar(keys::STATUS).as_ref().and_then(decode::status_value),
                unit: None,
                attributes: status_attributes(device, now),
            },
            (ValueSource::Text(facet), _) => EntityState::new(
                device
                    .scalar(facet)
                    .as_ref()
                    .and_then(decode::text_value)
                    .map(EntityValue::Text),
            ),
            (ValueSource::PlateStep(index), _) => EntityState::new(
                device
                    .plate_steps()
                    .and_then(|steps| steps.get(index).and_then(decode::text_value))
                    .map(EntityValue::Text),
            ),
            (
                ValueSource::Temperature {
                    facet,
                    index,
                    whole_degrees,
                },
                _,
            ) => {
                let reading = device
                    .temperatures(facet)
                    .and_then(|readings| readings.get(index).cloned());
                let value = reading
                    .as_ref()
                    .and_then(|r| decode::temperature(r.value_raw, whole_degrees))
                    .map(|t| {
                        if whole_degrees {
                            EntityValue::Integer(t as i64)
                        } else {
                            EntityValue::Number(t)
                        }
                    });
                let unit = reading
                    .as_ref()
                    .and_then(|r| decode::temperature_unit(r.unit.as_deref()));
                EntityState::new(value).with_unit(unit)
            }
            (ValueSource::Time { facet, .. }, Cache::Time(tracker)) => {
                let time = device.time(facet);
                EntityState::new(
                    tracker
                        .update(status, time.as_deref())
                        .map(EntityValue::Text),
                )
            }
            (ValueSource::Consumption(kind), Cache::Consumption(tracker)) => {
                let eco = device.eco_feedback();
                EntityState::new(tracker.update(status, eco.as_ref()).map(EntityValue::Number))
                    .with_unit(Some(kind.unit()))
            }
            (ValueSource::Forecast(kind), _) => EntityState::new(
                device
                    .eco_feedback()
                    .and_then(|eco| kind.forecast(&eco))
                    .map(EntityValue::Number),
            )
            .with_unit(Some("%")),
            (ValueSource::Battery, _) => {
                EntityState::new(device.battery_level().map(EntityValue::Integer))
                    .with_unit(Some("%"))
            }
            (ValueSource::Signal(facet), _) => {
                EntityState::new(device.signal(facet).map(EntityValue::Bool))
            }
            (ValueSource::MobileStart, _) => EntityState::new(
                device
                    .remote_enable()
                    .and_then(|r| r.mobile_start)
                    .map(EntityValue::Bool),
            ),
            (ValueSource::Fan, _) => fan_state(device.scalar(keys::VENTILATION_STEP)),
            (ValueSource::Light, _) => {
                EntityState::new(device.light().map(|light| EntityValue::Bool(light == 1)))
            }
            // Caches are built from the source in `new`.
            (ValueSource::Time { .. } | ValueSource::Consumption(_), _) => EntityState::default(),
        }
    }
}

fn fan_state(step: Option<ScalarStatus>) -> EntityState {
    let raw = step.and_then(|s| s.value_raw);
    let on = raw.is_some_and(|r| r != 0);
    let mut attributes = Map::new();
    attributes.insert("speed_count".to_string(), json!(FAN_SPEED_COUNT));
    attributes.insert("ventilation_step".to_string(), json!(raw));
    attributes.insert(
        "percentage".to_string(),
        json!(raw.map(|r| r.clamp(0, FAN_SPEED_COUNT) * 100 / FAN_SPEED_COUNT)),
    );

    EntityState {
        value: Some(EntityValue::Bool(on)),
        unit: None,
        attributes,
    }
}

fn device_attributes(device: &Device) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("state_raw".to_string(), json!(device.status_code()));
    attributes.insert("model".to_string(), json!(device.model));
    attributes.insert("device_type".to_string(), json!(device.type_name));
    attributes.insert("fabrication_number".to_string(), json!(device.device_id));
    attributes.insert("gateway_type".to_string(), json!(device.gateway.tech_type));
    attributes.insert(
        "gateway_version".to_string(),
        json!(device.gateway.release_version),
    );
    attributes
}

fn status_attributes(device: &Device, now: NaiveDateTime) -> Map<String, Value> {
    let mut attributes = Map::new();

    for (key, raw_key) in [
        (keys::PROGRAM_ID, "rawProgramID"),
        (keys::PROGRAM_TYPE, "rawProgramType"),
        (keys::PROGRAM_PHASE, "rawProgramPhase"),
        (keys::DRYING_STEP, "rawDryingStep"),
        (keys::SPINNING_SPEED, "rawSpinningSpeed"),
        (keys::VENTILATION_STEP, "rawVentilationStep"),
    ] {
        if let Some(s) = device.scalar(key) {
            attributes.insert(key.to_string(), json!(s.value_localized));
            attributes.insert(raw_key.to_string(), json!(s.value_raw));
        }
    }

    if let Some(steps) = device.plate_steps() {
        for (i, step) in steps.iter().enumerate() {
            attributes.insert(format!("plateStep{}", i + 1), json!(step.value_localized));
            attributes.insert(format!("rawPlateStep{}", i + 1), json!(step.value_raw));
        }
    }

    if let Some(eco) = device.eco_feedback() {
        if let Some(water) = &eco.current_water_consumption {
            attributes.insert("currentWaterConsumption".to_string(), json!(water.value));
            attributes.insert("currentWaterConsumptionUnit".to_string(), json!(water.unit));
        }
        if let Some(energy) = &eco.current_energy_consumption {
            attributes.insert("currentEnergyConsumption".to_string(), json!(energy.value));
            attributes.insert(
                "currentEnergyConsumptionUnit".to_string(),
                json!(energy.unit),
            );
        }
        if let Some(forecast) = eco.water_forecast {
            attributes.insert("waterForecast".to_string(), json!(forecast));
        }
        if let Some(forecast) = eco.energy_forecast {
            attributes.insert("energyForecast".to_string(), json!(forecast));
        }
    }

    // Only meaningful when both durations are reported.
    let seconds = |key: &str| device.time(key).as_deref().and_then(decode::to_seconds);
    if device.has_facet(keys::REMAINING_TIME) && device.has_facet(keys::ELAPSED_TIME) {
        let timing = decode::program_timing(
            seconds(keys::ELAPSED_TIME).unwrap_or(0),
            seconds(keys::REMAINING_TIME).unwrap_or(0),
            seconds(keys::START_TIME).unwrap_or(0),
            now,
        );
        attributes.insert("progress".to_string(), json!(timing.progress));
        attributes.insert(
            "finishTime".to_string(),
            json!(timing.finish_time.map(decode::format_clock)),
        );
        attributes.insert(
            "kickoffTime".to_string(),
            json!(decode::format_clock(timing.kickoff_time)),
        );
    }

    attributes
}
