//! Derive the entity set from a device snapshot and reconcile it against
//! previously registered identities.

use std::collections::BTreeSet;

use tracing::warn;

use super::capability;
use super::decode::Consumption;
use super::entity::EntityDescriptor;
use super::entity::ValueSource;
use super::entity::label;
use super::model::Device;
use super::model::DeviceMap;
use super::model::keys;
use crate::engine::Platform;
use crate::engine::RegisteredIds;

/// Binary sensors keep the keys their entities were first registered under.
const BINARY_SENSORS: &[(&str, &str)] = &[
    (keys::SIGNAL_INFO, "Info"),
    (keys::SIGNAL_FAILURE, "Failure"),
    (keys::SIGNAL_DOOR, "Door"),
];

const TEXT_SENSORS: &[&str] = &[
    keys::PROGRAM_ID,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::DRYING_STEP,
    keys::SPINNING_SPEED,
    keys::VENTILATION_STEP,
];

const TIME_SENSORS: &[(&str, bool)] = &[
    (keys::REMAINING_TIME, true),
    (keys::START_TIME, false),
    (keys::ELAPSED_TIME, false),
];

/// An identity that no longer exists and should be unregistered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub platform: Platform,
    pub unique_id: String,
}

#[derive(Debug, Default)]
pub struct Materialized {
    pub entities: Vec<EntityDescriptor>,
    pub removals: Vec<Removal>,
}

impl Materialized {
    /// Identities in this pass, grouped the way the registry stores them.
    pub fn ids(&self) -> RegisteredIds {
        ids_of(&self.entities)
    }
}

fn ids_of(entities: &[EntityDescriptor]) -> RegisteredIds {
    let mut ids = RegisteredIds::new();
    for e in entities {
        ids.entry(e.platform)
            .or_default()
            .insert(e.unique_id.clone());
    }
    ids
}

/// Build entities for every device and list registered identities that
/// disappeared.
pub fn materialize(devices: &DeviceMap, registered: &RegisteredIds) -> Materialized {
    let mut materialized = Materialized::default();
    for device in devices.values() {
        if !capability::is_known(device.hardware_type) {
            warn!(
                "Skipping device {} ({}): unsupported hardware type {}",
                device.device_id,
                device.display_name(),
                device.hardware_type
            );
            continue;
        }
        materialized.entities.extend(device_entities(device));
    }
    materialized.removals = reconcile(&materialized.entities, registered);
    materialized
}

/// Previously registered identities absent from `entities`, per platform.
pub fn reconcile(entities: &[EntityDescriptor], registered: &RegisteredIds) -> Vec<Removal> {
    let current = ids_of(entities);
    let empty = BTreeSet::new();

    let mut removals = Vec::new();
    for (platform, ids) in registered {
        let keep = current.get(platform).unwrap_or(&empty);
        for id in ids.difference(keep) {
            removals.push(Removal {
                platform: *platform,
                unique_id: id.clone(),
            });
        }
    }
    removals
}

/// Entities for a single device of a known hardware type.
pub fn device_entities(device: &Device) -> Vec<EntityDescriptor> {
    let hw = device.hardware_type;
    let allowed = |facet: &str| capability::allows(hw, facet);
    let present = |facet: &str| device.has_facet(facet);

    let mut entities = vec![EntityDescriptor::new(
        Platform::DeviceTracker,
        device,
        None,
        None,
        None,
        ValueSource::Device,
    )];
    let mut sensor = |key: &str, index: Option<usize>, suffix: String, source| {
        entities.push(EntityDescriptor::new(
            Platform::Sensor,
            device,
            Some(key),
            index,
            Some(suffix),
            source,
        ))
    };

    if present(keys::STATUS) && allowed(keys::STATUS) {
        sensor(keys::STATUS, None, label(keys::STATUS).to_string(), ValueSource::Status);
    }

    for &key in TEXT_SENSORS {
        if present(key) && allowed(key) {
            sensor(key, None, label(key).to_string(), ValueSource::Text(key));
        }
    }

    for &(key, whole_first) in &[
        (keys::TARGET_TEMPERATURE, true),
        (keys::TEMPERATURE, false),
    ] {
        let Some(readings) = device.temperatures(key) else {
            continue;
        };
        let indices = if allowed(key) {
            0..readings.len()
        } else if whole_first && allowed(keys::TARGET_TEMPERATURE_FIRST) && !readings.is_empty() {
            0..1
        } else {
            continue;
        };
        let whole_degrees = !allowed(key);
        for index in indices {
            sensor(
                key,
                Some(index),
                format!("{} {}", label(key), index),
                ValueSource::Temperature {
                    facet: key,
                    index,
                    whole_degrees,
                },
            );
        }
    }

    if allowed(keys::PLATE_STEP) {
        let plates = device.plate_steps().unwrap_or_default();
        for index in 0..plates.len() {
            sensor(
                keys::PLATE_STEP,
                Some(index),
                format!("{} {}", label(keys::PLATE_STEP), index + 1),
                ValueSource::PlateStep(index),
            );
        }
    }

    for &(key, decreasing) in TIME_SENSORS {
        if present(key) && allowed(key) {
            sensor(
                key,
                None,
                label(key).to_string(),
                ValueSource::Time {
                    facet: key,
                    decreasing,
                },
            );
        }
    }

    if present(keys::ECO_FEEDBACK) {
        for (gate, kind, key, forecast_key) in [
            (keys::ECO_ENERGY, Consumption::Energy, "energyConsumption", "energyForecast"),
            (keys::ECO_WATER, Consumption::Water, "waterConsumption", "waterForecast"),
        ] {
            if allowed(gate) {
                sensor(key, None, label(key).to_string(), ValueSource::Consumption(kind));
                sensor(
                    forecast_key,
                    None,
                    label(forecast_key).to_string(),
                    ValueSource::Forecast(kind),
                );
            }
        }
    }

    if present(keys::BATTERY_LEVEL) && allowed(keys::BATTERY_LEVEL) {
        sensor(
            keys::BATTERY_LEVEL,
            None,
            label(keys::BATTERY_LEVEL).to_string(),
            ValueSource::Battery,
        );
    }

    let mut binary = |key: &str, suffix: &str, source| {
        entities.push(EntityDescriptor::new(
            Platform::BinarySensor,
            device,
            Some(key),
            None,
            Some(suffix.to_string()),
            source,
        ))
    };
    for &(facet, key) in BINARY_SENSORS {
        if present(facet) && allowed(facet) {
            binary(key, key, ValueSource::Signal(facet));
        }
    }
    let mobile_start_reported = device
        .state
        .get(keys::REMOTE_ENABLE)
        .and_then(|remote| remote.get("mobileStart"))
        .is_some();
    if mobile_start_reported && allowed(keys::MOBILE_START) {
        binary("MobileStart", "MobileStart", ValueSource::MobileStart);
    }

    if capability::has_fan(hw) {
        entities.push(EntityDescriptor::new(
            Platform::Fan,
            device,
            Some("fan"),
            None,
            Some(label("fan").to_string()),
            ValueSource::Fan,
        ));
    }
    if capability::has_light(hw) {
        entities.push(EntityDescriptor::new(
            Platform::Light,
            device,
            Some(keys::LIGHT),
            None,
            Some(label(keys::LIGHT).to_string()),
            ValueSource::Light,
        ));
    }

    entities
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::integrations::miele::model::fixtures;

    fn devices(list: Vec<Device>) -> DeviceMap {
        list.into_iter().map(|d| (d.device_id.clone(), d)).collect()
    }

    fn ids(entities: &[EntityDescriptor]) -> Vec<String> {
        entities
            .iter()
            .map(|e| format!("{} {}", e.entity_id, e.name))
            .collect()
    }

    #[test]
    fn test_washer_entities() {
        let washer = fixtures::washer(5);
        insta::assert_json_snapshot!(ids(&device_entities(&washer)), @r#"
        [
          "device_tracker.000123 Washing machine",
          "sensor.000123_status Washing machine Status",
          "sensor.000123_programid Washing machine Program ID",
          "sensor.000123_programtype Washing machine Program Type",
          "sensor.000123_programphase Washing machine Program Phase",
          "sensor.000123_spinningspeed Washing machine Spin Speed",
          "sensor.000123_targettemperature_0 Washing machine Target Temperature 0",
          "sensor.000123_remainingtime Washing machine Remaining Time",
          "sensor.000123_starttime Washing machine Start Time",
          "sensor.000123_elapsedtime Washing machine Elapsed Time",
          "sensor.000123_energyconsumption Washing machine Energy",
          "sensor.000123_energyforecast Washing machine Energy cons. forecast",
          "sensor.000123_waterconsumption Washing machine Water Consumption",
          "sensor.000123_waterforecast Washing machine Water cons. forecast",
          "binary_sensor.000123_info Washing machine Info",
          "binary_sensor.000123_failure Washing machine Failure",
          "binary_sensor.000123_door Washing machine Door",
          "binary_sensor.000123_mobilestart Washing machine MobileStart"
        ]
        "#);
    }

    #[test]
    fn test_washer_only_has_first_target_temperature() {
        let washer = fixtures::washer(5);
        let temps: Vec<_> = device_entities(&washer)
            .into_iter()
            .filter(|e| matches!(e.source, ValueSource::Temperature { .. }))
            .collect();
        assert_eq!(temps.len(), 1);
        assert_eq!(
            temps[0].source,
            ValueSource::Temperature {
                facet: keys::TARGET_TEMPERATURE,
                index: 0,
                whole_degrees: true
            }
        );
    }

    #[test]
    fn test_hood_entities() {
        let hood = fixtures::hood();
        insta::assert_json_snapshot!(ids(&device_entities(&hood)), @r#"
        [
          "device_tracker.000456 Kitchen hood",
          "sensor.000456_status Kitchen hood Status",
          "sensor.000456_ventilationstep Kitchen hood Ventilation Step",
          "binary_sensor.000456_info Kitchen hood Info",
          "binary_sensor.000456_failure Kitchen hood Failure",
          "binary_sensor.000456_mobilestart Kitchen hood MobileStart",
          "fan.000456_fan Kitchen hood Fan",
          "light.000456_light Kitchen hood Light"
        ]
        "#);
    }

    #[test]
    fn test_per_index_sensors() {
        let fridge = Device::from_raw(
            "000789",
            json!({
                "ident": {
                    "type": {"value_raw": 19},
                    "deviceName": "Fridge",
                    "deviceIdentLabel": {"fabNumber": "000789"}
                },
                "state": {
                    "status": {"value_raw": 5},
                    "targetTemperature": [
                        {"value_raw": 400, "unit": "Celsius"},
                        {"value_raw": -32768, "unit": "Celsius"}
                    ],
                    "temperature": [{"value_raw": 412, "unit": "Celsius"}],
                    "plateStep": [{"value_raw": 1}]
                }
            }),
        )
        .unwrap();
        let entities = device_entities(&fridge);
        let names: Vec<_> = entities.iter().map(|e| e.unique_id.as_str()).collect();
        assert!(names.contains(&"000789_targetTemperature_0"));
        assert!(names.contains(&"000789_targetTemperature_1"));
        assert!(names.contains(&"000789_temperature_0"));
        // Fridges have no plates.
        assert!(!names.iter().any(|n| n.contains("plateStep")));
        assert!(entities.iter().any(|e| e.name == "Fridge Target Temperature 1"));
    }

    #[test]
    fn test_hob_plates() {
        let hob = Device::from_raw(
            "000999",
            json!({
                "ident": {"type": {"value_raw": 27}, "deviceIdentLabel": {"fabNumber": "000999"}},
                "state": {
                    "status": {"value_raw": 5},
                    "plateStep": [
                        {"value_raw": 0, "value_localized": "0"},
                        {"value_raw": 3, "value_localized": "3"}
                    ]
                }
            }),
        )
        .unwrap();
        let ids: Vec<_> = device_entities(&hob)
            .into_iter()
            .map(|e| (e.unique_id, e.name))
            .filter(|(id, _)| id.contains("plateStep"))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("000999_plateStep_0".to_string(), "Hob induction Plate Step 1".to_string()),
                ("000999_plateStep_1".to_string(), "Hob induction Plate Step 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_capability_gates_present_facets() {
        // A dishwasher reporting a door signal and spin speed gets neither.
        let mut raw = fixtures::washer_json(5);
        raw["ident"]["type"]["value_raw"] = json!(7);
        let dishwasher = Device::from_raw("000123", raw).unwrap();
        let ids: Vec<_> = device_entities(&dishwasher)
            .into_iter()
            .map(|e| e.unique_id)
            .collect();
        assert!(!ids.contains(&"000123_Door".to_string()));
        assert!(!ids.contains(&"000123_spinningSpeed".to_string()));
        assert!(!ids.iter().any(|id| id.contains("emperature")));
        assert!(ids.contains(&"000123_waterConsumption".to_string()));
    }

    #[test]
    fn test_absent_facets_create_nothing() {
        let mut washer = fixtures::washer(5);
        washer.state.remove(keys::SIGNAL_DOOR);
        washer.state.remove(keys::ECO_FEEDBACK);
        washer.state.remove(keys::REMOTE_ENABLE);
        let ids: Vec<_> = device_entities(&washer)
            .into_iter()
            .map(|e| e.unique_id)
            .collect();
        assert!(!ids.contains(&"000123_Door".to_string()));
        assert!(!ids.iter().any(|id| id.contains("Consumption") || id.contains("Forecast")));
        assert!(!ids.contains(&"000123_MobileStart".to_string()));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let mut raw = fixtures::washer_json(5);
        raw["ident"]["type"]["value_raw"] = json!(3);
        raw["ident"]["deviceIdentLabel"]["fabNumber"] = json!("000321");
        let unknown = Device::from_raw("000321", raw).unwrap();

        let materialized = materialize(
            &devices(vec![unknown, fixtures::hood()]),
            &RegisteredIds::new(),
        );
        assert!(!materialized.entities.is_empty());
        assert!(materialized.entities.iter().all(|e| e.device_id == "000456"));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let snapshot = devices(vec![fixtures::washer(5), fixtures::hood()]);
        let first = materialize(&snapshot, &RegisteredIds::new());
        let second = materialize(&snapshot, &first.ids());

        assert_eq!(first.entities, second.entities);
        assert!(second.removals.is_empty());
    }

    #[test]
    fn test_reconcile_removes_vanished_identities() {
        let snapshot = devices(vec![fixtures::washer(5), fixtures::hood()]);
        let before = materialize(&snapshot, &RegisteredIds::new()).ids();

        let mut washer = fixtures::washer(5);
        washer.state.remove(keys::SIGNAL_DOOR);
        let after = materialize(&devices(vec![washer]), &before);

        let door = Removal {
            platform: Platform::BinarySensor,
            unique_id: "000123_Door".to_string(),
        };
        assert!(after.removals.contains(&door));
        assert!(after.removals.contains(&Removal {
            platform: Platform::Fan,
            unique_id: "000456_fan".to_string(),
        }));
        assert!(after.removals.contains(&Removal {
            platform: Platform::DeviceTracker,
            unique_id: "000456".to_string(),
        }));
        assert!(!after
            .removals
            .iter()
            .any(|r| r.unique_id == "000123_status"));
    }

    #[test]
    fn test_reconcile_is_per_platform() {
        let mut registered = RegisteredIds::new();
        // Same stable ID registered under a platform that no longer has it.
        registered
            .entry(Platform::Sensor)
            .or_default()
            .insert("000456".to_string());

        let removals = reconcile(&device_entities(&fixtures::hood()), &registered);
        assert_eq!(
            removals,
            vec![Removal {
                platform: Platform::Sensor,
                unique_id: "000456".to_string(),
            }]
        );
    }
}
