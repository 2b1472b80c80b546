//! Which state facets each appliance type may expose.
//!
//! The Miele API reports many facets for every appliance, most of them
//! meaningless for a given type (an oven has no spin speed). Entities are
//! only created for facets listed in the row for the device's hardware type.

use super::model::keys;

/// Miele hardware type code (`ident.type.value_raw`).
pub type HardwareType = i64;

const WASHING_MACHINE: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::REMAINING_TIME,
    keys::START_TIME,
    keys::TARGET_TEMPERATURE_FIRST,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::SIGNAL_DOOR,
    keys::MOBILE_START,
    keys::ELAPSED_TIME,
    keys::SPINNING_SPEED,
    keys::ECO_ENERGY,
    keys::ECO_WATER,
];

const TUMBLE_DRYER: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::REMAINING_TIME,
    keys::START_TIME,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::SIGNAL_DOOR,
    keys::MOBILE_START,
    keys::ELAPSED_TIME,
    keys::DRYING_STEP,
    keys::ECO_ENERGY,
];

const DISHWASHER: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::REMAINING_TIME,
    keys::START_TIME,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::MOBILE_START,
    keys::ELAPSED_TIME,
    keys::ECO_ENERGY,
    keys::ECO_WATER,
];

/// Ovens, steam ovens and microwaves.
const OVEN: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::REMAINING_TIME,
    keys::START_TIME,
    keys::TARGET_TEMPERATURE,
    keys::TEMPERATURE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::SIGNAL_DOOR,
    keys::MOBILE_START,
    keys::ELAPSED_TIME,
];

const HOB: &[&str] = &[keys::STATUS, keys::SIGNAL_FAILURE, keys::PLATE_STEP];

const COFFEE_SYSTEM: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_PHASE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::MOBILE_START,
];

const HOOD: &[&str] = &[
    keys::STATUS,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::MOBILE_START,
    keys::VENTILATION_STEP,
];

/// Fridges, freezers and wine units.
const COOLING: &[&str] = &[
    keys::STATUS,
    keys::TARGET_TEMPERATURE,
    keys::TEMPERATURE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::SIGNAL_DOOR,
    keys::MOBILE_START,
];

const ROBOT_VACUUM: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::MOBILE_START,
    keys::BATTERY_LEVEL,
];

const WASHER_DRYER: &[&str] = &[
    keys::PROGRAM_ID,
    keys::STATUS,
    keys::PROGRAM_TYPE,
    keys::PROGRAM_PHASE,
    keys::REMAINING_TIME,
    keys::TARGET_TEMPERATURE_FIRST,
    keys::START_TIME,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::SIGNAL_DOOR,
    keys::MOBILE_START,
    keys::ELAPSED_TIME,
    keys::SPINNING_SPEED,
    keys::DRYING_STEP,
    keys::ECO_ENERGY,
    keys::ECO_WATER,
];

const DISH_WARMER: &[&str] = &[
    keys::STATUS,
    keys::START_TIME,
    keys::TARGET_TEMPERATURE,
    keys::TEMPERATURE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::ELAPSED_TIME,
];

const WINE_FREEZER: &[&str] = &[
    keys::STATUS,
    keys::TARGET_TEMPERATURE,
    keys::TEMPERATURE,
    keys::SIGNAL_INFO,
    keys::SIGNAL_FAILURE,
    keys::MOBILE_START,
];

/// Hardware type → (English type name, allowed facets).
/// Hardware type, English type name and allowed facets.
type Row = (HardwareType, &'static str, &'static [&'static str]);

static CAPABILITIES: &[Row] = &[
    (1, "Washing machine", WASHING_MACHINE),
    (2, "Tumble dryer", TUMBLE_DRYER),
    (7, "Dishwasher", DISHWASHER),
    (12, "Oven", OVEN),
    (13, "Oven microwave", OVEN),
    (14, "Hob highlight", HOB),
    (15, "Steam oven", OVEN),
    (16, "Microwave", OVEN),
    (17, "Coffee system", COFFEE_SYSTEM),
    (18, "Hood", HOOD),
    (19, "Fridge", COOLING),
    (20, "Freezer", COOLING),
    (21, "Fridge-/Freezer combination", COOLING),
    (23, "Vacuum cleaner", ROBOT_VACUUM),
    (24, "Washer dryer", WASHER_DRYER),
    (25, "Dish warmer", DISH_WARMER),
    (27, "Hob induction", HOB),
    (31, "Steam oven combination", OVEN),
    (32, "Wine cabinet", COOLING),
    (33, "Wine conditioning unit", COOLING),
    (34, "Wine storage conditioning unit", COOLING),
    (45, "Steam oven microwave combination", OVEN),
    (67, "Dialog oven", OVEN),
    (68, "Wine cabinet freezer combination", WINE_FREEZER),
];

/// Hardware types that get a fan entity.
pub const FAN_TYPES: &[HardwareType] = &[18];

/// Hardware types that get a light entity.
pub const LIGHT_TYPES: &[HardwareType] = &[17, 18, 32, 33, 34, 68];

fn row(hardware_type: HardwareType) -> Option<&'static Row> {
    CAPABILITIES.iter().find(|(t, _, _)| *t == hardware_type)
}

/// Whether `facet` may be exposed for `hardware_type`. Unknown types allow nothing.
pub fn allows(hardware_type: HardwareType, facet: &str) -> bool {
    row(hardware_type).is_some_and(|(_, _, facets)| facets.contains(&facet))
}

pub fn is_known(hardware_type: HardwareType) -> bool {
    row(hardware_type).is_some()
}

/// English name of a hardware type, used when the API gives no localized one.
pub fn type_name(hardware_type: HardwareType) -> Option<&'static str> {
    row(hardware_type).map(|(_, name, _)| *name)
}

pub fn has_fan(hardware_type: HardwareType) -> bool {
    FAN_TYPES.contains(&hardware_type)
}

pub fn has_light(hardware_type: HardwareType) -> bool {
    LIGHT_TYPES.contains(&hardware_type)
}
