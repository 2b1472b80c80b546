//! User commands and their delivery to the Miele API.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::info;

use super::Error;
use super::Result;
use super::client::ApiTransport;
use super::client::Method;
use super::entity::EntityDescriptor;
use super::entity::FAN_SPEED_COUNT;
use crate::engine::Target;

/// `processAction` value that stops the running program.
const PROCESS_ACTION_STOP: i64 = 2;

/// Values of the `light` action.
const LIGHT_ON: i64 = 1;
const LIGHT_OFF: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Raw body for the actions endpoint
    GenericAction(Map<String, Value>),
    StartProgram(i64),
    StopProgram,
    /// Ventilation step, 1 to 4
    SetFanStep(u8),
    SetPower(bool),
    SetLight(bool),
}

#[derive(Deserialize)]
struct ActionData {
    body: Map<String, Value>,
}

#[derive(Deserialize)]
struct StartProgramData {
    program_id: i64,
}

#[derive(Deserialize)]
struct FanPercentageData {
    percentage: u32,
}

#[derive(Deserialize)]
struct LightData {
    on: bool,
}

#[derive(Deserialize)]
struct TurnOnData {
    #[serde(default)]
    percentage: Option<u32>,
}

fn parse<T: DeserializeOwned>(service: &str, data: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(data.clone()))
        .map_err(|e| Error::InvalidCommand(format!("{}: {}", service, e)))
}

impl Command {
    /// Build the commands for a service call, in the order they are sent.
    pub fn from_service(service: &str, data: &Map<String, Value>) -> Result<Vec<Self>> {
        let command = match service {
            "action" => Command::GenericAction(parse::<ActionData>(service, data)?.body),
            "start_program" => {
                Command::StartProgram(parse::<StartProgramData>(service, data)?.program_id)
            }
            "stop_program" => Command::StopProgram,
            "set_fan_percentage" => {
                fan_command(parse::<FanPercentageData>(service, data)?.percentage)?
            }
            "set_light" => Command::SetLight(parse::<LightData>(service, data)?.on),
            "turn_on" => return turn_on(parse::<TurnOnData>(service, data)?.percentage),
            "turn_off" => Command::SetPower(false),
            other => return Err(Error::InvalidCommand(format!("unknown service {}", other))),
        };
        Ok(vec![command])
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Command::StartProgram(_) => "programs",
            _ => "actions",
        }
    }

    /// JSON body sent to the endpoint.
    pub fn body(&self) -> Value {
        match self {
            Command::GenericAction(body) => Value::Object(body.clone()),
            Command::StartProgram(id) => json!({"programId": id}),
            Command::StopProgram => json!({"processAction": PROCESS_ACTION_STOP}),
            Command::SetFanStep(step) => json!({"ventilationStep": step}),
            Command::SetPower(true) => json!({"powerOn": true}),
            Command::SetPower(false) => json!({"powerOff": true}),
            Command::SetLight(on) => json!({"light": if *on { LIGHT_ON } else { LIGHT_OFF }}),
        }
    }
}

/// Map a 0-100 fan percentage onto the hood's speed steps. Zero powers the
/// hood off.
fn fan_command(percentage: u32) -> Result<Command> {
    if percentage > 100 {
        return Err(Error::InvalidCommand(format!(
            "fan percentage {} out of range 0-100",
            percentage
        )));
    }
    if percentage == 0 {
        return Ok(Command::SetPower(false));
    }
    let steps = FAN_SPEED_COUNT as u32;
    let step = (percentage * steps).div_ceil(100);
    Ok(Command::SetFanStep(step as u8))
}

/// Power the hood on, first setting the speed when a nonzero percentage is
/// given. A zero percentage powers it off instead.
fn turn_on(percentage: Option<u32>) -> Result<Vec<Command>> {
    match percentage {
        Some(0) => Ok(vec![Command::SetPower(false)]),
        Some(pct) => Ok(vec![fan_command(pct)?, Command::SetPower(true)]),
        None => Ok(vec![Command::SetPower(true)]),
    }
}

/// Sends commands to individual devices.
pub struct Dispatcher<T> {
    transport: T,
}

impl<T: ApiTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn dispatch(&self, device_id: &str, command: &Command) -> Result<()> {
        let path = format!("/v1/devices/{}/{}", device_id, command.endpoint());
        let body = command.body();
        debug!("Dispatching {:?} to {}", command, device_id);

        let response = self
            .transport
            .request(Method::Put, &path, &[], Some(&body))
            .await?;

        if response.is_success() {
            info!("Device {} accepted {}", device_id, body);
            return Ok(());
        }
        match response.status {
            401 => Err(Error::AuthExpired),
            status => Err(Error::DispatchFailed {
                device_id: device_id.to_string(),
                status,
                body: response.text(),
            }),
        }
    }
}

/// Device IDs selected by `target`, each once, in order of first mention.
///
/// Entity selectors match either the entity ID or the stable ID. Selectors
/// that match nothing are ignored.
pub fn resolve_targets(target: &Target, entities: &[EntityDescriptor]) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    let mut add = |device_id: &str| {
        if !devices.iter().any(|d| d == device_id) {
            devices.push(device_id.to_string());
        }
    };

    for selector in &target.entity_id {
        match entities
            .iter()
            .find(|e| &e.entity_id == selector || &e.unique_id == selector)
        {
            Some(entity) => add(&entity.device_id),
            None => debug!("No entity matches {}", selector),
        }
    }
    for selector in &target.device_id {
        if entities.iter().any(|e| &e.device_id == selector) {
            add(selector);
        } else {
            debug!("No device matches {}", selector);
        }
    }

    devices
}
