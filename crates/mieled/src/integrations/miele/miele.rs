use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Config;
use super::client::ApiTransport;
use super::coordinator::Coordinator;
use super::coordinator::CoordinatorHandle;
use super::coordinator::PollStatus;
use super::coordinator::Snapshot;
use super::dispatch::Command;
use super::dispatch::Dispatcher;
use super::dispatch::resolve_targets;
use super::entity::MieleEntity;
use super::materialize::materialize;
use super::snapshot::SnapshotFetcher;
use crate::engine::EntityRegistry;
use crate::engine::EntityState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::Platform;
use crate::engine::RegisteredIds;
use crate::engine::ServiceCall;
use crate::engine::ServiceError;
use crate::engine::ServiceResponse;
use crate::engine::ServiceResult;
use crate::engine::ToIntegrationMessage;

pub const NAME: &str = "miele";

/// Live entities keyed by entity ID.
type EntitiesMap = Arc<Mutex<BTreeMap<String, MieleEntity>>>;

/// Miele cloud integration
///
/// Polls the device listing through a [`Coordinator`], turns every merged
/// snapshot into entities and forwards service calls to the devices they
/// target.
pub struct MieleIntegration<T: ApiTransport> {
    transport: T,
    config: Config,
    registry: Arc<EntityRegistry>,
    dispatcher: Dispatcher<T>,
    entities: EntitiesMap,
    coordinator: Option<CoordinatorHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: ApiTransport + Clone + 'static> MieleIntegration<T> {
    pub fn new(transport: T, config: &Config, registry: Arc<EntityRegistry>) -> Self {
        Self {
            dispatcher: Dispatcher::new(transport.clone()),
            transport,
            config: config.clone(),
            registry,
            entities: Arc::new(Mutex::new(BTreeMap::new())),
            coordinator: None,
            tasks: Vec::new(),
        }
    }

    /// Re-materialize entities whenever the coordinator publishes a snapshot,
    /// and re-report device trackers when poll health changes.
    async fn sync_task(
        mut snapshots: watch::Receiver<Snapshot>,
        mut poll_status: watch::Receiver<PollStatus>,
        entities: EntitiesMap,
        registry: Arc<EntityRegistry>,
        to_engine: FromIntegrationSender,
    ) {
        let mut reported = PollHealth::default();
        loop {
            let snapshot_changed = tokio::select! {
                biased;
                changed = snapshots.changed() => match changed {
                    Ok(()) => true,
                    Err(_) => break,
                },
                changed = poll_status.changed() => match changed {
                    Ok(()) => false,
                    Err(_) => break,
                },
            };
            let health = PollHealth::of(&poll_status.borrow_and_update());
            let snapshot = if snapshot_changed {
                snapshots.borrow_and_update().clone()
            } else {
                snapshots.borrow().clone()
            };
            let now = chrono::Local::now().naive_local();

            let messages = {
                let mut entities = entities.lock().await;
                if snapshot_changed {
                    let registered = registry.registered(NAME);
                    sync_entities(&mut entities, &snapshot, &registered, &health, now)
                } else if health != reported {
                    report_health(&mut entities, &snapshot, &health, now)
                } else {
                    continue;
                }
            };
            reported = health;

            debug!(
                "Snapshot {} produced {} entity updates",
                snapshot.generation,
                messages.len()
            );
            for msg in messages {
                if to_engine.send(msg).await.is_err() {
                    warn!("Engine channel closed, stopping Miele sync");
                    return;
                }
            }
        }
    }

    async fn call_service(&self, call: &ServiceCall) -> ServiceResult {
        let commands = Command::from_service(&call.service, &call.data)?;
        if call.target.is_empty() {
            info!("{} has no target", call.service);
            return Ok(ServiceResponse::default());
        }

        let descriptors: Vec<_> = self
            .entities
            .lock()
            .await
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        let devices = resolve_targets(&call.target, &descriptors);
        if devices.is_empty() {
            info!("{} matched no Miele devices", call.service);
            return Ok(ServiceResponse::default());
        }

        let mut dispatched = Vec::new();
        let mut first_error = None;
        for device_id in devices {
            match self.dispatch_all(&device_id, &commands).await {
                Ok(()) => dispatched.push(device_id),
                Err(e) => {
                    warn!("{} failed for device {}: {}", call.service, device_id, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if !dispatched.is_empty() {
            self.request_refresh();
        }
        match first_error {
            Some(e) => Err(ServiceError::from(e)),
            None => Ok(ServiceResponse { dispatched }),
        }
    }

    /// Send `commands` to one device in order, stopping at the first failure.
    async fn dispatch_all(&self, device_id: &str, commands: &[Command]) -> super::Result<()> {
        for command in commands {
            self.dispatcher.dispatch(device_id, command).await?;
        }
        Ok(())
    }

    /// Poll soon so the effect of a command shows up without waiting a full
    /// interval.
    fn request_refresh(&self) {
        let Some(handle) = self.coordinator.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = handle.refresh().await {
                debug!("Refresh after command failed: {}", e);
            }
        });
    }
}

/// Poll outcome as shown on device trackers.
#[derive(Debug, Clone, Default, PartialEq)]
struct PollHealth {
    last_update_success: bool,
    /// Failure that needs user action, such as an expired token
    problem: Option<String>,
}

impl PollHealth {
    fn of(status: &PollStatus) -> Self {
        Self {
            last_update_success: status.last_update_success,
            problem: status
                .last_error
                .as_ref()
                .filter(|e| !e.is_transient())
                .map(ToString::to_string),
        }
    }

    fn apply(&self, entity: &MieleEntity, state: &mut EntityState) {
        if entity.descriptor.platform != Platform::DeviceTracker {
            return;
        }
        state.attributes.insert(
            "lastUpdateSuccess".to_string(),
            json!(self.last_update_success),
        );
        if let Some(problem) = &self.problem {
            state
                .attributes
                .insert("problem".to_string(), json!(problem));
        }
    }
}

/// Re-evaluate device trackers so they carry `health`. Values come from the
/// retained snapshot, so nothing else changes.
fn report_health(
    entities: &mut BTreeMap<String, MieleEntity>,
    snapshot: &Snapshot,
    health: &PollHealth,
    now: NaiveDateTime,
) -> Vec<FromIntegrationMessage> {
    entities
        .values_mut()
        .filter(|e| e.descriptor.platform == Platform::DeviceTracker)
        .filter_map(|entity| {
            let device = snapshot.devices.get(&entity.descriptor.device_id)?;
            let mut state = entity.evaluate(device, now);
            health.apply(entity, &mut state);
            Some(FromIntegrationMessage::EntityStateChanged {
                entity_id: entity.descriptor.entity_id.clone(),
                state,
            })
        })
        .collect()
}

/// Bring the live entity set in line with `snapshot` and return the engine
/// messages describing the changes.
///
/// Entities that survive keep their decoder caches. Removals cover both
/// registered identities and live entities that disappeared.
fn sync_entities(
    entities: &mut BTreeMap<String, MieleEntity>,
    snapshot: &Snapshot,
    registered: &RegisteredIds,
    health: &PollHealth,
    now: NaiveDateTime,
) -> Vec<FromIntegrationMessage> {
    let materialized = materialize(&snapshot.devices, registered);

    let mut discovered = Vec::new();
    let mut changed = Vec::new();
    let mut next = BTreeMap::new();
    for descriptor in materialized.entities {
        let mut entity = match entities.remove(&descriptor.entity_id) {
            Some(existing) if existing.descriptor == descriptor => existing,
            _ => {
                discovered.push(FromIntegrationMessage::EntityDiscovered {
                    info: descriptor.info(),
                    integration_name: NAME.to_string(),
                });
                MieleEntity::new(descriptor)
            }
        };
        if let Some(device) = snapshot.devices.get(&entity.descriptor.device_id) {
            let mut state = entity.evaluate(device, now);
            health.apply(&entity, &mut state);
            changed.push(FromIntegrationMessage::EntityStateChanged {
                entity_id: entity.descriptor.entity_id.clone(),
                state,
            });
        }
        next.insert(entity.descriptor.entity_id.clone(), entity);
    }

    let mut removed: Vec<_> = materialized
        .removals
        .into_iter()
        .map(|r| (r.platform, r.unique_id))
        .collect();
    for stale in entities.values() {
        let id = (stale.descriptor.platform, stale.descriptor.unique_id.clone());
        if !removed.contains(&id) {
            removed.push(id);
        }
    }
    *entities = next;

    let removals = removed
        .into_iter()
        .map(|(platform, unique_id)| FromIntegrationMessage::EntityRemoved {
            integration_name: NAME.to_string(),
            platform,
            unique_id,
        });

    discovered
        .into_iter()
        .chain(changed)
        .chain(removals)
        .collect()
}

#[async_trait]
impl<T: ApiTransport + Clone + 'static> Integration for MieleIntegration<T> {
    fn name(&self) -> &str {
        NAME
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        info!("Setting up Miele integration ({})", self.config.base_url);

        let (coordinator, handle) = Coordinator::new(
            SnapshotFetcher::new(self.transport.clone()),
            &self.config.language,
            self.config.poll_interval(),
        );
        let sync = tokio::spawn(Self::sync_task(
            handle.subscribe(),
            handle.subscribe_status(),
            self.entities.clone(),
            self.registry.clone(),
            tx,
        ));
        self.tasks.push(sync);
        self.tasks.push(tokio::spawn(coordinator.run()));
        self.coordinator = Some(handle);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::ServiceCall { call, reply } => {
                debug!("Handling service call {}.{}", call.domain, call.service);
                let result = self.call_service(&call).await;
                if reply.send(result).is_err() {
                    debug!("Caller went away before {} completed", call.service);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Shutting down Miele integration");
        self.coordinator = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use tokio::sync::mpsc;
    use tokio::sync::oneshot;

    use super::*;
    use crate::engine::EntityValue;
    use crate::integrations::miele::Error;
    use crate::engine::Target;
    use crate::integrations::miele::client::MockTransport;
    use crate::integrations::miele::client::Method;
    use crate::integrations::miele::model::Device;
    use crate::integrations::miele::model::DeviceMap;
    use crate::integrations::miele::model::fixtures;
    use crate::integrations::miele::model::keys;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn snapshot(devices: Vec<Device>, generation: u64) -> Snapshot {
        let devices: DeviceMap = devices
            .into_iter()
            .map(|d| (d.device_id.clone(), d))
            .collect();
        Snapshot {
            devices: Arc::new(devices),
            generation,
        }
    }

    fn count<F>(messages: &[FromIntegrationMessage], f: F) -> usize
    where
        F: Fn(&FromIntegrationMessage) -> bool,
    {
        messages.iter().filter(|m| f(m)).count()
    }

    fn healthy() -> PollHealth {
        PollHealth {
            last_update_success: true,
            problem: None,
        }
    }

    fn sync(
        entities: &mut BTreeMap<String, MieleEntity>,
        snapshot: &Snapshot,
        registered: &RegisteredIds,
    ) -> Vec<FromIntegrationMessage> {
        sync_entities(entities, snapshot, registered, &healthy(), now())
    }

    fn tracker_state(
        messages: &[FromIntegrationMessage],
        entity_id: &str,
    ) -> Option<EntityState> {
        messages.iter().rev().find_map(|m| match m {
            FromIntegrationMessage::EntityStateChanged {
                entity_id: id,
                state,
            } if id == entity_id => Some(state.clone()),
            _ => None,
        })
    }

    fn is_discovered(m: &FromIntegrationMessage) -> bool {
        matches!(m, FromIntegrationMessage::EntityDiscovered { .. })
    }

    fn is_removed(m: &FromIntegrationMessage) -> bool {
        matches!(m, FromIntegrationMessage::EntityRemoved { .. })
    }

    #[test]
    fn test_sync_discovers_once() {
        let mut entities = BTreeMap::new();
        let snap = snapshot(vec![fixtures::washer(5), fixtures::hood()], 1);

        let first = sync(&mut entities, &snap, &RegisteredIds::new());
        let live = entities.len();
        assert_eq!(count(&first, is_discovered), live);
        assert_eq!(
            count(&first, |m| matches!(m, FromIntegrationMessage::EntityStateChanged { .. })),
            live
        );

        let second = sync(&mut entities, &snap, &RegisteredIds::new());
        assert_eq!(count(&second, is_discovered), 0);
        assert_eq!(count(&second, is_removed), 0);
        assert_eq!(entities.len(), live);
    }

    #[test]
    fn test_sync_door_status_temperature_scenario() {
        let mut raw = fixtures::washer_json(5);
        raw["state"]["targetTemperature"][0]["value_raw"] = json!(-32768);
        let washer = Device::from_raw("000123", raw).unwrap();

        let mut entities = BTreeMap::new();
        let messages = sync(
            &mut entities,
            &snapshot(vec![washer], 1),
            &RegisteredIds::new(),
        );

        let state_of = |entity_id: &str| {
            messages.iter().find_map(|m| match m {
                FromIntegrationMessage::EntityStateChanged {
                    entity_id: id,
                    state,
                } if id == entity_id => Some(state.value.clone()),
                _ => None,
            })
        };
        assert_eq!(
            state_of("binary_sensor.000123_door"),
            Some(Some(EntityValue::Bool(true)))
        );
        assert_eq!(
            state_of("sensor.000123_status"),
            Some(Some(EntityValue::from("In use")))
        );
        assert_eq!(
            state_of("sensor.000123_targettemperature_0"),
            Some(None)
        );
        assert_eq!(state_of("sensor.000123_temperature_0"), None);
    }

    #[test]
    fn test_sync_keeps_consumption_cache() {
        let mut entities = BTreeMap::new();
        let registered = RegisteredIds::new();
        sync(&mut entities, &snapshot(vec![fixtures::washer(5)], 1), &registered);

        let mut gap = fixtures::washer(5);
        gap.state.insert(keys::ECO_FEEDBACK.to_string(), serde_json::Value::Null);
        let messages = sync(&mut entities, &snapshot(vec![gap], 2), &registered);

        let energy = messages.iter().find_map(|m| match m {
            FromIntegrationMessage::EntityStateChanged { entity_id, state }
                if entity_id == "sensor.000123_energyconsumption" =>
            {
                Some(state.value.clone())
            }
            _ => None,
        });
        assert_eq!(energy, Some(Some(EntityValue::Number(1.2))));
    }

    #[test]
    fn test_sync_removes_vanished_entities() {
        let mut entities = BTreeMap::new();
        sync(
            &mut entities,
            &snapshot(vec![fixtures::washer(5)], 1),
            &RegisteredIds::new(),
        );

        let mut registered = RegisteredIds::new();
        registered
            .entry(Platform::Sensor)
            .or_default()
            .insert("000999_status".to_string());
        let mut closed = fixtures::washer(5);
        closed.state.remove(keys::SIGNAL_DOOR);

        let messages = sync(&mut entities, &snapshot(vec![closed], 2), &registered);
        let removed: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                FromIntegrationMessage::EntityRemoved { unique_id, .. } => Some(unique_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec!["000999_status", "000123_Door"]);
        assert!(!entities.contains_key("binary_sensor.000123_door"));
    }

    async fn next_messages(
        rx: &mut mpsc::Receiver<FromIntegrationMessage>,
        n: usize,
    ) -> Vec<FromIntegrationMessage> {
        let mut messages = Vec::new();
        while messages.len() < n {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for integration")
                .expect("integration channel closed");
            messages.push(msg);
        }
        messages
    }

    #[tokio::test]
    async fn test_setup_polls_and_reports_entities() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(200, json!({"000456": fixtures::hood_json()}));

        let registry = Arc::new(EntityRegistry::in_memory());
        let mut integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            registry,
        );
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        // Hood: tracker, status, ventilation step, info, failure, mobile
        // start, fan and light, each discovered then evaluated.
        let messages = next_messages(&mut rx, 16).await;
        assert_eq!(count(&messages, is_discovered), 8);
        assert!(messages.iter().any(|m| matches!(
            m,
            FromIntegrationMessage::EntityDiscovered { info, .. }
                if info.entity_id == "fan.000456_fan"
        )));
        let tracker = tracker_state(&messages, "device_tracker.000456").unwrap();
        assert_eq!(tracker.attributes["lastUpdateSuccess"], json!(true));

        let requests = mock.requests();
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "/v1/devices");

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_poll_removes_nothing() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(200, json!({"000456": fixtures::hood_json()}));
        mock.push_status(500, "upstream unavailable");

        let mut integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            Arc::new(EntityRegistry::in_memory()),
        );
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        next_messages(&mut rx, 16).await;

        let handle = integration.coordinator.clone().unwrap();
        assert!(handle.refresh().await.is_err());
        assert_eq!(handle.subscribe_status().borrow().consecutive_failures, 1);

        // Only the tracker is re-reported; nothing is removed.
        let messages = next_messages(&mut rx, 1).await;
        let tracker = tracker_state(&messages, "device_tracker.000456").unwrap();
        assert_eq!(tracker.attributes["lastUpdateSuccess"], json!(false));
        assert!(!tracker.attributes.contains_key("problem"));
        assert_eq!(tracker.value, Some(EntityValue::from("On")));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(integration.entities.lock().await.len(), 8);

        integration.shutdown().await.unwrap();
    }

    #[test]
    fn test_poll_health_flags_auth_failures() {
        let transient = PollHealth::of(&PollStatus {
            last_update_success: false,
            consecutive_failures: 3,
            last_error: Some(Error::Transport("timeout".to_string())),
        });
        assert_eq!(transient.problem, None);

        let expired = PollHealth::of(&PollStatus {
            last_update_success: false,
            consecutive_failures: 1,
            last_error: Some(Error::AuthExpired),
        });
        assert!(expired.problem.is_some());

        let mut entities = BTreeMap::new();
        let snap = snapshot(vec![fixtures::hood()], 1);
        sync(&mut entities, &snap, &RegisteredIds::new());
        let messages = report_health(&mut entities, &snap, &expired, now());
        assert_eq!(messages.len(), 1);
        let tracker = tracker_state(&messages, "device_tracker.000456").unwrap();
        assert_eq!(tracker.attributes["lastUpdateSuccess"], json!(false));
        assert_eq!(
            tracker.attributes["problem"],
            json!(Error::AuthExpired.to_string())
        );
    }

    #[tokio::test]
    async fn test_service_call_dispatches_per_device() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(
            200,
            json!({"000123": fixtures::washer_json(5), "000456": fixtures::hood_json()}),
        );

        let mut integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            Arc::new(EntityRegistry::in_memory()),
        );
        let (tx, mut rx) = mpsc::channel(256);
        integration.setup(tx).await.unwrap();
        // Wait for the first sync to land before targeting entities.
        next_messages(&mut rx, 1).await;
        while integration.entities.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }

        let (reply, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::ServiceCall {
                call: ServiceCall {
                    domain: NAME.to_string(),
                    service: "stop_program".to_string(),
                    target: Target {
                        entity_id: vec!["sensor.000123_status".to_string()],
                        device_id: vec!["000123".to_string()],
                    },
                    data: Default::default(),
                },
                reply,
            })
            .await
            .unwrap();

        assert_eq!(
            reply_rx.await.unwrap(),
            Ok(ServiceResponse {
                dispatched: vec!["000123".to_string()]
            })
        );
        let puts: Vec<_> = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::Put)
            .collect();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].path, "/v1/devices/000123/actions");
        assert_eq!(puts[0].body, Some(json!({"processAction": 2})));

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_service_call_errors() {
        let mock = Arc::new(MockTransport::new());
        let integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            Arc::new(EntityRegistry::in_memory()),
        );
        {
            let mut entities = integration.entities.lock().await;
            sync(
                &mut entities,
                &snapshot(vec![fixtures::hood()], 1),
                &RegisteredIds::new(),
            );
        }

        let call = |service: &str, data: serde_json::Value| ServiceCall {
            domain: NAME.to_string(),
            service: service.to_string(),
            target: Target {
                entity_id: vec!["light.000456_light".to_string()],
                device_id: vec![],
            },
            data: data.as_object().cloned().unwrap_or_default(),
        };

        assert!(matches!(
            integration.call_service(&call("set_light", json!({}))).await,
            Err(ServiceError::InvalidData(_))
        ));

        mock.push_status(401, "");
        assert_eq!(
            integration.call_service(&call("set_light", json!({"on": true}))).await,
            Err(ServiceError::AuthExpired)
        );

        mock.push_status(500, "boom");
        assert!(matches!(
            integration.call_service(&call("set_fan_percentage", json!({"percentage": 50}))).await,
            Err(ServiceError::Failed(_))
        ));

        // Nothing targeted: no request, no error.
        let mut untargeted = call("set_light", json!({"on": true}));
        untargeted.target = Target::default();
        assert_eq!(
            integration.call_service(&untargeted).await,
            Ok(ServiceResponse::default())
        );
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fan_power_services() {
        let mock = Arc::new(MockTransport::new());
        let integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            Arc::new(EntityRegistry::in_memory()),
        );
        {
            let mut entities = integration.entities.lock().await;
            sync(
                &mut entities,
                &snapshot(vec![fixtures::hood()], 1),
                &RegisteredIds::new(),
            );
        }

        let call = |service: &str, data: serde_json::Value| ServiceCall {
            domain: NAME.to_string(),
            service: service.to_string(),
            target: Target {
                entity_id: vec!["fan.000456_fan".to_string()],
                device_id: vec![],
            },
            data: data.as_object().cloned().unwrap_or_default(),
        };

        let dispatched = Ok(ServiceResponse {
            dispatched: vec!["000456".to_string()],
        });
        assert_eq!(
            integration.call_service(&call("turn_on", json!({"percentage": 75}))).await,
            dispatched
        );
        assert_eq!(integration.call_service(&call("turn_on", json!({}))).await, dispatched);
        assert_eq!(integration.call_service(&call("turn_off", json!({}))).await, dispatched);

        let bodies: Vec<_> = mock
            .requests()
            .into_iter()
            .map(|r| {
                assert_eq!(r.path, "/v1/devices/000456/actions");
                r.body
            })
            .collect();
        assert_eq!(
            bodies,
            vec![
                Some(json!({"ventilationStep": 3})),
                Some(json!({"powerOn": true})),
                Some(json!({"powerOn": true})),
                Some(json!({"powerOff": true})),
            ]
        );
    }

    #[tokio::test]
    async fn test_turn_on_stops_after_failed_step() {
        let mock = Arc::new(MockTransport::new());
        mock.push_status(400, "step not supported");
        let integration = MieleIntegration::new(
            mock.clone(),
            &Config::for_tests("http://miele.test"),
            Arc::new(EntityRegistry::in_memory()),
        );
        {
            let mut entities = integration.entities.lock().await;
            sync(
                &mut entities,
                &snapshot(vec![fixtures::hood()], 1),
                &RegisteredIds::new(),
            );
        }

        let call = ServiceCall {
            domain: NAME.to_string(),
            service: "turn_on".to_string(),
            target: Target {
                entity_id: vec![],
                device_id: vec!["000456".to_string()],
            },
            data: json!({"percentage": 50}).as_object().cloned().unwrap_or_default(),
        };
        assert!(matches!(
            integration.call_service(&call).await,
            Err(ServiceError::Failed(_))
        ));
        assert_eq!(mock.requests().len(), 1);
    }
}
