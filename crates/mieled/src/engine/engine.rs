use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::entity_id_for;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::registry::EntityRegistry;
use super::service::ServiceCall;
use super::service::ServiceError;
use super::service::ServiceResult;
use super::state::EntityRecord;
use super::state::EntityState;
use super::state::State;

/// mieled engine
///
/// This structure handles the flow of events from integrations, routes service
/// calls to the correct integration, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Persisted record of registered entities, shared with integrations
    registry: Arc<EntityRegistry>,

    /// Communication channels to integrations (for commands), keyed by name
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

impl Engine {
    /// Create a new Engine instance
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            registry,
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: Vec::new(),
        }
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext {
            config: cfg,
            registry: &self.registry,
        };
        let mut integrations = Vec::new();
        for constr in super::integration::REGISTRY {
            match constr(&ctx) {
                Ok(Some(i)) => integrations.push(i),
                Err(e) => error!("failed to setup integration: {:#}", e),
                Ok(None) => {}
            }
        }

        for integration in integrations {
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        info!("Registering integration '{}'", name);
        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Invoke a service on the integration named by the call's domain
    pub async fn call_service(&self, call: ServiceCall) -> ServiceResult {
        let Some(tx) = self.integration_channels.get(&call.domain) else {
            return Err(ServiceError::UnknownService {
                domain: call.domain,
                service: call.service,
            });
        };

        debug!(
            "Routing service call {}.{} to integration",
            call.domain, call.service
        );
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ToIntegrationMessage::ServiceCall {
            call,
            reply: reply_tx,
        })
        .map_err(|_| ServiceError::Failed("integration is not running".to_string()))?;

        reply_rx.await.map_err(|_| {
            ServiceError::Failed("integration dropped the service call".to_string())
        })?
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
            while let Ok(msg) = rx.try_recv() {
                self.handle_event(msg);
            }
            self.persist_registry().await;
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Write registry changes from the last batch of events off the event
    /// loop.
    async fn persist_registry(&self) {
        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || registry.flush()).await {
            Ok(Ok(true)) => debug!("Entity registry saved"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!("Failed to persist entity registry: {}", e),
            Err(e) => warn!("Entity registry save task failed: {}", e),
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Sender integrations use to report events. Exposed for tests that
    /// drive the engine without a real integration.
    pub fn sender(&self) -> FromIntegrationSender {
        self.message_tx.clone()
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                info,
                integration_name,
            } => {
                if self
                    .registry
                    .insert(&integration_name, info.platform, &info.unique_id)
                {
                    info!(
                        "Entity registered: {} (from {})",
                        info.entity_id, integration_name
                    );
                } else {
                    debug!("Entity metadata updated: {}", info.entity_id);
                }

                // State is unknown until the first state-change message arrives.
                let mut state = State::clone(&self.state.load());
                let entity_state = state
                    .entities
                    .remove(&info.entity_id)
                    .map(|record| record.state)
                    .unwrap_or_default();
                state.entities.insert(
                    info.entity_id.clone(),
                    EntityRecord {
                        integration: integration_name,
                        info,
                        state: entity_state,
                    },
                );
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::EntityStateChanged { entity_id, state } => {
                self.update_state(entity_id, state);
            }
            FromIntegrationMessage::EntityRemoved {
                integration_name,
                platform,
                unique_id,
            } => {
                let entity_id = entity_id_for(platform, &unique_id);
                info!("Entity removed: {}", entity_id);

                self.registry.remove(&integration_name, platform, &unique_id);

                let mut state = State::clone(&self.state.load());
                if state.entities.remove(&entity_id).is_some() {
                    self.state.store(Arc::new(state));
                }
            }
        }
    }

    fn update_state(&self, entity_id: String, new_state: EntityState) {
        let current = self.state.load();
        let Some(record) = current.entities.get(&entity_id) else {
            debug!("Ignoring state for unknown entity {}", entity_id);
            return;
        };
        if record.state == new_state {
            return;
        }

        debug!("State changed: {} -> {:?}", entity_id, new_state.value);
        let mut state = State::clone(&current);
        if let Some(record) = state.entities.get_mut(&entity_id) {
            record.state = new_state;
        }
        self.state.store(Arc::new(state));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for handle in &self.integration_handles {
            handle.abort();
        }
    }
}
