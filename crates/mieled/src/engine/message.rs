//! Type-safe message system for mieled
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::entity::EntityInfo;
use super::entity::Platform;
use super::service::ServiceCall;
use super::service::ServiceResult;
use super::state::EntityState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// An entity was discovered, or its metadata changed
    EntityDiscovered {
        info: EntityInfo,
        integration_name: String,
    },

    /// An entity's state was re-evaluated
    EntityStateChanged {
        entity_id: String,
        state: EntityState,
    },

    /// An entity no longer exists and should be dropped from the registry
    EntityRemoved {
        integration_name: String,
        platform: Platform,
        unique_id: String,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Invoke a service; the outcome is sent back on `reply`
    ServiceCall {
        call: ServiceCall,
        reply: oneshot::Sender<ServiceResult>,
    },
}
