#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod integration;
mod message;
mod registry;
mod service;
pub mod state;

pub use engine::Engine;
pub use entity::EntityInfo;
pub use entity::Platform;
pub use entity::entity_id_for;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use registry::EntityRegistry;
pub use registry::RegisteredIds;
pub use registry::RegistryError;
pub use service::ServiceCall;
pub use service::ServiceError;
pub use service::ServiceResponse;
pub use service::ServiceResult;
pub use service::Target;
pub use state::EntityRecord;
pub use state::EntityState;
pub use state::EntityValue;
pub use state::State;
