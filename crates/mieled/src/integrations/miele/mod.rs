//! Miele cloud appliances.
//!
//! Polls `GET /v1/devices`, exposes each appliance as a set of sensor,
//! binary sensor, fan, light and device tracker entities, and forwards
//! actions back to the devices.

pub mod capability;
pub mod client;
mod config;
pub mod coordinator;
pub mod decode;
pub mod dispatch;
pub mod entity;
mod error;
pub mod materialize;
#[allow(clippy::module_inception)]
mod miele;
pub mod model;
pub mod snapshot;

use std::sync::Arc;

use anyhow::Context;
pub use config::Config;
pub use error::Error;
pub use error::Result;
use linkme::distributed_slice;
pub use miele::MieleIntegration;
pub use miele::NAME;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_miele(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let miele_config = if let Some(c) = &ctx.config.integrations.miele {
        c
    } else {
        return Ok(None);
    };

    let transport =
        client::ReqwestTransport::new(miele_config).context("Failed to create Miele HTTP client")?;
    let previously = ctx.registry.registered(NAME);
    tracing::debug!(
        "Miele has {} previously registered entities",
        previously.values().map(|ids| ids.len()).sum::<usize>()
    );

    Ok(Some(Box::new(MieleIntegration::new(
        Arc::new(transport),
        miele_config,
        ctx.registry.clone(),
    ))))
}
