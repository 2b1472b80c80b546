#[cfg(feature = "integration_miele")]
pub mod miele;
