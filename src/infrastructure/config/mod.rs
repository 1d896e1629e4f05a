//! Infrastructure configuration modules.

pub mod bootstrap;
pub mod logging;
pub mod provider;
pub mod provisioning;
pub mod settings;

pub use settings::Config;
