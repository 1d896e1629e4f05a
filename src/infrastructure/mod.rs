//! Infrastructure layer.
//!
//! Technical concerns that support the application without containing
//! cluster logic.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Composition root wiring adapters into the orchestrator
//! - [`config`] - Configuration loading, validation and logging setup

pub mod bootstrap;
pub mod config;
