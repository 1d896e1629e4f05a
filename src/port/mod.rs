//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! Ports are the seams where the orchestrator meets the outside world.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │      Application        │
//!     ┌──────────────┤  Domain + Port          ├──────────────┐
//!     │              └─────────────────────────┘              │
//!     ▼                         ▼                             ▼
//! ┌─────────┐            ┌─────────────┐              ┌──────────────┐
//! │ Cloud   │            │  Session    │              │ Node         │
//! │Provider │            │  Store      │              │ Configurator │
//! └─────────┘            └─────────────┘              └──────────────┘
//! ```
//!
//! # Available Ports
//!
//! - [`CloudProvider`] - launch/describe/terminate/tag instances
//! - [`NodeConfigurator`] - run bootstrap steps on a reachable node
//! - [`SessionStore`] - persist the single active session per account

mod configurator;
mod provider;
mod store;

pub use configurator::NodeConfigurator;
pub use provider::{AddressKind, CloudProvider, InstanceState, InstanceStatus, NodeHandle};
pub use store::SessionStore;
