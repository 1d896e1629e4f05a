//! rcluster - ad-hoc compute clusters for parallel R sessions.
//!
//! Launches one manager and N workers on a cloud provider, bootstraps them
//! over SSH, writes a hostfile listing one line per worker core, and hands
//! back the manager's interactive endpoint.
//!
//! # Architecture
//!
//! Hexagonal layout:
//!
//! - [`domain`] - nodes and their state machine, sessions, hostfiles, bootstrap plans
//! - [`port`] - traits at the edges: [`port::CloudProvider`], [`port::NodeConfigurator`], [`port::SessionStore`]
//! - [`application`] - the [`application::ClusterOrchestrator`] and per-node provisioning
//! - [`adapter`] - the `aws` CLI provider, the `ssh` configurator, the JSON session store, and the CLI
//! - [`infrastructure`] - configuration, logging and wiring
//!
//! # Example
//!
//! ```no_run
//! use rcluster::application::LaunchRequest;
//! use rcluster::infrastructure::bootstrap::build_orchestrator;
//! use rcluster::infrastructure::config::Config;
//!
//! # async fn run() -> rcluster::error::Result<()> {
//! let config = Config::load("config.toml")?;
//! let orchestrator = build_orchestrator(&config)?;
//! let report = orchestrator
//!     .launch(LaunchRequest {
//!         workers: 3,
//!         image_id: config.image_id(None)?,
//!     })
//!     .await?;
//! println!("{}", report.endpoint.url());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
