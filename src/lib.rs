//! # gpio_monitord
//!
//! A Linux daemon that binds GPIO inputs to user-configured actions and
//! keeps those bindings in line with a persistent store.
//!
//! ## Architecture
//!
//! Two processes share the binding store and a change flag:
//!
//! - the daemon ([`Application`](application::Application)) runs the
//!   [`Reconciler`](reconcile::Reconciler), which rebuilds every pin binding
//!   whenever the flag is raised and records each row's status;
//! - short-lived control commands ([`control`]) edit and inspect the store
//!   and raise the flag through
//!   [`request_reconfiguration`](signal::request_reconfiguration).
//!
//! Hardware sits behind [`PinFactory`](gpio::PinFactory), actions behind
//! [`ActionExecutor`](dispatch::ActionExecutor).
//!
//! ## Example
//!
//! ```no_run
//! use gpio_monitord::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod binding;
pub mod cli;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gpio;
pub mod install;
pub mod logging;
pub mod platform;
pub mod providers;
pub mod reconcile;
pub mod signal;
pub mod store;
pub mod task_manager;
