//! Application entry point and builder pattern implementation.

use std::sync::Arc;

use crate::{app_context::AppState, config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::Result;

/// The daemon: initialization, services, main loop.
///
/// # Example
///
/// ```no_run
/// use gpio_monitord::application::Application;
/// use gpio_monitord::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    coordinator: SystemCoordinator,
    source: StateSource,
}

enum StateSource {
    Config(ConfigManager),
    Ready(Arc<AppState>),
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// Runs the complete daemon lifecycle until shutdown is requested.
    pub async fn run(&mut self) -> Result<()> {
        match &self.source {
            StateSource::Config(config_manager) => {
                self.coordinator.initialize(config_manager.clone()).await?;
            }
            StateSource::Ready(state) => self.coordinator.initialize_with_state(state.clone()),
        }

        self.coordinator.start_all_services().await?;
        self.coordinator.run_main_loop().await
    }

    pub fn coordinator(&self) -> &SystemCoordinator {
        &self.coordinator
    }
}

/// Fluent configuration of an [`Application`] before startup.
#[derive(Default)]
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    state: Option<Arc<AppState>>,
}

impl ApplicationBuilder {
    /// Builds state from these settings at startup.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Uses prepared state instead of opening hardware from settings.
    pub fn with_state(mut self, state: Arc<AppState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Application> {
        let source = match (self.state, self.config_manager) {
            (Some(state), _) => StateSource::Ready(state),
            (None, Some(config_manager)) => StateSource::Config(config_manager),
            (None, None) => anyhow::bail!("Configuration manager is required"),
        };

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            source,
        })
    }
}
