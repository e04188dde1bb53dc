//! Application state provider for dependency injection.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, config::ConfigManager, providers::traits::AsyncProvider};

/// Opens the store, flag directory, pin factory and executor named by the
/// settings.
pub struct AppStateProvider {
    config_manager: ConfigManager,
}

impl AppStateProvider {
    pub const fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = AppState::new(self.config_manager.clone()).await?;
        Ok(Arc::new(app_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FactoryKind};

    #[tokio::test]
    async fn provides_state_for_mock_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            factory: FactoryKind::Mock,
            store_path: dir.path().join("buttons.yml"),
            flag_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let state = AppStateProvider::new(ConfigManager::new(config, None))
            .provide()
            .await
            .unwrap();
        assert_eq!(state.factory.name(), "mock");
    }
}
