//! Application state and global context management.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    config::{Config, ConfigManager, ExecutorKind, FactoryKind},
    dispatch::{ActionExecutor, LogExecutor, ProcessExecutor},
    error::FactoryError,
    gpio::{MockFactory, PinFactory, SysfsFactory},
    platform::Platform,
    signal::{ChangeSignalStore, FileFlagStore},
    store::{ConfigurationStore, FileStore},
};

/// Shared application state of the running daemon.
///
/// Everything the services need is behind a trait object so tests and
/// embedders can inject in-memory stores and the mock factory.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub store: Arc<dyn ConfigurationStore>,
    pub flags: Arc<dyn ChangeSignalStore>,
    pub factory: Arc<dyn PinFactory>,
    pub executor: Arc<dyn ActionExecutor>,
    pub platform: Platform,
}

impl AppState {
    /// Builds the daemon's components from the loaded settings.
    ///
    /// Fails when the selected pin factory cannot be opened; the daemon does
    /// not start without hardware access.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let platform = Platform::detect();
        info!("Detected platform: {platform}");

        let factory = open_factory(&config, platform).context("Failed to open pin factory")?;

        Ok(Self {
            store: open_store(&config),
            flags: open_flags(&config),
            factory,
            executor: build_executor(config.executor),
            platform,
            config_manager: Arc::new(config_manager),
        })
    }

    /// Assembles state from ready-made components.
    pub fn from_parts(
        config_manager: ConfigManager,
        store: Arc<dyn ConfigurationStore>,
        flags: Arc<dyn ChangeSignalStore>,
        factory: Arc<dyn PinFactory>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            config_manager: Arc::new(config_manager),
            store,
            flags,
            factory,
            executor,
            platform: Platform::Unsupported,
        }
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }
}

pub fn open_store(config: &Config) -> Arc<dyn ConfigurationStore> {
    Arc::new(FileStore::new(&config.store_path))
}

pub fn open_flags(config: &Config) -> Arc<dyn ChangeSignalStore> {
    Arc::new(FileFlagStore::new(&config.flag_dir))
}

/// Opens the pin factory the settings ask for.
///
/// `auto` simulates pins on unsupported hosts and uses sysfs elsewhere.
pub fn open_factory(
    config: &Config,
    platform: Platform,
) -> Result<Arc<dyn PinFactory>, FactoryError> {
    let use_sysfs = match config.factory {
        FactoryKind::Mock => false,
        FactoryKind::Sysfs => true,
        FactoryKind::Auto => platform.is_supported(),
    };

    if !use_sysfs {
        if config.factory == FactoryKind::Auto {
            warn!("System not supported, using mock pin factory");
        }
        return Ok(Arc::new(MockFactory::new()));
    }

    let factory = SysfsFactory::open(&config.sysfs_root, config.sample_interval())?;
    Ok(Arc::new(factory))
}

pub fn build_executor(kind: ExecutorKind) -> Arc<dyn ActionExecutor> {
    match kind {
        ExecutorKind::Log => Arc::new(LogExecutor),
        ExecutorKind::Process => Arc::new(ProcessExecutor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn auto_factory_is_simulated_on_unsupported_hosts() {
        let factory = open_factory(&Config::default(), Platform::Unsupported).unwrap();
        assert_eq!(factory.name(), "mock");
    }

    #[test]
    fn missing_sysfs_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            factory: FactoryKind::Sysfs,
            sysfs_root: dir.path().join("absent"),
            ..Config::default()
        };

        let result = open_factory(&config, Platform::Raspbian);
        assert!(matches!(result, Err(FactoryError::Unavailable { .. })));
    }

    #[test]
    fn auto_factory_uses_sysfs_on_supported_hosts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        let config = Config {
            sysfs_root: dir.path().to_path_buf(),
            ..Config::default()
        };

        let factory = open_factory(&config, Platform::LibreElec).unwrap();
        assert_eq!(factory.name(), "sysfs");
    }

    #[tokio::test]
    async fn state_from_settings_uses_file_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            factory: FactoryKind::Mock,
            store_path: dir.path().join("buttons.yml"),
            flag_dir: dir.path().join("flags"),
            ..Config::default()
        };

        let state = AppState::new(ConfigManager::new(config, None)).await.unwrap();

        assert!(state.store.list_all().await.unwrap().is_empty());
        assert!(!state.flags.get_flag("gpio_reload").await.unwrap());
        assert_eq!(state.factory.name(), "mock");
        assert_eq!(state.config().await.factory, FactoryKind::Mock);
    }
}
