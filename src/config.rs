//! Configuration management for the gpio_monitord daemon.
//!
//! Daemon settings live in a small YAML file. Button bindings are not part of
//! it; they are kept in the binding store that `store_path` points to.

use anyhow::{Context, Result};
use log::{LevelFilter, info};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

use crate::{
    install::{DEFAULT_RULES_PATH, DEFAULT_RULES_SOURCE},
    reconcile::ReconcilerSettings,
    signal::ReloadWait,
};

pub const CONFIG_ENV: &str = "GPIO_MONITORD_CONFIG";

/// Daemon settings.
///
/// # Example
///
/// ```yaml
/// version: 1
/// poll_interval_ms: 1000
/// store_path: /var/lib/gpio_monitord/buttons.yml
/// flag_dir: /run/gpio_monitord
/// factory: auto
/// executor: process
/// log_level: info
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// How often the daemon checks the change flag while watching.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// YAML document holding the button bindings.
    #[serde(default = "defaults::store_path")]
    pub store_path: PathBuf,

    /// Directory shared with control processes for change flags.
    #[serde(default = "defaults::flag_dir")]
    pub flag_dir: PathBuf,

    #[serde(default = "defaults::flag_name")]
    pub flag_name: String,

    #[serde(default)]
    pub factory: FactoryKind,

    /// Root of the sysfs GPIO class.
    #[serde(default = "defaults::sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Input sampling period of the sysfs factory.
    #[serde(default = "defaults::sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default)]
    pub executor: ExecutorKind,

    /// udev rule shipped with the package.
    #[serde(default = "defaults::rules_source")]
    pub rules_source: PathBuf,

    /// Where the installer puts the udev rule.
    #[serde(default = "defaults::rules_path")]
    pub rules_path: PathBuf,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    /// Checks made by `reload` while waiting for the daemon.
    #[serde(default = "defaults::reload_attempts")]
    pub reload_attempts: u32,

    #[serde(default = "defaults::reload_interval_ms")]
    pub reload_interval_ms: u64,

    /// Request a reload after every button edit made from the command line.
    #[serde(default = "defaults::auto_reload")]
    pub auto_reload: bool,
}

/// Which pin factory the daemon drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoryKind {
    /// sysfs on supported platforms, otherwise simulated.
    #[default]
    Auto,
    Mock,
    Sysfs,
}

/// How configured actions are carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Log,
    #[default]
    Process,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            poll_interval_ms: defaults::poll_interval_ms(),
            store_path: defaults::store_path(),
            flag_dir: defaults::flag_dir(),
            flag_name: defaults::flag_name(),
            factory: FactoryKind::default(),
            sysfs_root: defaults::sysfs_root(),
            sample_interval_ms: defaults::sample_interval_ms(),
            executor: ExecutorKind::default(),
            rules_source: defaults::rules_source(),
            rules_path: defaults::rules_path(),
            log_level: defaults::log_level(),
            reload_attempts: defaults::reload_attempts(),
            reload_interval_ms: defaults::reload_interval_ms(),
            auto_reload: defaults::auto_reload(),
        }
    }
}

impl Config {
    /// Validates the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            anyhow::bail!("Unsupported config version {}", self.version);
        }

        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("sample_interval_ms", self.sample_interval_ms),
            ("reload_interval_ms", self.reload_interval_ms),
        ] {
            if value == 0 {
                anyhow::bail!("'{name}' must be greater than zero");
            }
        }

        let flag_ok = !self.flag_name.is_empty()
            && self
                .flag_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !flag_ok {
            anyhow::bail!("Invalid flag name '{}'", self.flag_name);
        }

        if self.store_path.as_os_str().is_empty() {
            anyhow::bail!("'store_path' cannot be empty");
        }

        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .with_context(|| format!("Unknown log level '{}'", self.log_level))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            poll_interval: self.poll_interval(),
            flag_name: self.flag_name.clone(),
        }
    }

    pub fn reload_wait(&self) -> ReloadWait {
        ReloadWait {
            attempts: self.reload_attempts,
            interval: Duration::from_millis(self.reload_interval_ms),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn poll_interval_ms() -> u64 {
        1000
    }

    pub fn store_path() -> PathBuf {
        PathBuf::from("/var/lib/gpio_monitord/buttons.yml")
    }

    pub fn flag_dir() -> PathBuf {
        PathBuf::from("/run/gpio_monitord")
    }

    pub fn flag_name() -> String {
        crate::signal::DEFAULT_FLAG.to_string()
    }

    pub fn sysfs_root() -> PathBuf {
        PathBuf::from(crate::gpio::sysfs::DEFAULT_ROOT)
    }

    pub fn sample_interval_ms() -> u64 {
        10
    }

    pub fn rules_source() -> PathBuf {
        PathBuf::from(super::DEFAULT_RULES_SOURCE)
    }

    pub fn rules_path() -> PathBuf {
        PathBuf::from(super::DEFAULT_RULES_PATH)
    }

    pub fn log_level() -> String {
        "info".to_string()
    }

    pub fn reload_attempts() -> u32 {
        5
    }

    pub fn reload_interval_ms() -> u64 {
        1000
    }

    pub fn auto_reload() -> bool {
        true
    }
}

fn locate_config() -> Option<PathBuf> {
    // 2) ENV
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    // 3) XDG_CONFIG_HOME or $HOME/.config
    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("gpio_monitord/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    // 4) /etc
    let etc = Path::new("/etc/gpio_monitord/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Shared handle on the loaded settings.
///
/// # Example
///
/// ```no_run
/// use gpio_monitord::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let poll = config_manager.get().await.poll_interval();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads settings from file or standard locations.
    ///
    /// Searches in the following order:
    /// 1. Provided path parameter
    /// 2. GPIO_MONITORD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/gpio_monitord/config.yml or ~/.config/gpio_monitord/config.yml
    /// 4. /etc/gpio_monitord/config.yml
    ///
    /// Falls back to defaults when none of them exists.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using defaults");
            return Ok(Self::new(Config::default(), None));
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, Some(config_path)))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// File the settings came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current settings.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::block_on;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn config_load_valid_yaml() {
        let temp_file = create_temp_config(
            r#"
version: 1
poll_interval_ms: 250
store_path: /tmp/buttons.yml
flag_name: my-reload
factory: mock
executor: log
log_level: debug
reload_attempts: 3
auto_reload: false
"#,
        );

        let config_manager =
            block_on(ConfigManager::load(Some(temp_file.path().to_path_buf()))).unwrap();
        let config = block_on(config_manager.clone_config());

        assert_eq!(config_manager.path(), Some(temp_file.path()));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.store_path, PathBuf::from("/tmp/buttons.yml"));
        assert_eq!(config.factory, FactoryKind::Mock);
        assert_eq!(config.executor, ExecutorKind::Log);
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);
        assert_eq!(config.reconciler_settings().flag_name, "my-reload");
        assert_eq!(
            config.reload_wait(),
            ReloadWait {
                attempts: 3,
                interval: Duration::from_secs(1)
            }
        );
        assert_eq!(config.sample_interval(), Duration::from_millis(10));
        assert!(!config.auto_reload);
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let temp_file = create_temp_config("version: 1\n");
        let config = block_on(ConfigManager::load(Some(temp_file.path().to_path_buf())))
            .unwrap();

        assert_eq!(block_on(config.clone_config()), Config::default());
    }

    #[test]
    fn unsupported_version_rejected() {
        let temp_file = create_temp_config("version: 2\n");
        let err = block_on(ConfigManager::load(Some(temp_file.path().to_path_buf())))
            .unwrap_err();

        assert!(format!("{err:#}").contains("Unsupported config version 2"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases = [
            Config {
                poll_interval_ms: 0,
                ..Config::default()
            },
            Config {
                flag_name: "../x".into(),
                ..Config::default()
            },
            Config {
                log_level: "loud".into(),
                ..Config::default()
            },
            Config {
                store_path: PathBuf::new(),
                ..Config::default()
            },
        ];

        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = block_on(ConfigManager::load(Some(dir.path().join("absent.yml"))));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn env_variable_selects_file() {
        let temp_file = create_temp_config("version: 1\npoll_interval_ms: 42\n");
        unsafe { env::set_var(CONFIG_ENV, temp_file.path()) };

        let config = block_on(ConfigManager::load(None));
        unsafe { env::remove_var(CONFIG_ENV) };

        assert_eq!(block_on(config.unwrap().get()).poll_interval_ms, 42);
    }

    #[test]
    #[serial]
    fn xdg_location_is_searched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("gpio_monitord")).unwrap();
        fs::write(
            dir.path().join("gpio_monitord/config.yml"),
            "version: 1\nexecutor: log\n",
        )
        .unwrap();

        unsafe {
            env::remove_var(CONFIG_ENV);
            env::set_var("XDG_CONFIG_HOME", dir.path());
        }
        let located = locate_config();
        unsafe { env::remove_var("XDG_CONFIG_HOME") };

        assert_eq!(located, Some(dir.path().join("gpio_monitord/config.yml")));
    }
}
