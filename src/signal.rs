//! Change-signal protocol between the control process and the daemon.
//!
//! The control process mutates binding rows, then sets a named flag. The
//! daemon clears the flag at the start of every reconciliation pass, before
//! it reads any row, so a mutation that lands mid-pass is picked up by the
//! next one. Passes are full rebuilds, which makes duplicate or coalesced
//! signals harmless.

use std::{io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use tokio::fs;

use crate::error::StoreError;

/// Flag polled by the daemon.
pub const DEFAULT_FLAG: &str = "gpio_reload";

/// Shared boolean flags visible to both processes.
#[async_trait]
pub trait ChangeSignalStore: Send + Sync {
    async fn get_flag(&self, name: &str) -> Result<bool, StoreError>;

    async fn set_flag(&self, name: &str, value: bool) -> Result<(), StoreError>;

    async fn clear(&self, name: &str) -> Result<(), StoreError> {
        self.set_flag(name, false).await
    }
}

fn check_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidFlagName(name.to_string()))
    }
}

/// Flags stored as marker files: `<dir>/<name>.flag` exists while set.
#[derive(Debug, Clone)]
pub struct FileFlagStore {
    dir: PathBuf,
}

impl FileFlagStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn flag_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        check_name(name)?;
        Ok(self.dir.join(format!("{name}.flag")))
    }
}

#[async_trait]
impl ChangeSignalStore for FileFlagStore {
    async fn get_flag(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.flag_path(name)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    async fn set_flag(&self, name: &str, value: bool) -> Result<(), StoreError> {
        let path = self.flag_path(name)?;

        if value {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| StoreError::io(&self.dir, e))?;
            fs::write(&path, b"1")
                .await
                .map_err(|e| StoreError::io(&path, e))
        } else {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::io(&path, e)),
            }
        }
    }
}

/// Flags kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: DashMap<String, bool>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeSignalStore for MemoryFlagStore {
    async fn get_flag(&self, name: &str) -> Result<bool, StoreError> {
        check_name(name)?;
        Ok(self.flags.get(name).is_some_and(|flag| *flag))
    }

    async fn set_flag(&self, name: &str, value: bool) -> Result<(), StoreError> {
        check_name(name)?;
        self.flags.insert(name.to_string(), value);
        Ok(())
    }
}

/// Asks the daemon for a new reconciliation pass.
///
/// Honoured within one poll interval of the daemon.
pub async fn request_reconfiguration(
    store: &dyn ChangeSignalStore,
    name: &str,
) -> Result<(), StoreError> {
    store.set_flag(name, true).await?;
    info!("Reconfiguration requested via flag '{name}'");
    Ok(())
}

/// Bounded wait for the daemon to acknowledge a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ReloadWait {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// Sets the flag, then polls until the daemon clears it.
///
/// Returns `Ok(false)` when the daemon did not pick the request up in time;
/// the flag stays set and will still be honoured.
pub async fn request_and_wait(
    store: &dyn ChangeSignalStore,
    name: &str,
    wait: ReloadWait,
) -> Result<bool, StoreError> {
    request_reconfiguration(store, name).await?;

    for attempt in 1..=wait.attempts {
        tokio::time::sleep(wait.interval).await;
        if !store.get_flag(name).await? {
            debug!("Flag '{name}' acknowledged after {attempt} check(s)");
            return Ok(true);
        }
    }

    debug!("Flag '{name}' still pending after {} check(s)", wait.attempts);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn file_flag_set_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFlagStore::new(dir.path().join("flags"));

        assert!(!store.get_flag(DEFAULT_FLAG).await.unwrap());
        store.set_flag(DEFAULT_FLAG, true).await.unwrap();
        store.set_flag(DEFAULT_FLAG, true).await.unwrap();
        assert!(store.get_flag(DEFAULT_FLAG).await.unwrap());
        assert!(dir.path().join("flags/gpio_reload.flag").exists());

        store.clear(DEFAULT_FLAG).await.unwrap();
        store.clear(DEFAULT_FLAG).await.unwrap();
        assert!(!store.get_flag(DEFAULT_FLAG).await.unwrap());
    }

    #[tokio::test]
    async fn flag_names_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFlagStore::new(dir.path());

        for name in ["", "../reload", "a/b", "x y"] {
            assert!(matches!(
                store.set_flag(name, true).await,
                Err(StoreError::InvalidFlagName(_))
            ));
        }
    }

    #[tokio::test]
    async fn memory_flags_are_independent() {
        let store = MemoryFlagStore::new();
        store.set_flag("a", true).await.unwrap();

        assert!(store.get_flag("a").await.unwrap());
        assert!(!store.get_flag("b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_error() {
        let store = MemoryFlagStore::new();
        let acknowledged = request_and_wait(&store, DEFAULT_FLAG, ReloadWait::default())
            .await
            .unwrap();

        assert!(!acknowledged);
        assert!(store.get_flag(DEFAULT_FLAG).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_flag_is_cleared() {
        let store = Arc::new(MemoryFlagStore::new());
        let daemon = store.clone();

        let responder = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(300)).await;
                if daemon.get_flag(DEFAULT_FLAG).await.unwrap() {
                    daemon.clear(DEFAULT_FLAG).await.unwrap();
                    break;
                }
            }
        });

        let acknowledged = request_and_wait(store.as_ref(), DEFAULT_FLAG, ReloadWait::default())
            .await
            .unwrap();
        assert!(acknowledged);
        responder.await.unwrap();
    }
}
