//! Configuration store holding the button binding rows.
//!
//! The store is shared between the daemon and the control process with no
//! locking beyond per-write atomicity; the last writer wins.

use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::{fs, sync::Mutex};

use crate::{
    binding::{ButtonBinding, Status},
    error::StoreError,
};

/// Persisted table of button bindings.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Every row, ordered by id.
    async fn list_all(&self) -> Result<Vec<ButtonBinding>, StoreError>;

    /// Enabled rows, ordered by id.
    async fn list_enabled(&self) -> Result<Vec<ButtonBinding>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|b| b.enabled)
            .collect())
    }

    /// Disabled rows, ordered by id.
    async fn list_disabled(&self) -> Result<Vec<ButtonBinding>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|b| !b.enabled)
            .collect())
    }

    async fn get(&self, id: u32) -> Result<Option<ButtonBinding>, StoreError> {
        Ok(self.list_all().await?.into_iter().find(|b| b.id == id))
    }

    /// Sets `status` on every row whose `enabled` matches, in one write.
    /// Returns the number of rows touched.
    async fn bulk_set_status(
        &self,
        enabled: bool,
        status: Status,
        clear_error: bool,
    ) -> Result<usize, StoreError>;

    /// Writes the whole row. Returns false if the row no longer exists.
    async fn save(&self, binding: &ButtonBinding) -> Result<bool, StoreError>;

    /// Writes only `status` and `last_error` of the row, leaving fields owned
    /// by the control process untouched. Returns false if the row is gone.
    async fn save_status(&self, binding: &ButtonBinding) -> Result<bool, StoreError>;

    /// Writes every field except `status` and `last_error`, which belong to
    /// the daemon. Returns false if the row is gone.
    async fn save_settings(&self, binding: &ButtonBinding) -> Result<bool, StoreError>;

    /// Adds a row, assigning a fresh id.
    async fn insert(&self, binding: ButtonBinding) -> Result<ButtonBinding, StoreError>;

    /// Removes a row. Returns false if it did not exist.
    async fn delete(&self, id: u32) -> Result<bool, StoreError>;
}

/// On-disk layout shared by the store implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub next_id: u32,
    #[serde(default)]
    pub buttons: Vec<ButtonBinding>,
}

impl StoreDocument {
    fn sorted(&self) -> Vec<ButtonBinding> {
        let mut rows = self.buttons.clone();
        rows.sort_by_key(|b| b.id);
        rows
    }

    fn row_mut(&mut self, id: u32) -> Option<&mut ButtonBinding> {
        self.buttons.iter_mut().find(|b| b.id == id)
    }

    fn bulk_set_status(&mut self, enabled: bool, status: Status, clear_error: bool) -> usize {
        self.buttons
            .iter_mut()
            .filter(|b| b.enabled == enabled)
            .map(|b| {
                b.status = status;
                if clear_error {
                    b.last_error = None;
                }
            })
            .count()
    }

    fn save(&mut self, binding: &ButtonBinding) -> bool {
        match self.row_mut(binding.id) {
            Some(row) => {
                *row = binding.clone();
                true
            }
            None => false,
        }
    }

    fn save_status(&mut self, binding: &ButtonBinding) -> bool {
        match self.row_mut(binding.id) {
            Some(row) => {
                row.status = binding.status;
                row.last_error = binding.last_error.clone();
                true
            }
            None => false,
        }
    }

    fn save_settings(&mut self, binding: &ButtonBinding) -> bool {
        match self.row_mut(binding.id) {
            Some(row) => {
                let status = row.status;
                let last_error = row.last_error.take();
                *row = binding.clone();
                row.status = status;
                row.last_error = last_error;
                true
            }
            None => false,
        }
    }

    /// Gives rows without an id, or with an id an earlier row already holds,
    /// a fresh one. Returns true if any row changed.
    fn repair_ids(&mut self) -> bool {
        let mut seen = HashSet::new();
        let stale: Vec<usize> = self
            .buttons
            .iter()
            .enumerate()
            .filter(|(_, b)| b.id == 0 || !seen.insert(b.id))
            .map(|(index, _)| index)
            .collect();
        if stale.is_empty() {
            return false;
        }

        let max_id = self.buttons.iter().map(|b| b.id).max().unwrap_or(0);
        let mut next = self.next_id.max(max_id);
        for index in stale {
            next += 1;
            self.buttons[index].id = next;
        }
        self.next_id = next;
        true
    }

    fn insert(&mut self, mut binding: ButtonBinding) -> ButtonBinding {
        let max_id = self.buttons.iter().map(|b| b.id).max().unwrap_or(0);
        self.next_id = self.next_id.max(max_id) + 1;
        binding.id = self.next_id;
        self.buttons.push(binding.clone());
        binding
    }

    fn delete(&mut self, id: u32) -> bool {
        let before = self.buttons.len();
        self.buttons.retain(|b| b.id != id);
        self.buttons.len() != before
    }
}

/// Store backed by a single YAML document.
///
/// Every mutation rereads the file, applies the change and replaces the file
/// through a uniquely named temporary sibling and a rename, so readers never
/// observe a partial document. Rows without a usable id get one on first
/// read and the document is rewritten with it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(content) => serde_yaml::from_str(&content).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let yaml = serde_yaml::to_string(doc)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(yaml.as_bytes())?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)
        .and_then(|written| written)
        .map_err(|e| StoreError::io(&self.path, e))?;

        debug!("store written to {}", self.path.display());
        Ok(())
    }

    async fn modify<T>(&self, change: impl FnOnce(&mut StoreDocument) -> T) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        doc.repair_ids();
        let result = change(&mut doc);
        self.persist(&doc).await?;
        Ok(result)
    }
}

#[async_trait]
impl ConfigurationStore for FileStore {
    async fn list_all(&self) -> Result<Vec<ButtonBinding>, StoreError> {
        let mut doc = self.load().await?;
        if doc.repair_ids() {
            return self.modify(|doc| doc.sorted()).await;
        }
        Ok(doc.sorted())
    }

    async fn bulk_set_status(
        &self,
        enabled: bool,
        status: Status,
        clear_error: bool,
    ) -> Result<usize, StoreError> {
        self.modify(|doc| doc.bulk_set_status(enabled, status, clear_error))
            .await
    }

    async fn save(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        self.modify(|doc| doc.save(binding)).await
    }

    async fn save_status(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        self.modify(|doc| doc.save_status(binding)).await
    }

    async fn save_settings(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        self.modify(|doc| doc.save_settings(binding)).await
    }

    async fn insert(&self, binding: ButtonBinding) -> Result<ButtonBinding, StoreError> {
        self.modify(|doc| doc.insert(binding)).await
    }

    async fn delete(&self, id: u32) -> Result<bool, StoreError> {
        self.modify(|doc| doc.delete(id)).await
    }
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `rows`, ids assigned in order.
    pub fn with_rows(rows: impl IntoIterator<Item = ButtonBinding>) -> Self {
        let mut doc = StoreDocument::default();
        for row in rows {
            doc.insert(row);
        }
        Self {
            doc: Mutex::new(doc),
        }
    }
}

#[async_trait]
impl ConfigurationStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<ButtonBinding>, StoreError> {
        Ok(self.doc.lock().await.sorted())
    }

    async fn bulk_set_status(
        &self,
        enabled: bool,
        status: Status,
        clear_error: bool,
    ) -> Result<usize, StoreError> {
        Ok(self
            .doc
            .lock()
            .await
            .bulk_set_status(enabled, status, clear_error))
    }

    async fn save(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        Ok(self.doc.lock().await.save(binding))
    }

    async fn save_status(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        Ok(self.doc.lock().await.save_status(binding))
    }

    async fn save_settings(&self, binding: &ButtonBinding) -> Result<bool, StoreError> {
        Ok(self.doc.lock().await.save_settings(binding))
    }

    async fn insert(&self, binding: ButtonBinding) -> Result<ButtonBinding, StoreError> {
        Ok(self.doc.lock().await.insert(binding))
    }

    async fn delete(&self, id: u32) -> Result<bool, StoreError> {
        Ok(self.doc.lock().await.delete(id))
    }
}
