use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::StoreError;
use crate::models::{SettingsFile, StoreFile};
use crate::store::TodoStore;

const DATA_FILE: &str = "data.json";
const SETTINGS_FILE: &str = "settings.json";
const BACKUP_DIR: &str = "backups";
const EXPORT_DIR: &str = "exports";
const BACKUP_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Import(#[from] StoreError),
}

/// File-backed persistence rooted at one directory.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(BACKUP_DIR))?;
        Ok(())
    }

    /// Loads and validates `data.json`. A missing file is an empty store.
    pub fn load_store(&self) -> Result<TodoStore, StorageError> {
        match fs::read_to_string(self.root.join(DATA_FILE)) {
            Ok(text) => Ok(TodoStore::import_json(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(TodoStore::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn load_settings(&self) -> Result<SettingsFile, StorageError> {
        self.load_json(self.root.join(SETTINGS_FILE))
    }

    pub fn save_store(&self, data: &StoreFile, with_backup: bool) -> Result<(), StorageError> {
        if with_backup {
            return self.write_with_backup(DATA_FILE, data);
        }
        self.write_atomic(self.root.join(DATA_FILE), data)
    }

    pub fn save_settings(&self, data: &SettingsFile) -> Result<(), StorageError> {
        self.write_atomic(self.root.join(SETTINGS_FILE), data)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    fn write_with_backup<T: Serialize>(
        &self,
        filename: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let path = self.root.join(filename);
        if path.exists() {
            self.create_backup(&path)?;
        }
        self.write_atomic(path, data)
    }

    fn write_atomic<T: Serialize>(&self, path: PathBuf, data: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(data)?;
        write_atomic_bytes(&path, &json)
    }

    pub fn create_backup(&self, path: &Path) -> Result<(), StorageError> {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S%3f").to_string();
        let backup_name = format!("data-{timestamp}.json");
        let backup_path = self.root.join(BACKUP_DIR).join(backup_name);
        fs::copy(path, backup_path)?;
        self.trim_backups()?;
        Ok(())
    }

    /// Copies the current data file into the backup rotation.
    pub fn backup_now(&self) -> Result<(), StorageError> {
        self.ensure_dirs()?;
        let path = self.root.join(DATA_FILE);
        if path.exists() {
            self.create_backup(&path)?;
        }
        Ok(())
    }

    pub fn list_backups(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let mut entries: Vec<_> = fs::read_dir(self.root.join(BACKUP_DIR))?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok());
        let mut results = Vec::new();
        for entry in entries {
            if let Some(name) = entry.file_name().to_str() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|dur| dur.as_secs() as i64)
                    .unwrap_or(0);
                results.push((name.to_string(), modified));
            }
        }
        Ok(results)
    }

    /// Validates a backup and makes it the current data file.
    pub fn restore_backup(&self, filename: &str) -> Result<TodoStore, StorageError> {
        if filename.contains(['/', '\\']) || filename.contains("..") {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid backup name: {filename}"),
            )));
        }
        self.restore_from_path(&self.root.join(BACKUP_DIR).join(filename))
    }

    /// Validates an export document at `source` and makes it the current data file. Nothing is
    /// written when validation fails.
    pub fn restore_from_path(&self, source: &Path) -> Result<TodoStore, StorageError> {
        let text = fs::read_to_string(source)?;
        let store = TodoStore::import_json(&text)?;
        write_atomic_bytes(&self.root.join(DATA_FILE), text.as_bytes())?;
        Ok(store)
    }

    /// Writes `data` to `exports/todo-store-<stamp>.json` and returns the path.
    pub fn export(&self, data: &StoreFile) -> Result<PathBuf, StorageError> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let path = self
            .root
            .join(EXPORT_DIR)
            .join(format!("todo-store-{stamp}.json"));
        self.write_atomic(path.clone(), data)?;
        Ok(path)
    }

    fn trim_backups(&self) -> Result<(), StorageError> {
        let mut entries: Vec<_> = fs::read_dir(self.root.join(BACKUP_DIR))?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.file_name());
        let to_remove = entries.len().saturating_sub(BACKUP_LIMIT);
        for entry in entries.into_iter().take(to_remove) {
            let path = entry.path();
            if let Err(error) = fs::remove_file(&path) {
                log::warn!("backup trim failed path={} error={error}", path.display());
            }
        }
        Ok(())
    }
}

fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Settings};
    use chrono::NaiveDate;

    fn sample_store() -> TodoStore {
        let mut store = TodoStore::default();
        store
            .add_task(NewTask::new("a", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()))
            .unwrap();
        store
    }

    #[test]
    fn missing_data_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        assert_eq!(storage.load_store().unwrap(), TodoStore::default());
        assert!(storage.load_settings().is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        let store = sample_store();

        storage.save_store(&store.export(1), false).unwrap();
        assert_eq!(storage.load_store().unwrap(), store);
        assert!(!dir.path().join("data.tmp").exists());

        let settings = SettingsFile {
            schema_version: 1,
            settings: Settings::default(),
        };
        storage.save_settings(&settings).unwrap();
        assert_eq!(storage.load_settings().unwrap().settings, Settings::default());
    }

    #[test]
    fn invalid_data_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        fs::write(dir.path().join("data.json"), r#"{ "data": { "todos": [] } }"#).unwrap();
        assert!(matches!(
            storage.load_store(),
            Err(StorageError::Import(StoreError::InvalidImportPayload(_)))
        ));
    }

    #[test]
    fn backups_rotate_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        let store = sample_store();

        storage.save_store(&store.export(1), false).unwrap();
        for _ in 0..(BACKUP_LIMIT + 2) {
            storage.save_store(&store.export(2), true).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let backups = storage.list_backups().unwrap();
        assert_eq!(backups.len(), BACKUP_LIMIT);

        storage
            .save_store(&TodoStore::default().export(3), false)
            .unwrap();
        let restored = storage.restore_backup(&backups[0].0).unwrap();
        assert_eq!(restored, store);
        assert_eq!(storage.load_store().unwrap(), store);
    }

    #[test]
    fn restore_rejects_path_like_names_and_bad_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        assert!(storage.restore_backup("../data.json").is_err());

        storage.save_store(&sample_store().export(1), false).unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{ "data": { "todos": [], "categories": {} } }"#).unwrap();
        assert!(storage.restore_from_path(&bad).is_err());

        // The current data survives a rejected import.
        let loaded = storage.load_store().unwrap();
        assert_eq!(loaded.todos().len(), 1);
        assert_eq!(loaded.todos()[0].title, "a");
    }

    #[test]
    fn export_writes_into_exports_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let path = storage.export(&sample_store().export(5)).unwrap();
        assert!(path.starts_with(dir.path().join("exports")));
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(TodoStore::import_json(&text).unwrap().todos().len(), 1);
    }
}
