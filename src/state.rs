use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::models::{now_millis, Settings, SettingsFile, StoreFile};
use crate::repeat::ProjectionOptions;
use crate::store::TodoStore;

const SCHEMA_VERSION: u32 = 1;

/// Shared handle to the one live store. Every write funnels through [`AppState::mutate`].
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<AppData>>,
}

impl AppState {
    pub fn new(store: TodoStore, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppData { store, settings })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AppData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store_file(&self) -> StoreFile {
        self.lock().store.export(now_millis())
    }

    pub fn settings_file(&self) -> SettingsFile {
        SettingsFile {
            schema_version: SCHEMA_VERSION,
            settings: self.lock().settings.clone(),
        }
    }

    pub fn snapshot(&self) -> TodoStore {
        self.lock().store.clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&TodoStore) -> R) -> R {
        f(&self.lock().store)
    }

    /// Runs `f` against a copy of the store and commits the copy only if `f` succeeds, so a
    /// failed operation is never half-applied.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TodoStore) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.lock();
        let mut next = guard.store.clone();
        let out = f(&mut next)?;
        guard.store = next;
        Ok(out)
    }

    pub fn replace_store(&self, store: TodoStore) {
        self.lock().store = store;
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    pub fn update_settings(&self, settings: Settings) {
        self.lock().settings = settings;
    }

    pub fn projection_options(&self) -> ProjectionOptions {
        ProjectionOptions::from(&self.lock().settings)
    }
}

#[derive(Debug)]
struct AppData {
    store: TodoStore,
    settings: Settings,
}
