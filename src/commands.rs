use chrono::{Datelike, Days, Local, NaiveDate, TimeZone};
use std::path::{Path, PathBuf};

use crate::categories::PurgeSummary;
use crate::error::StoreError;
use crate::events::StatePayload;
use crate::models::{
    now_millis, BackupSchedule, Category, NewTask, Settings, Tag, Task, TaskPatch, Timestamp,
};
use crate::occurrences::{OccurrenceId, VirtualOccurrence};
use crate::state::AppState;
use crate::storage::{Storage, StorageError};
use crate::store::{AgendaItem, CategoryContents, CategoryNode, TodoStore, TrashView};

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// What a host front-end supplies to the command layer.
pub trait CommandCtx {
    fn data_dir(&self) -> Result<PathBuf, StorageError>;
    fn emit_state_updated(&self, payload: StatePayload);
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

fn open_storage(ctx: &impl CommandCtx) -> Result<Storage, String> {
    let root = ctx
        .data_dir()
        .map_err(|e| format!("data_dir error: {e}"))?;
    let storage = Storage::new(root);
    storage
        .ensure_dirs()
        .map_err(|e| format!("storage error: {e}"))?;
    Ok(storage)
}

fn emit(ctx: &impl CommandCtx, state: &AppState) {
    ctx.emit_state_updated(state.read(|store| StatePayload::from(store)));
}

fn persist(ctx: &impl CommandCtx, state: &AppState) -> Result<(), StorageError> {
    let storage = Storage::new(ctx.data_dir()?);
    storage.ensure_dirs()?;
    let now = now_millis();
    let mut settings = state.settings();
    let should_backup = should_auto_backup(&settings, now);
    storage.save_store(&state.store_file(), should_backup)?;
    if should_backup {
        settings.last_backup_at = Some(now);
        state.update_settings(settings);
    }
    storage.save_settings(&state.settings_file())?;
    emit(ctx, state);
    Ok(())
}

/// Applies `f` atomically, then persists and notifies. A persistence failure is reported even
/// though the in-memory change has already been committed.
fn mutate_and_persist<T>(
    ctx: &impl CommandCtx,
    state: &AppState,
    f: impl FnOnce(&mut TodoStore) -> Result<T, StoreError>,
) -> CommandResult<T> {
    let out = match state.mutate(f) {
        Ok(out) => out,
        Err(error) => return err(&error.to_string()),
    };
    if let Err(error) = persist(ctx, state) {
        log::warn!("persist failed after committed mutation: {error}");
        return err(&format!("storage error: {error}"));
    }
    ok(out)
}

fn should_auto_backup(settings: &Settings, now: Timestamp) -> bool {
    match settings.backup_schedule {
        BackupSchedule::None => false,
        BackupSchedule::Daily => is_new_day(settings.last_backup_at, now),
        BackupSchedule::Weekly => is_new_week(settings.last_backup_at, now),
        BackupSchedule::Monthly => is_new_month(settings.last_backup_at, now),
    }
}

fn is_new_day(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(ts) => {
            let last_date = Local
                .timestamp_millis_opt(ts)
                .single()
                .map(|dt| dt.date_naive());
            let now_date = Local
                .timestamp_millis_opt(now)
                .single()
                .map(|dt| dt.date_naive());
            last_date != now_date
        }
    }
}

fn is_new_week(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(ts) => {
            let last_week = Local.timestamp_millis_opt(ts).single().map(|dt| dt.iso_week());
            let now_week = Local.timestamp_millis_opt(now).single().map(|dt| dt.iso_week());
            last_week != now_week
        }
    }
}

fn is_new_month(last: Option<Timestamp>, now: Timestamp) -> bool {
    match last {
        None => true,
        Some(ts) => {
            let last_month = Local
                .timestamp_millis_opt(ts)
                .single()
                .map(|dt| (dt.year(), dt.month()));
            let now_month = Local
                .timestamp_millis_opt(now)
                .single()
                .map(|dt| (dt.year(), dt.month()));
            last_month != now_month
        }
    }
}

fn parse_occurrence(raw: &str) -> Result<OccurrenceId, String> {
    raw.parse::<OccurrenceId>().map_err(|e| e.to_string())
}

/// Reads data.json and settings.json into `state`. A missing settings file falls back to
/// defaults; an invalid data file is an error and leaves `state` alone.
pub fn load_state(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<StatePayload> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    let store = match storage.load_store() {
        Ok(store) => store,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let settings = storage
        .load_settings()
        .map(|file| file.settings)
        .unwrap_or_default();
    let payload = StatePayload::from(&store);
    state.replace_store(store);
    state.update_settings(settings);
    ok(payload)
}

pub fn add_task(ctx: &impl CommandCtx, state: &AppState, fields: NewTask) -> CommandResult<Task> {
    mutate_and_persist(ctx, state, |store| store.add_task(fields))
}

pub fn update_task(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
    patch: TaskPatch,
) -> CommandResult<Task> {
    mutate_and_persist(ctx, state, |store| store.update_task(id, patch))
}

pub fn toggle_task(ctx: &impl CommandCtx, state: &AppState, id: &str) -> CommandResult<Task> {
    mutate_and_persist(ctx, state, |store| store.toggle_task(id))
}

pub fn move_task_to_trash(ctx: &impl CommandCtx, state: &AppState, id: &str) -> CommandResult<bool> {
    mutate_and_persist(ctx, state, |store| store.move_task_to_trash(id).map(|()| true))
}

pub fn restore_task(ctx: &impl CommandCtx, state: &AppState, id: &str) -> CommandResult<Task> {
    mutate_and_persist(ctx, state, |store| store.restore_task(id))
}

pub fn permanently_delete_task(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
) -> CommandResult<bool> {
    mutate_and_persist(ctx, state, |store| {
        store.permanently_delete_task(id).map(|()| true)
    })
}

pub fn empty_trash(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<usize> {
    mutate_and_persist(ctx, state, |store| Ok(store.empty_trash()))
}

pub fn toggle_virtual_occurrence(
    ctx: &impl CommandCtx,
    state: &AppState,
    occurrence: &str,
) -> CommandResult<Task> {
    let id = match parse_occurrence(occurrence) {
        Ok(id) => id,
        Err(message) => return err(&message),
    };
    let options = state.projection_options();
    mutate_and_persist(ctx, state, |store| {
        store.toggle_virtual_occurrence(&id.source_id, id.date, options)
    })
}

pub fn delete_virtual_occurrence(
    ctx: &impl CommandCtx,
    state: &AppState,
    occurrence: &str,
) -> CommandResult<Task> {
    let id = match parse_occurrence(occurrence) {
        Ok(id) => id,
        Err(message) => return err(&message),
    };
    let options = state.projection_options();
    mutate_and_persist(ctx, state, |store| {
        store.delete_virtual_occurrence(&id.source_id, id.date, options)
    })
}

pub fn materialize_virtual_occurrence(
    ctx: &impl CommandCtx,
    state: &AppState,
    occurrence: &str,
    edits: TaskPatch,
) -> CommandResult<Task> {
    let id = match parse_occurrence(occurrence) {
        Ok(id) => id,
        Err(message) => return err(&message),
    };
    let options = state.projection_options();
    mutate_and_persist(ctx, state, |store| {
        store.materialize_virtual_occurrence(&id.source_id, id.date, edits, options)
    })
}

pub fn add_category(
    ctx: &impl CommandCtx,
    state: &AppState,
    name: &str,
    parent_id: Option<&str>,
) -> CommandResult<Category> {
    mutate_and_persist(ctx, state, |store| store.add_category(name, parent_id))
}

pub fn rename_category(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
    name: &str,
) -> CommandResult<Category> {
    mutate_and_persist(ctx, state, |store| store.rename_category(id, name))
}

pub fn move_category(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
    new_parent_id: Option<&str>,
) -> CommandResult<bool> {
    mutate_and_persist(ctx, state, |store| {
        store.move_category(id, new_parent_id).map(|()| true)
    })
}

pub fn move_category_to_trash(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
) -> CommandResult<bool> {
    mutate_and_persist(ctx, state, |store| {
        store.move_category_to_trash(id).map(|()| true)
    })
}

pub fn restore_category(ctx: &impl CommandCtx, state: &AppState, id: &str) -> CommandResult<Category> {
    mutate_and_persist(ctx, state, |store| store.restore_category(id))
}

pub fn permanently_delete_category(
    ctx: &impl CommandCtx,
    state: &AppState,
    id: &str,
) -> CommandResult<PurgeSummary> {
    mutate_and_persist(ctx, state, |store| store.permanently_delete_category(id))
}

pub fn add_tag(ctx: &impl CommandCtx, state: &AppState, name: &str, color: &str) -> CommandResult<Tag> {
    mutate_and_persist(ctx, state, |store| Ok(store.add_tag(name, color)))
}

pub fn remove_tag(ctx: &impl CommandCtx, state: &AppState, id: &str) -> CommandResult<bool> {
    mutate_and_persist(ctx, state, |store| store.remove_tag(id).map(|()| true))
}

pub fn visible_tasks(state: &AppState) -> CommandResult<Vec<Task>> {
    ok(state.read(|store| store.visible_tasks().into_iter().cloned().collect()))
}

pub fn project_occurrences(
    state: &AppState,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> CommandResult<Vec<VirtualOccurrence>> {
    let options = state.projection_options();
    ok(state.read(|store| store.project_occurrences(window_start, window_end, options)))
}

/// `days` counts the start date itself; `None` uses the configured agenda length.
pub fn agenda(state: &AppState, start: NaiveDate, days: Option<u32>) -> CommandResult<Vec<AgendaItem>> {
    let days = days.unwrap_or_else(|| state.settings().agenda_days).max(1);
    let Some(end) = start.checked_add_days(Days::new(u64::from(days - 1))) else {
        return err(&format!("agenda window out of range: {start} + {days} days"));
    };
    let options = state.projection_options();
    ok(state.read(|store| store.agenda(start, end, options)))
}

pub fn trash(state: &AppState) -> CommandResult<TrashView> {
    ok(state.read(TodoStore::trash))
}

pub fn category_tree(state: &AppState) -> CommandResult<Vec<CategoryNode>> {
    ok(state.read(TodoStore::category_tree))
}

pub fn category_contents(state: &AppState, id: &str) -> CommandResult<CategoryContents> {
    match state.read(|store| store.category_contents(id)) {
        Ok(contents) => ok(contents),
        Err(error) => err(&error.to_string()),
    }
}

pub fn count_active_todos(state: &AppState, id: &str) -> CommandResult<usize> {
    state.read(|store| {
        if store.category_index().contains(id) {
            ok(store.count_active_todos(id))
        } else {
            err(&StoreError::category_not_found(id).to_string())
        }
    })
}

pub fn get_settings(state: &AppState) -> CommandResult<Settings> {
    ok(state.settings())
}

pub fn update_settings(
    ctx: &impl CommandCtx,
    state: &AppState,
    settings: Settings,
) -> CommandResult<Settings> {
    if settings.projection_ceiling == 0 {
        return err("projection_ceiling must be at least 1");
    }
    if settings.agenda_days == 0 {
        return err("agenda_days must be at least 1");
    }
    state.update_settings(settings.clone());
    if let Err(error) = persist(ctx, state) {
        return err(&format!("storage error: {error}"));
    }
    ok(settings)
}

#[derive(Debug, serde::Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub modified_at: i64,
}

pub fn list_backups(ctx: &impl CommandCtx) -> CommandResult<Vec<BackupEntry>> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    match storage.list_backups() {
        Ok(list) => ok(list
            .into_iter()
            .map(|(name, modified_at)| BackupEntry { name, modified_at })
            .collect()),
        Err(error) => err(&format!("storage error: {error}")),
    }
}

/// Writes the current state with a fresh backup of the previous data file.
pub fn create_backup(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<bool> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    if let Err(error) = storage.save_store(&state.store_file(), true) {
        return err(&format!("storage error: {error}"));
    }
    let mut settings = state.settings();
    settings.last_backup_at = Some(now_millis());
    state.update_settings(settings);
    if let Err(error) = storage.save_settings(&state.settings_file()) {
        return err(&format!("storage error: {error}"));
    }
    ok(true)
}

pub fn restore_backup(
    ctx: &impl CommandCtx,
    state: &AppState,
    filename: &str,
) -> CommandResult<StatePayload> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    match storage.restore_backup(filename) {
        Ok(store) => replace_and_emit(ctx, state, store),
        Err(error) => err(&format!("storage error: {error}")),
    }
}

/// Replaces all three collections with a validated export document from `path`.
pub fn import_json(ctx: &impl CommandCtx, state: &AppState, path: &Path) -> CommandResult<StatePayload> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    match storage.restore_from_path(path) {
        Ok(store) => {
            log::info!(
                "imported path={} todos={} categories={}",
                path.display(),
                store.todos().len(),
                store.categories().len()
            );
            replace_and_emit(ctx, state, store)
        }
        Err(error) => err(&format!("import error: {error}")),
    }
}

fn replace_and_emit(
    ctx: &impl CommandCtx,
    state: &AppState,
    store: TodoStore,
) -> CommandResult<StatePayload> {
    let payload = StatePayload::from(&store);
    state.replace_store(store);
    emit(ctx, state);
    ok(payload)
}

pub fn export_json(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<String> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(message) => return err(&message),
    };
    match storage.export(&state.store_file()) {
        Ok(path) => ok(path.to_string_lossy().to_string()),
        Err(error) => err(&format!("storage error: {error}")),
    }
}
