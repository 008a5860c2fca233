use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{now_millis, RepeatRule, Task, TaskPatch};
use crate::repeat::{project, slot_at, BlockingIndex, ProjectionOptions, Slot, SlotState};
use crate::store::TodoStore;

const SEPARATOR: char = '@';

/// Identifies a virtual occurrence: `<sourceId>@<YYYY-MM-DD>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceId {
    pub source_id: String,
    pub date: NaiveDate,
}

impl OccurrenceId {
    pub fn new(source_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            source_id: source_id.into(),
            date,
        }
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.source_id, SEPARATOR, self.date.format("%Y-%m-%d"))
    }
}

impl FromStr for OccurrenceId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source_id, date) = s
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| StoreError::InvalidOccurrenceId(s.to_string()))?;
        if source_id.is_empty() {
            return Err(StoreError::InvalidOccurrenceId(s.to_string()));
        }
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| StoreError::InvalidOccurrenceId(s.to_string()))?;
        Ok(Self::new(source_id, date))
    }
}

impl Serialize for OccurrenceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OccurrenceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A read-time instance of a recurring task. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualOccurrence {
    pub id: OccurrenceId,
    /// Source fields on the occurrence date; incomplete, untrashed, non-repeating.
    pub task: Task,
}

impl TodoStore {
    /// Virtual occurrences of every visible recurrence source inside the window.
    pub fn project_occurrences(
        &self,
        window_start: NaiveDate,
        window_end: NaiveDate,
        options: ProjectionOptions,
    ) -> Vec<VirtualOccurrence> {
        let index = BlockingIndex::build(&self.todos);
        let mut out = Vec::new();
        for source in self.todos.iter().filter(|t| t.repeat.is_recurring()) {
            if !self.is_task_visible(source) {
                continue;
            }
            for date in project(source, window_start, window_end, &index, options) {
                let id = OccurrenceId::new(source.id.clone(), date);
                let mut task = occurrence_task(source, date);
                task.id = id.to_string();
                task.created_at = source.created_at;
                out.push(VirtualOccurrence { id, task });
            }
        }
        out
    }

    /// The recurrence source behind an occurrence id and the state of its slot. The source must
    /// be visible and `date` must be a step of its series that no earlier collision cuts off.
    pub fn resolve_occurrence(
        &self,
        source_id: &str,
        date: NaiveDate,
        options: ProjectionOptions,
    ) -> Result<(&Task, Slot), StoreError> {
        let source = self
            .task(source_id)
            .ok_or_else(|| StoreError::task_not_found(source_id))?;
        if !source.repeat.is_recurring() || !self.is_task_visible(source) {
            return Err(invalid_occurrence(source_id, date));
        }
        let index = BlockingIndex::build(&self.todos);
        match slot_at(source, date, &index, options) {
            Slot::Unreachable => Err(invalid_occurrence(source_id, date)),
            slot => Ok((source, slot)),
        }
    }

    /// Completes a virtual occurrence by writing a real completed row for its slot. If a live
    /// row already holds the slot its completion flips instead, so undoing leaves an incomplete
    /// real row behind rather than deleting it. A deleted slot cannot be toggled.
    pub fn toggle_virtual_occurrence(
        &mut self,
        source_id: &str,
        date: NaiveDate,
        options: ProjectionOptions,
    ) -> Result<Task, StoreError> {
        let (source, slot) = self.resolve_occurrence(source_id, date, options)?;
        let source = source.clone();
        match slot {
            Slot::Held(SlotState::Active) => {
                let existing = self
                    .slot_row_mut(&source.title, date, false)
                    .ok_or_else(|| invalid_occurrence(source_id, date))?;
                existing.completed = !existing.completed;
                existing.updated_at = Some(now_millis());
                Ok(existing.clone())
            }
            Slot::Held(SlotState::Deleted) | Slot::Unreachable => {
                Err(invalid_occurrence(source_id, date))
            }
            Slot::Open => {
                let mut task = occurrence_task(&source, date);
                task.completed = true;
                log::debug!("occurrence completed source={source_id} date={date} row={}", task.id);
                self.todos.push(task.clone());
                Ok(task)
            }
        }
    }

    /// Writes a trashed guard row at the slot. Projection halts at any row sharing the title and
    /// date, so this removes the occurrence *and every later one* of the source.
    pub fn delete_virtual_occurrence(
        &mut self,
        source_id: &str,
        date: NaiveDate,
        options: ProjectionOptions,
    ) -> Result<Task, StoreError> {
        let (source, slot) = self.resolve_occurrence(source_id, date, options)?;
        let source = source.clone();
        let held = match slot {
            Slot::Held(SlotState::Active) => self.slot_row_mut(&source.title, date, false),
            Slot::Held(SlotState::Deleted) => self.slot_row_mut(&source.title, date, true),
            Slot::Open | Slot::Unreachable => None,
        };
        if let Some(existing) = held {
            if existing.deleted_at.is_none() {
                existing.deleted_at = Some(now_millis());
            }
            return Ok(existing.clone());
        }

        let mut guard = occurrence_task(&source, date);
        guard.deleted_at = Some(now_millis());
        log::info!("occurrence deleted source={source_id} date={date} guard={}", guard.id);
        self.todos.push(guard.clone());
        Ok(guard)
    }

    /// Promotes the occurrence to an independent real task with `edits` applied. The new row
    /// keeps no link to the source. If a live row already holds the slot the edits land on that
    /// row instead of adding a second one.
    pub fn materialize_virtual_occurrence(
        &mut self,
        source_id: &str,
        date: NaiveDate,
        edits: TaskPatch,
        options: ProjectionOptions,
    ) -> Result<Task, StoreError> {
        let (source, slot) = self.resolve_occurrence(source_id, date, options)?;
        let source = source.clone();
        if let Some(Some(category_id)) = edits.category_id.as_ref() {
            if !self.category_index().contains(category_id) {
                return Err(StoreError::category_not_found(category_id));
            }
        }

        match slot {
            Slot::Held(SlotState::Active) => {
                let existing = self
                    .slot_row_mut(&source.title, date, false)
                    .ok_or_else(|| invalid_occurrence(source_id, date))?;
                edits.apply(existing);
                existing.repeat = RepeatRule::None;
                existing.updated_at = Some(now_millis());
                Ok(existing.clone())
            }
            Slot::Held(SlotState::Deleted) | Slot::Unreachable => {
                Err(invalid_occurrence(source_id, date))
            }
            Slot::Open => {
                let mut task = occurrence_task(&source, date);
                edits.apply(&mut task);
                // A materialized row never recurs on its own.
                task.repeat = RepeatRule::None;
                log::debug!("occurrence materialized source={source_id} date={date} row={}", task.id);
                self.todos.push(task.clone());
                Ok(task)
            }
        }
    }

    fn slot_row_mut(&mut self, title: &str, date: NaiveDate, trashed: bool) -> Option<&mut Task> {
        self.todos
            .iter_mut()
            .find(|t| t.date == date && t.title == title && t.is_trashed() == trashed)
    }
}

fn invalid_occurrence(source_id: &str, date: NaiveDate) -> StoreError {
    StoreError::InvalidOccurrenceId(OccurrenceId::new(source_id, date).to_string())
}

/// A fresh standalone row carrying the source's content on `date`.
fn occurrence_task(source: &Task, date: NaiveDate) -> Task {
    Task {
        id: Uuid::new_v4().to_string(),
        title: source.title.clone(),
        description: source.description.clone(),
        completed: false,
        date,
        time: source.time,
        created_at: now_millis(),
        updated_at: None,
        priority: source.priority,
        category_id: source.category_id.clone(),
        tag_ids: source.tag_ids.clone(),
        repeat: RepeatRule::None,
        deleted_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use chrono::Duration;

    fn day0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn plus(n: i64) -> NaiveDate {
        day0() + Duration::days(n)
    }

    fn opts() -> ProjectionOptions {
        ProjectionOptions::default()
    }

    fn daily_store() -> (TodoStore, Task) {
        let mut store = TodoStore::default();
        let mut fields = NewTask::new("stretch", day0());
        fields.repeat = RepeatRule::Daily { interval: 1 };
        fields.description = Some("ten minutes".into());
        let source = store.add_task(fields).unwrap();
        (store, source)
    }

    fn virtual_dates(store: &TodoStore) -> Vec<NaiveDate> {
        store
            .project_occurrences(day0(), plus(9), ProjectionOptions::default())
            .into_iter()
            .map(|o| o.id.date)
            .collect()
    }

    #[test]
    fn occurrence_id_display_and_parse() {
        let id = OccurrenceId::new("abc-123", plus(2));
        assert_eq!(id.to_string(), "abc-123@2024-05-03");
        assert_eq!("abc-123@2024-05-03".parse::<OccurrenceId>().unwrap(), id);
        assert!("abc".parse::<OccurrenceId>().is_err());
        assert!("@2024-05-03".parse::<OccurrenceId>().is_err());
        assert!("abc@tomorrow".parse::<OccurrenceId>().is_err());

        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!("abc-123@2024-05-03"));
    }

    #[test]
    fn virtual_occurrences_carry_source_fields_but_their_own_date() {
        let (store, source) = daily_store();
        let occurrences = store.project_occurrences(day0(), plus(2), ProjectionOptions::default());
        assert_eq!(occurrences.len(), 2);
        let first = &occurrences[0];
        assert_eq!(first.id, OccurrenceId::new(source.id.clone(), plus(1)));
        assert_eq!(first.task.id, first.id.to_string());
        assert_eq!(first.task.title, "stretch");
        assert_eq!(first.task.description.as_deref(), Some("ten minutes"));
        assert_eq!(first.task.date, plus(1));
        assert!(!first.task.completed);
        assert_eq!(first.task.deleted_at, None);
        assert_eq!(first.task.repeat, RepeatRule::None);
    }

    #[test]
    fn completed_source_still_projects() {
        let (mut store, source) = daily_store();
        store.toggle_task(&source.id).unwrap();
        assert_eq!(virtual_dates(&store).len(), 9);
    }

    #[test]
    fn trashed_source_projects_nothing() {
        let (mut store, source) = daily_store();
        store.move_task_to_trash(&source.id).unwrap();
        assert!(virtual_dates(&store).is_empty());
    }

    #[test]
    fn source_in_trashed_category_projects_nothing() {
        let (mut store, source) = daily_store();
        let work = store.add_category("work", None).unwrap();
        store
            .update_task(
                &source.id,
                TaskPatch {
                    category_id: Some(Some(work.id.clone())),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        store.move_category_to_trash(&work.id).unwrap();
        assert!(virtual_dates(&store).is_empty());
    }

    #[test]
    fn deleting_one_occurrence_truncates_all_later_ones() {
        let (mut store, source) = daily_store();
        assert_eq!(virtual_dates(&store), (1..=9).map(plus).collect::<Vec<_>>());

        let guard = store.delete_virtual_occurrence(&source.id, plus(3), opts()).unwrap();
        assert!(guard.deleted_at.is_some());
        assert_eq!(guard.date, plus(3));
        assert_eq!(guard.repeat, RepeatRule::None);

        assert_eq!(virtual_dates(&store), vec![plus(1), plus(2)]);
        // The guard is an ordinary trashed row.
        assert_eq!(store.trash().tasks.len(), 1);
    }

    #[test]
    fn deleting_the_same_occurrence_twice_reuses_the_guard() {
        let (mut store, source) = daily_store();
        let first = store.delete_virtual_occurrence(&source.id, plus(3), opts()).unwrap();
        let second = store.delete_virtual_occurrence(&source.id, plus(3), opts()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.todos().len(), 2);
    }

    #[test]
    fn toggling_an_occurrence_writes_a_completed_real_row() {
        let (mut store, source) = daily_store();
        let row = store.toggle_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        assert!(row.completed);
        assert_ne!(row.id, source.id);
        assert_eq!(row.repeat, RepeatRule::None);

        let items = store.agenda(day0(), plus(9), ProjectionOptions::default());
        let on_day2: Vec<_> = items.iter().filter(|i| i.task.date == plus(2)).collect();
        assert_eq!(on_day2.len(), 1);
        assert!(!on_day2[0].is_virtual);
        assert!(on_day2[0].task.completed);

        let on_day1: Vec<_> = items.iter().filter(|i| i.task.date == plus(1)).collect();
        assert_eq!(on_day1.len(), 1);
        assert!(on_day1[0].is_virtual);
        assert!(!on_day1[0].task.completed);
    }

    #[test]
    fn toggling_again_flips_the_existing_row_and_keeps_it() {
        let (mut store, source) = daily_store();
        let first = store.toggle_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        let second = store.toggle_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        assert_eq!(first.id, second.id);
        assert!(!second.completed);
        assert_eq!(store.todos().len(), 2);
    }

    #[test]
    fn deleting_a_completed_occurrence_trashes_its_row() {
        let (mut store, source) = daily_store();
        let row = store.toggle_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        let deleted = store.delete_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        assert_eq!(deleted.id, row.id);
        assert!(deleted.deleted_at.is_some());
        assert_eq!(store.todos().len(), 2);
    }

    #[test]
    fn materializing_creates_an_independent_edited_row() {
        let (mut store, source) = daily_store();
        let row = store
            .materialize_virtual_occurrence(
                &source.id,
                plus(4),
                TaskPatch {
                    description: Some(Some("twenty minutes".into())),
                    repeat: Some(RepeatRule::Daily { interval: 2 }),
                    ..TaskPatch::default()
                },
                opts(),
            )
            .unwrap();
        assert_ne!(row.id, source.id);
        assert_eq!(row.date, plus(4));
        assert_eq!(row.description.as_deref(), Some("twenty minutes"));
        assert_eq!(row.repeat, RepeatRule::None);

        // Same title on that date: the row now holds the slot.
        assert_eq!(virtual_dates(&store), vec![plus(1), plus(2), plus(3)]);

        // Later lifecycle changes to the row do not touch the source.
        store.move_task_to_trash(&row.id).unwrap();
        assert!(store.task(&source.id).unwrap().deleted_at.is_none());
    }

    #[test]
    fn renamed_materialization_leaves_the_slot_virtual() {
        let (mut store, source) = daily_store();
        store
            .materialize_virtual_occurrence(
                &source.id,
                plus(4),
                TaskPatch {
                    title: Some("long stretch".into()),
                    ..TaskPatch::default()
                },
                opts(),
            )
            .unwrap();
        assert_eq!(virtual_dates(&store).len(), 9);
    }

    #[test]
    fn occurrence_actions_validate_the_source_and_date() {
        let (mut store, source) = daily_store();
        assert_eq!(
            store.toggle_virtual_occurrence("missing", plus(1), opts()).unwrap_err(),
            StoreError::task_not_found("missing")
        );
        assert!(matches!(
            store.delete_virtual_occurrence(&source.id, day0(), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));

        let plain = store.add_task(NewTask::new("plain", day0())).unwrap();
        assert!(matches!(
            store.materialize_virtual_occurrence(&plain.id, plus(1), TaskPatch::default(), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        assert_eq!(store.todos().len(), 2);
    }

    #[test]
    fn off_grid_dates_are_rejected_without_writing() {
        let mut store = TodoStore::default();
        let mut fields = NewTask::new("gym", day0());
        fields.repeat = RepeatRule::Daily { interval: 3 };
        let source = store.add_task(fields).unwrap();

        for date in [plus(1), plus(2), plus(4)] {
            assert!(matches!(
                store.toggle_virtual_occurrence(&source.id, date, opts()),
                Err(StoreError::InvalidOccurrenceId(_))
            ));
            assert!(matches!(
                store.delete_virtual_occurrence(&source.id, date, opts()),
                Err(StoreError::InvalidOccurrenceId(_))
            ));
        }
        assert_eq!(store.todos().len(), 1);
        assert!(store.toggle_virtual_occurrence(&source.id, plus(3), opts()).is_ok());
    }

    #[test]
    fn dates_past_a_guard_are_rejected() {
        let (mut store, source) = daily_store();
        store.delete_virtual_occurrence(&source.id, plus(3), opts()).unwrap();

        assert!(matches!(
            store.toggle_virtual_occurrence(&source.id, plus(6), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        assert!(matches!(
            store.materialize_virtual_occurrence(&source.id, plus(5), TaskPatch::default(), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        // The guarded slot itself cannot be completed either.
        assert!(matches!(
            store.toggle_virtual_occurrence(&source.id, plus(3), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        assert_eq!(store.todos().len(), 2);
    }

    #[test]
    fn dates_past_the_ceiling_are_rejected() {
        let (mut store, source) = daily_store();
        let tight = ProjectionOptions {
            ceiling: 3,
            ..ProjectionOptions::default()
        };
        assert!(store.toggle_virtual_occurrence(&source.id, plus(3), tight).is_ok());
        assert!(matches!(
            store.toggle_virtual_occurrence(&source.id, plus(4), tight),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
    }

    #[test]
    fn hidden_sources_reject_occurrence_actions() {
        let (mut store, source) = daily_store();
        store.move_task_to_trash(&source.id).unwrap();
        assert!(matches!(
            store.toggle_virtual_occurrence(&source.id, plus(1), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        assert!(matches!(
            store.delete_virtual_occurrence(&source.id, plus(1), opts()),
            Err(StoreError::InvalidOccurrenceId(_))
        ));
        assert_eq!(store.todos().len(), 1);
    }

    #[test]
    fn materializing_a_completed_slot_edits_the_existing_row() {
        let (mut store, source) = daily_store();
        let toggled = store.toggle_virtual_occurrence(&source.id, plus(2), opts()).unwrap();
        let row = store
            .materialize_virtual_occurrence(
                &source.id,
                plus(2),
                TaskPatch {
                    description: Some(Some("with weights".into())),
                    ..TaskPatch::default()
                },
                opts(),
            )
            .unwrap();

        assert_eq!(row.id, toggled.id);
        assert!(row.completed);
        assert_eq!(row.description.as_deref(), Some("with weights"));
        assert_eq!(row.repeat, RepeatRule::None);
        assert_eq!(store.todos().len(), 2);
        let on_day2 = store
            .todos()
            .iter()
            .filter(|t| t.date == plus(2) && t.title == "stretch")
            .count();
        assert_eq!(on_day2, 1);
    }
}
