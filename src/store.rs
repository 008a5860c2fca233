use std::cmp::Reverse;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::categories::CategoryIndex;
use crate::error::StoreError;
use crate::models::{Category, StoreData, StoreFile, StoreMeta, Tag, Task, Timestamp};
use crate::occurrences::OccurrenceId;
use crate::repeat::ProjectionOptions;

pub const FORMAT_VERSION: &str = "1.0";

/// The three collections and every operation over them.
///
/// Mutating methods take `&mut self`; callers that need all-or-nothing semantics apply them to a
/// clone and swap it in on success (see `AppState::mutate`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoStore {
    pub(crate) todos: Vec<Task>,
    pub(crate) categories: Vec<Category>,
    pub(crate) tags: Vec<Tag>,
}

/// One row of a date-window view: a real task or a virtual occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub task: Task,
    pub is_virtual: bool,
    pub occurrence: Option<OccurrenceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashView {
    pub categories: Vec<Category>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub category: Category,
    pub depth: usize,
    pub active_count: usize,
}

/// Direct children and tasks of one category, for browsing inside the trash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryContents {
    pub categories: Vec<Category>,
    pub tasks: Vec<Task>,
}

impl TodoStore {
    pub fn new(todos: Vec<Task>, categories: Vec<Category>, tags: Vec<Tag>) -> Self {
        Self {
            todos,
            categories,
            tags,
        }
    }

    pub fn from_data(data: StoreData) -> Self {
        Self::new(data.todos, data.categories, data.tags)
    }

    pub fn to_data(&self) -> StoreData {
        StoreData {
            todos: self.todos.clone(),
            categories: self.categories.clone(),
            tags: self.tags.clone(),
        }
    }

    pub fn todos(&self) -> &[Task] {
        &self.todos
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.todos.iter().find(|t| t.id == id)
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.todos.iter_mut().find(|t| t.id == id)
    }

    /// Not trashed and not filed under an effectively deleted category.
    pub fn is_task_visible(&self, task: &Task) -> bool {
        is_visible_in(&self.category_index(), task)
    }

    pub fn visible_tasks(&self) -> Vec<&Task> {
        let index = self.category_index();
        self.todos
            .iter()
            .filter(|task| is_visible_in(&index, task))
            .collect()
    }

    /// Visible real tasks dated in the window plus virtual occurrences of visible recurrence
    /// sources, ordered by date, time, then priority (high first).
    pub fn agenda(
        &self,
        window_start: NaiveDate,
        window_end: NaiveDate,
        options: ProjectionOptions,
    ) -> Vec<AgendaItem> {
        let index = self.category_index();
        let mut items: Vec<AgendaItem> = self
            .todos
            .iter()
            .filter(|task| task.date >= window_start && task.date <= window_end)
            .filter(|task| is_visible_in(&index, task))
            .map(|task| AgendaItem {
                task: task.clone(),
                is_virtual: false,
                occurrence: None,
            })
            .collect();

        items.extend(
            self.project_occurrences(window_start, window_end, options)
                .into_iter()
                .map(|occurrence| AgendaItem {
                    task: occurrence.task,
                    is_virtual: true,
                    occurrence: Some(occurrence.id),
                }),
        );

        items.sort_by(|a, b| {
            (a.task.date, a.task.time, Reverse(a.task.priority), &a.task.title).cmp(&(
                b.task.date,
                b.task.time,
                Reverse(b.task.priority),
                &b.task.title,
            ))
        });
        items
    }

    /// Items carrying their own deletion flag, most recently trashed first. Children of a
    /// trashed category are reached through `category_contents`.
    pub fn trash(&self) -> TrashView {
        let mut categories: Vec<Category> = self
            .categories
            .iter()
            .filter(|c| c.deleted_at.is_some())
            .cloned()
            .collect();
        categories.sort_by_key(|c| Reverse(c.deleted_at));

        let mut tasks: Vec<Task> = self
            .todos
            .iter()
            .filter(|t| t.is_trashed())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| Reverse(t.deleted_at));

        TrashView { categories, tasks }
    }

    pub fn category_contents(&self, id: &str) -> Result<CategoryContents, StoreError> {
        let index = self.category_index();
        if !index.contains(id) {
            return Err(StoreError::category_not_found(id));
        }
        let categories = index
            .children_of(id)
            .iter()
            .filter_map(|child| index.get(child))
            .cloned()
            .collect();
        let tasks = self
            .todos
            .iter()
            .filter(|t| t.category_id.as_deref() == Some(id))
            .cloned()
            .collect();
        Ok(CategoryContents { categories, tasks })
    }

    /// The normal (non-trash) category tree, flattened depth-first, with badge counts.
    pub fn category_tree(&self) -> Vec<CategoryNode> {
        let index = self.category_index();
        index
            .visible_preorder(&self.categories)
            .into_iter()
            .map(|(category, depth)| CategoryNode {
                category: category.clone(),
                depth,
                active_count: index.count_active_todos(&category.id, &self.todos),
            })
            .collect()
    }

    pub fn add_tag(&mut self, name: impl Into<String>, color: impl Into<String>) -> Tag {
        let tag = Tag {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: color.into(),
        };
        self.tags.push(tag.clone());
        tag
    }

    /// Deletes the tag and strips it from every task that referenced it.
    pub fn remove_tag(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.tags.len();
        self.tags.retain(|tag| tag.id != id);
        if self.tags.len() == before {
            return Err(StoreError::tag_not_found(id));
        }
        for task in &mut self.todos {
            task.tag_ids.retain(|tag_id| tag_id != id);
        }
        Ok(())
    }

    /// Snapshot of the live collections, trashed items included.
    pub fn export(&self, exported_at: Timestamp) -> StoreFile {
        StoreFile {
            meta: StoreMeta {
                version: FORMAT_VERSION.to_string(),
                exported_at,
            },
            data: self.to_data(),
        }
    }

    /// Parses an export document. `data.todos` and `data.categories` must be arrays, `data.tags`
    /// may be absent. The result replaces the store wholesale; nothing is merged.
    pub fn import_json(text: &str) -> Result<Self, StoreError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| StoreError::InvalidImportPayload(format!("not valid json: {e}")))?;
        Self::import_value(value)
    }

    pub fn import_value(mut value: serde_json::Value) -> Result<Self, StoreError> {
        let data = value
            .get_mut("data")
            .filter(|data| data.is_object())
            .ok_or_else(|| StoreError::InvalidImportPayload("missing `data` object".into()))?;

        for key in ["todos", "categories"] {
            if !data.get(key).is_some_and(|v| v.is_array()) {
                return Err(StoreError::InvalidImportPayload(format!(
                    "`data.{key}` must be an array"
                )));
            }
        }
        match data.get("tags") {
            None | Some(serde_json::Value::Null) => {
                data["tags"] = serde_json::Value::Array(Vec::new());
            }
            Some(tags) if !tags.is_array() => {
                return Err(StoreError::InvalidImportPayload(
                    "`data.tags` must be an array".into(),
                ));
            }
            Some(_) => {}
        }

        let data: StoreData = serde_json::from_value(data.take())
            .map_err(|e| StoreError::InvalidImportPayload(e.to_string()))?;
        log::info!(
            "import parsed todos={} categories={} tags={}",
            data.todos.len(),
            data.categories.len(),
            data.tags.len()
        );
        Ok(Self::from_data(data))
    }
}

fn is_visible_in(index: &CategoryIndex<'_>, task: &Task) -> bool {
    !task.is_trashed()
        && task
            .category_id
            .as_deref()
            .map_or(true, |category_id| !index.is_effectively_deleted(category_id))
}
