use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{now_millis, NewTask, Task, TaskPatch};
use crate::store::TodoStore;

impl TodoStore {
    pub fn add_task(&mut self, fields: NewTask) -> Result<Task, StoreError> {
        if let Some(category_id) = fields.category_id.as_deref() {
            self.ensure_category(category_id)?;
        }
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: fields.title,
            description: fields.description,
            completed: false,
            date: fields.date,
            time: fields.time,
            created_at: now_millis(),
            updated_at: None,
            priority: fields.priority,
            category_id: fields.category_id,
            tag_ids: fields.tag_ids,
            repeat: fields.repeat,
            deleted_at: None,
        };
        self.todos.push(task.clone());
        Ok(task)
    }

    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
        if let Some(Some(category_id)) = patch.category_id.as_ref() {
            self.ensure_category(category_id)?;
        }
        let task = self
            .task_mut(id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        patch.apply(task);
        task.updated_at = Some(now_millis());
        Ok(task.clone())
    }

    pub fn toggle_task(&mut self, id: &str) -> Result<Task, StoreError> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        task.completed = !task.completed;
        task.updated_at = Some(now_millis());
        Ok(task.clone())
    }

    pub fn move_task_to_trash(&mut self, id: &str) -> Result<(), StoreError> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        if task.deleted_at.is_some() {
            log::debug!("task already trashed id={id}");
            return Ok(());
        }
        task.deleted_at = Some(now_millis());
        Ok(())
    }

    /// Clears the trash flag. If the task's category is gone or still deleted (directly or via
    /// an ancestor) the task falls back to uncategorized so it does not stay hidden.
    pub fn restore_task(&mut self, id: &str) -> Result<Task, StoreError> {
        let orphaned = {
            let task = self.task(id).ok_or_else(|| StoreError::task_not_found(id))?;
            let index = self.category_index();
            task.category_id
                .as_deref()
                .is_some_and(|category_id| index.is_dead(category_id))
        };

        let task = self
            .task_mut(id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        if task.deleted_at.is_none() && !orphaned {
            return Ok(task.clone());
        }
        task.deleted_at = None;
        if orphaned {
            task.category_id = None;
        }
        task.updated_at = Some(now_millis());
        log::debug!("task restored id={id} uncategorized={orphaned}");
        Ok(task.clone())
    }

    /// Hard removal. Irreversible.
    pub fn permanently_delete_task(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.todos.len();
        self.todos.retain(|task| task.id != id);
        if self.todos.len() == before {
            return Err(StoreError::task_not_found(id));
        }
        log::info!("task purged id={id}");
        Ok(())
    }

    /// Purges every trashed task and every trashed category subtree.
    pub fn empty_trash(&mut self) -> usize {
        let trashed_categories: Vec<String> = self
            .categories
            .iter()
            .filter(|c| c.deleted_at.is_some())
            .map(|c| c.id.clone())
            .collect();

        let mut removed = 0;
        for id in trashed_categories {
            // An earlier purge may already have taken this one with its ancestor.
            if let Ok(summary) = self.permanently_delete_category(&id) {
                removed += summary.categories + summary.tasks;
            }
        }
        let before = self.todos.len();
        self.todos.retain(|task| !task.is_trashed());
        removed += before - self.todos.len();
        log::info!("trash emptied removed={removed}");
        removed
    }

    fn ensure_category(&self, id: &str) -> Result<(), StoreError> {
        if self.category_index().contains(id) {
            Ok(())
        } else {
            Err(StoreError::category_not_found(id))
        }
    }
}
