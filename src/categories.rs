use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{now_millis, Category, Task};
use crate::store::TodoStore;

/// Read-only view over a category slice, keyed by id with a children index.
///
/// Rebuilt from the slice whenever it is needed, so parent links stay plain ids and never turn
/// into live references. Walks guard against loops in imported data.
pub struct CategoryIndex<'a> {
    by_id: HashMap<&'a str, &'a Category>,
    children: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> CategoryIndex<'a> {
    pub fn new(categories: &'a [Category]) -> Self {
        let mut by_id = HashMap::with_capacity(categories.len());
        let mut children: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        for category in categories {
            by_id.insert(category.id.as_str(), category);
            if let Some(parent) = category.parent_id.as_deref() {
                children.entry(parent).or_default().push(category.id.as_str());
            }
        }
        Self { by_id, children }
    }

    pub fn get(&self, id: &str) -> Option<&'a Category> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn children_of(&self, id: &str) -> &[&'a str] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent chain from the immediate parent upwards. Stops at a dangling link or a loop.
    pub fn ancestors(&self, id: &str) -> Vec<&'a Category> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.get(id).and_then(|c| c.parent_id.as_deref());
        while let Some(parent_id) = current {
            if !seen.insert(parent_id) {
                log::warn!("category parent loop detected at {parent_id}");
                break;
            }
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            out.push(parent);
            current = parent.parent_id.as_deref();
        }
        out
    }

    /// Not flagged itself, but some ancestor is.
    pub fn is_chain_deleted(&self, id: &str) -> bool {
        match self.get(id) {
            Some(category) if category.deleted_at.is_none() => self
                .ancestors(id)
                .iter()
                .any(|ancestor| ancestor.deleted_at.is_some()),
            _ => false,
        }
    }

    /// Flagged itself or chain-deleted. Unknown ids are not deleted.
    pub fn is_effectively_deleted(&self, id: &str) -> bool {
        match self.get(id) {
            Some(category) => category.deleted_at.is_some() || self.is_chain_deleted(id),
            None => false,
        }
    }

    /// Missing or effectively deleted; items pointing here must be re-homed on restore.
    pub fn is_dead(&self, id: &str) -> bool {
        !self.contains(id) || self.is_effectively_deleted(id)
    }

    /// `id` plus every descendant.
    pub fn subtree(&self, id: &str) -> HashSet<&'a str> {
        let mut out = HashSet::new();
        let Some(root) = self.get(id) else {
            return out;
        };
        let mut stack = vec![root.id.as_str()];
        while let Some(current) = stack.pop() {
            if out.insert(current) {
                stack.extend(self.children_of(current).iter().copied());
            }
        }
        out
    }

    /// Re-parenting `id` under `new_parent` would make `id` its own ancestor.
    pub fn would_create_cycle(&self, id: &str, new_parent: &str) -> bool {
        new_parent == id || self.ancestors(new_parent).iter().any(|a| a.id == id)
    }

    /// Categories shown in the normal tree: roots first, then children, depth-first.
    /// Dangling parents are treated as roots.
    pub fn visible_preorder(&self, categories: &'a [Category]) -> Vec<(&'a Category, usize)> {
        let mut out = Vec::new();
        let roots = categories.iter().filter(|c| {
            c.parent_id
                .as_deref()
                .map_or(true, |parent| !self.contains(parent))
        });
        let mut seen = HashSet::new();
        for root in roots {
            self.push_visible(root, 0, &mut seen, &mut out);
        }
        out
    }

    fn push_visible(
        &self,
        category: &'a Category,
        depth: usize,
        seen: &mut HashSet<&'a str>,
        out: &mut Vec<(&'a Category, usize)>,
    ) {
        if category.deleted_at.is_some() || !seen.insert(category.id.as_str()) {
            return;
        }
        out.push((category, depth));
        for child in self.children_of(&category.id) {
            if let Some(child) = self.get(child) {
                self.push_visible(child, depth + 1, seen, out);
            }
        }
    }

    /// Incomplete, untrashed tasks in `id` and in every descendant not cut off by a trashed
    /// category on the way down.
    pub fn count_active_todos(&self, id: &str, tasks: &[Task]) -> usize {
        let mut direct: HashMap<&str, usize> = HashMap::new();
        for task in tasks {
            if task.completed || task.is_trashed() {
                continue;
            }
            if let Some(category_id) = task.category_id.as_deref() {
                *direct.entry(category_id).or_default() += 1;
            }
        }

        let mut total = 0;
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            total += direct.get(current).copied().unwrap_or(0);
            for child in self.children_of(current) {
                if self.get(child).is_some_and(|c| c.deleted_at.is_none()) {
                    stack.push(*child);
                }
            }
        }
        total
    }
}

/// What a permanent category delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub categories: usize,
    pub tasks: usize,
}

impl TodoStore {
    pub fn category_index(&self) -> CategoryIndex<'_> {
        CategoryIndex::new(&self.categories)
    }

    pub fn add_category(
        &mut self,
        name: impl Into<String>,
        parent_id: Option<&str>,
    ) -> Result<Category, StoreError> {
        if let Some(parent) = parent_id {
            if !self.category_index().contains(parent) {
                return Err(StoreError::category_not_found(parent));
            }
        }
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
            deleted_at: None,
        };
        log::debug!(
            "category created id={} parent={:?}",
            category.id,
            category.parent_id
        );
        self.categories.push(category.clone());
        Ok(category)
    }

    pub fn rename_category(
        &mut self,
        id: &str,
        name: impl Into<String>,
    ) -> Result<Category, StoreError> {
        let category = self
            .category_mut(id)
            .ok_or_else(|| StoreError::category_not_found(id))?;
        category.name = name.into();
        Ok(category.clone())
    }

    /// Re-parent `id` under `new_parent` (or to the root). Self-parenting and moves under a
    /// descendant are rejected and leave the tree unchanged.
    pub fn move_category(&mut self, id: &str, new_parent: Option<&str>) -> Result<(), StoreError> {
        let index = self.category_index();
        let current = index
            .get(id)
            .ok_or_else(|| StoreError::category_not_found(id))?;
        if current.parent_id.as_deref() == new_parent {
            return Ok(());
        }
        if let Some(target) = new_parent {
            if !index.contains(target) {
                return Err(StoreError::category_not_found(target));
            }
            if index.would_create_cycle(id, target) {
                return Err(StoreError::CycleRejected {
                    id: id.to_string(),
                    target: target.to_string(),
                });
            }
        }

        if let Some(category) = self.category_mut(id) {
            category.parent_id = new_parent.map(str::to_string);
        }
        log::debug!("category moved id={id} parent={new_parent:?}");
        Ok(())
    }

    /// Flags exactly this category. Descendants become chain-deleted without being written.
    pub fn move_category_to_trash(&mut self, id: &str) -> Result<(), StoreError> {
        let category = self
            .category_mut(id)
            .ok_or_else(|| StoreError::category_not_found(id))?;
        if category.deleted_at.is_some() {
            log::debug!("category already trashed id={id}");
            return Ok(());
        }
        category.deleted_at = Some(now_millis());
        log::info!("category trashed id={id}");
        Ok(())
    }

    /// Clears the flag. A category whose parent is missing or still deleted moves to the root.
    /// Restoring a chain-deleted category detaches it from the dead branch the same way.
    pub fn restore_category(&mut self, id: &str) -> Result<Category, StoreError> {
        let index = self.category_index();
        let category = index
            .get(id)
            .ok_or_else(|| StoreError::category_not_found(id))?;
        if !index.is_effectively_deleted(id) {
            return Ok(category.clone());
        }
        let detach = category
            .parent_id
            .as_deref()
            .is_some_and(|parent| index.is_dead(parent));

        let category = self
            .category_mut(id)
            .ok_or_else(|| StoreError::category_not_found(id))?;
        category.deleted_at = None;
        if detach {
            category.parent_id = None;
        }
        log::info!("category restored id={id} detached={detach}");
        Ok(category.clone())
    }

    /// Removes the category, all descendants, and every task filed anywhere in that subtree.
    pub fn permanently_delete_category(&mut self, id: &str) -> Result<PurgeSummary, StoreError> {
        let removed: HashSet<String> = {
            let index = self.category_index();
            if !index.contains(id) {
                return Err(StoreError::category_not_found(id));
            }
            index.subtree(id).into_iter().map(str::to_string).collect()
        };

        let categories_before = self.categories.len();
        let tasks_before = self.todos.len();
        self.categories.retain(|c| !removed.contains(&c.id));
        self.todos.retain(|t| {
            t.category_id
                .as_ref()
                .map_or(true, |category_id| !removed.contains(category_id))
        });

        let summary = PurgeSummary {
            categories: categories_before - self.categories.len(),
            tasks: tasks_before - self.todos.len(),
        };
        log::info!(
            "category purged id={id} categories={} tasks={}",
            summary.categories,
            summary.tasks
        );
        Ok(summary)
    }

    /// Active-todo badge count for `id`, excluding trashed subtrees.
    pub fn count_active_todos(&self, id: &str) -> usize {
        self.category_index().count_active_todos(id, &self.todos)
    }

    pub fn is_chain_deleted(&self, id: &str) -> bool {
        self.category_index().is_chain_deleted(id)
    }

    fn category_mut(&mut self, id: &str) -> Option<&mut Category> {
        self.categories.iter_mut().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn add_task_in(store: &mut TodoStore, title: &str, category: &str) -> Task {
        let mut fields = NewTask::new(title, date());
        fields.category_id = Some(category.to_string());
        store.add_task(fields).unwrap()
    }

    /// work > project > sprint, plus a sibling `home` root.
    fn make_tree() -> (TodoStore, Category, Category, Category, Category) {
        let mut store = TodoStore::default();
        let work = store.add_category("work", None).unwrap();
        let project = store.add_category("project", Some(&work.id)).unwrap();
        let sprint = store.add_category("sprint", Some(&project.id)).unwrap();
        let home = store.add_category("home", None).unwrap();
        (store, work, project, sprint, home)
    }

    #[test]
    fn add_category_rejects_unknown_parent() {
        let mut store = TodoStore::default();
        let err = store.add_category("x", Some("missing")).unwrap_err();
        assert_eq!(err, StoreError::category_not_found("missing"));
        assert!(store.categories().is_empty());
    }

    #[test]
    fn trashing_marks_only_the_target_and_chain_deletes_descendants() {
        let (mut store, work, project, sprint, home) = make_tree();
        store.move_category_to_trash(&project.id).unwrap();

        let index = store.category_index();
        assert!(index.get(&project.id).unwrap().deleted_at.is_some());
        assert!(index.get(&sprint.id).unwrap().deleted_at.is_none());
        assert!(index.is_chain_deleted(&sprint.id));
        assert!(!index.is_chain_deleted(&project.id));
        assert!(index.is_effectively_deleted(&project.id));
        assert!(!index.is_effectively_deleted(&work.id));
        assert!(!index.is_effectively_deleted(&home.id));
    }

    #[test]
    fn trashing_twice_is_a_no_op() {
        let (mut store, work, ..) = make_tree();
        store.move_category_to_trash(&work.id).unwrap();
        let first = store.category_index().get(&work.id).unwrap().deleted_at;
        store.move_category_to_trash(&work.id).unwrap();
        assert_eq!(store.category_index().get(&work.id).unwrap().deleted_at, first);
    }

    #[test]
    fn counts_exclude_chain_deleted_subtrees() {
        let (mut store, work, project, sprint, _) = make_tree();
        add_task_in(&mut store, "a", &work.id);
        add_task_in(&mut store, "b", &project.id);
        add_task_in(&mut store, "c", &sprint.id);
        let done = add_task_in(&mut store, "d", &sprint.id);
        store.toggle_task(&done.id).unwrap();

        assert_eq!(store.count_active_todos(&work.id), 3);
        assert_eq!(store.count_active_todos(&sprint.id), 1);

        store.move_category_to_trash(&project.id).unwrap();
        assert!(store.is_chain_deleted(&sprint.id));
        assert_eq!(store.count_active_todos(&work.id), 1);
    }

    #[test]
    fn counts_skip_trashed_tasks() {
        let (mut store, work, ..) = make_tree();
        let task = add_task_in(&mut store, "a", &work.id);
        add_task_in(&mut store, "b", &work.id);
        store.move_task_to_trash(&task.id).unwrap();
        assert_eq!(store.count_active_todos(&work.id), 1);
    }

    #[test]
    fn move_under_own_descendant_is_rejected_and_tree_unchanged() {
        let (mut store, work, _, sprint, _) = make_tree();
        let before = store.categories().to_vec();

        let err = store.move_category(&work.id, Some(&sprint.id)).unwrap_err();
        assert_eq!(
            err,
            StoreError::CycleRejected {
                id: work.id.clone(),
                target: sprint.id.clone(),
            }
        );
        assert_eq!(store.categories(), before.as_slice());
    }

    #[test]
    fn move_under_self_is_rejected() {
        let (mut store, work, ..) = make_tree();
        let err = store.move_category(&work.id, Some(&work.id)).unwrap_err();
        assert!(matches!(err, StoreError::CycleRejected { .. }));
    }

    #[test]
    fn move_reparents_and_moves_to_root() {
        let (mut store, _, project, sprint, home) = make_tree();
        store.move_category(&sprint.id, Some(&home.id)).unwrap();
        assert_eq!(
            store.category_index().get(&sprint.id).unwrap().parent_id.as_deref(),
            Some(home.id.as_str())
        );

        store.move_category(&project.id, None).unwrap();
        assert_eq!(store.category_index().get(&project.id).unwrap().parent_id, None);

        let err = store.move_category(&project.id, Some("nope")).unwrap_err();
        assert_eq!(err, StoreError::category_not_found("nope"));
    }

    #[test]
    fn restore_child_of_deleted_parent_moves_it_to_root() {
        let (mut store, work, project, ..) = make_tree();
        store.move_category_to_trash(&project.id).unwrap();
        store.move_category_to_trash(&work.id).unwrap();

        let restored = store.restore_category(&project.id).unwrap();
        assert_eq!(restored.deleted_at, None);
        assert_eq!(restored.parent_id, None);
        assert!(store.category_index().is_effectively_deleted(&work.id));
    }

    #[test]
    fn restore_keeps_parent_when_parent_is_alive() {
        let (mut store, work, project, ..) = make_tree();
        store.move_category_to_trash(&project.id).unwrap();
        let restored = store.restore_category(&project.id).unwrap();
        assert_eq!(restored.parent_id.as_deref(), Some(work.id.as_str()));
    }

    #[test]
    fn restore_of_chain_deleted_category_detaches_it() {
        let (mut store, _, project, sprint, _) = make_tree();
        store.move_category_to_trash(&project.id).unwrap();

        let restored = store.restore_category(&sprint.id).unwrap();
        assert_eq!(restored.parent_id, None);
        assert!(!store.category_index().is_effectively_deleted(&sprint.id));
        assert!(store.category_index().is_effectively_deleted(&project.id));
    }

    #[test]
    fn restore_of_active_category_changes_nothing() {
        let (mut store, _, project, ..) = make_tree();
        let before = store.categories().to_vec();
        store.restore_category(&project.id).unwrap();
        assert_eq!(store.categories(), before.as_slice());
    }

    #[test]
    fn permanent_delete_cascades_to_descendants_and_their_tasks() {
        let (mut store, work, project, sprint, home) = make_tree();
        add_task_in(&mut store, "keep", &work.id);
        add_task_in(&mut store, "gone-1", &project.id);
        add_task_in(&mut store, "gone-2", &sprint.id);
        add_task_in(&mut store, "elsewhere", &home.id);
        store.add_task(NewTask::new("loose", date())).unwrap();

        let summary = store.permanently_delete_category(&project.id).unwrap();
        assert_eq!(
            summary,
            PurgeSummary {
                categories: 2,
                tasks: 2
            }
        );
        let titles: Vec<_> = store.todos().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["keep", "elsewhere", "loose"]);
        assert!(!store.category_index().contains(&sprint.id));
        assert!(store.category_index().contains(&work.id));
    }

    #[test]
    fn permanent_delete_of_unknown_category_is_not_found() {
        let mut store = TodoStore::default();
        assert_eq!(
            store.permanently_delete_category("x").unwrap_err(),
            StoreError::category_not_found("x")
        );
    }

    #[test]
    fn index_survives_parent_loops_in_imported_data() {
        let categories = vec![
            Category {
                id: "a".into(),
                name: "a".into(),
                parent_id: Some("b".into()),
                deleted_at: None,
            },
            Category {
                id: "b".into(),
                name: "b".into(),
                parent_id: Some("a".into()),
                deleted_at: Some(1),
            },
        ];
        let index = CategoryIndex::new(&categories);
        assert!(index.is_chain_deleted("a"));
        assert_eq!(index.subtree("a").len(), 2);
        assert!(index.would_create_cycle("a", "b"));
    }

    #[test]
    fn visible_preorder_skips_trashed_branches_and_tracks_depth() {
        let (mut store, work, project, sprint, home) = make_tree();
        let index = store.category_index();
        let names: Vec<_> = index
            .visible_preorder(store.categories())
            .into_iter()
            .map(|(c, depth)| (c.id.clone(), depth))
            .collect();
        assert_eq!(
            names,
            vec![
                (work.id.clone(), 0),
                (project.id.clone(), 1),
                (sprint.id.clone(), 2),
                (home.id.clone(), 0),
            ]
        );

        store.move_category_to_trash(&project.id).unwrap();
        let index = store.category_index();
        let visible: Vec<_> = index
            .visible_preorder(store.categories())
            .into_iter()
            .map(|(c, _)| c.id.clone())
            .collect();
        assert_eq!(visible, vec![work.id, home.id]);
    }
}
