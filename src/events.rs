use crate::models::{Category, Tag, Task};
use crate::store::TodoStore;

pub const EVENT_STATE_UPDATED: &str = "state_updated";

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatePayload {
    pub todos: Vec<Task>,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
}

impl From<&TodoStore> for StatePayload {
    fn from(store: &TodoStore) -> Self {
        Self {
            todos: store.todos().to_vec(),
            categories: store.categories().to_vec(),
            tags: store.tags().to_vec(),
        }
    }
}
