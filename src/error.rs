use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Category,
    Tag,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Task => f.write_str("task"),
            EntityKind::Category => f.write_str("category"),
            EntityKind::Tag => f.write_str("tag"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid import payload: {0}")]
    InvalidImportPayload(String),

    #[error("moving category {id} under {target} would create a cycle")]
    CycleRejected { id: String, target: String },

    #[error("invalid occurrence id: {0}")]
    InvalidOccurrenceId(String),
}

impl StoreError {
    pub fn task_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: EntityKind::Task,
            id: id.to_string(),
        }
    }

    pub fn category_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: EntityKind::Category,
            id: id.to_string(),
        }
    }

    pub fn tag_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: EntityKind::Tag,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity_and_id() {
        assert_eq!(
            StoreError::task_not_found("t1").to_string(),
            "task not found: t1"
        );
        assert_eq!(
            StoreError::category_not_found("c1").to_string(),
            "category not found: c1"
        );
        let cycle = StoreError::CycleRejected {
            id: "a".into(),
            target: "b".into(),
        };
        assert_eq!(
            cycle.to_string(),
            "moving category a under b would create a cycle"
        );
    }
}
