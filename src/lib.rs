//! In-memory todo store with virtual recurrence, a category tree with cascading soft-delete, and
//! JSON persistence.
//!
//! [`store::TodoStore`] owns the three collections. Recurring tasks are stored once and projected
//! into date windows on read ([`repeat`], [`occurrences`]); deletion is a flag that hides a task
//! or a whole category subtree until it is restored or purged ([`categories`]). The [`commands`]
//! layer is the boundary a front-end talks to: it commits each mutation atomically, writes
//! `data.json` and notifies the host.

pub mod categories;
pub mod commands;
pub mod error;
pub mod events;
mod lifecycle;
pub mod logging;
pub mod models;
pub mod occurrences;
pub mod repeat;
pub mod state;
pub mod storage;
pub mod store;

pub use error::{EntityKind, StoreError};
pub use models::{
    Category, NewTask, Priority, RepeatRule, Settings, Tag, Task, TaskPatch, Timestamp,
};
pub use occurrences::{OccurrenceId, VirtualOccurrence};
pub use state::AppState;
pub use store::TodoStore;
