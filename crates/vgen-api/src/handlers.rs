//! Request handlers.

pub mod callbacks;
pub mod cron;
pub mod health;
pub mod tasks;

pub use callbacks::official_callback;
pub use cron::{migrate_now, migrate_task, reconcile_now};
pub use health::{health, ready};
pub use tasks::{
    add_favorite, create_task, delete_task, get_task, list_tasks, remove_favorite, rename_task,
};
