pub mod job;

pub use job::{JobStore, SqliteJobStore};
