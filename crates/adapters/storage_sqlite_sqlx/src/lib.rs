//! # ccuhub-adapter-storage-sqlite-sqlx
//!
//! `SQLite` state directory using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the `EventLog` and `ScheduleRepository` ports defined in `ccuhub-app::ports`
//! - Own the database file inside the configured state directory
//! - Run database migrations (using sqlx embedded migrations)
//! - Serialize all writes through a single writer task
//! - Reopen the state directory on request without a process restart
//!
//! ## Dependency rule
//! Depends on `ccuhub-app` (for port traits) and `ccuhub-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod error;
pub mod event_log;
pub mod pool;
pub mod schedule_repo;
pub mod state_dir;

pub use error::StorageError;
pub use event_log::SqliteEventLog;
pub use pool::Config;
pub use schedule_repo::SqliteScheduleRepository;
pub use state_dir::StateDir;
