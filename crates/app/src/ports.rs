//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod event_log;
pub mod listener;
pub mod remote;
pub mod schedule_repo;

pub use event_log::{EventLog, LogCursor, LogEntry, LogPosition};
pub use listener::Listener;
pub use remote::{EventSink, Notice, RawEvent, RemoteClient, SubscriptionHandle};
pub use schedule_repo::ScheduleRepository;
