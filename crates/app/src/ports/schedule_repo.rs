//! Schedule repository port: persistence for schedules.

use std::future::Future;
use std::sync::Arc;

use ccuhub_domain::error::CcuError;
use ccuhub_domain::id::ScheduleId;
use ccuhub_domain::schedule::Schedule;

/// Repository for persisting and querying [`Schedule`]s.
pub trait ScheduleRepository: Send + Sync {
    /// Get all schedules.
    fn get_all(&self) -> impl Future<Output = Result<Vec<Schedule>, CcuError>> + Send;

    /// Insert or replace a schedule.
    fn save(&self, schedule: Schedule) -> impl Future<Output = Result<Schedule, CcuError>> + Send;

    /// Delete a schedule by its unique identifier.
    fn delete(&self, id: ScheduleId) -> impl Future<Output = Result<(), CcuError>> + Send;
}

impl<T: ScheduleRepository> ScheduleRepository for Arc<T> {
    fn get_all(&self) -> impl Future<Output = Result<Vec<Schedule>, CcuError>> + Send {
        (**self).get_all()
    }

    fn save(&self, schedule: Schedule) -> impl Future<Output = Result<Schedule, CcuError>> + Send {
        (**self).save(schedule)
    }

    fn delete(&self, id: ScheduleId) -> impl Future<Output = Result<(), CcuError>> + Send {
        (**self).delete(id)
    }
}
