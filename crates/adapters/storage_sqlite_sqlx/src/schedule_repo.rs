//! `SQLite` implementation of [`ScheduleRepository`].

use sqlx::SqlitePool;

use ccuhub_app::ports::ScheduleRepository;
use ccuhub_domain::error::{CcuError, NotFoundError};
use ccuhub_domain::id::ScheduleId;
use ccuhub_domain::schedule::Schedule;

use crate::error::StorageError;
use crate::state_dir::{Command, StateDir};

const UPSERT: &str = r"
    INSERT INTO schedules (id, definition) VALUES (?, ?)
    ON CONFLICT(id) DO UPDATE SET definition = excluded.definition
";
const DELETE: &str = "DELETE FROM schedules WHERE id = ?";
const SELECT_ALL: &str = "SELECT definition FROM schedules ORDER BY rowid";

pub(crate) async fn upsert(pool: &SqlitePool, schedule: &Schedule) -> Result<(), StorageError> {
    let definition = serde_json::to_string(schedule)?;
    sqlx::query(UPSERT)
        .bind(schedule.id.as_uuid())
        .bind(&definition)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns whether a row was deleted.
pub(crate) async fn delete(pool: &SqlitePool, id: ScheduleId) -> Result<bool, StorageError> {
    let result = sqlx::query(DELETE)
        .bind(id.as_uuid())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// `SQLite`-backed schedule repository living in a [`StateDir`].
#[derive(Clone)]
pub struct SqliteScheduleRepository {
    dir: StateDir,
}

impl SqliteScheduleRepository {
    #[must_use]
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }
}

impl ScheduleRepository for SqliteScheduleRepository {
    async fn get_all(&self) -> Result<Vec<Schedule>, CcuError> {
        let rows: Vec<(String,)> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.dir.reader())
            .await
            .map_err(StorageError::from)?;

        let mut schedules = Vec::with_capacity(rows.len());
        for (definition,) in rows {
            schedules.push(serde_json::from_str(&definition).map_err(StorageError::from)?);
        }
        Ok(schedules)
    }

    async fn save(&self, schedule: Schedule) -> Result<Schedule, CcuError> {
        let stored = schedule.clone();
        self.dir
            .request(|reply| Command::SaveSchedule { schedule, reply })
            .await?;
        Ok(stored)
    }

    async fn delete(&self, id: ScheduleId) -> Result<(), CcuError> {
        let deleted = self
            .dir
            .request(|reply| Command::DeleteSchedule { id, reply })
            .await?;
        if !deleted {
            return Err(NotFoundError {
                entity: "Schedule",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
