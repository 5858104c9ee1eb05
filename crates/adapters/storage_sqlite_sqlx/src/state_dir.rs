//! The state directory: one database, one writer.
//!
//! Every mutation goes through a single writer task fed by a command
//! channel, so writes are applied in the order they were issued. Readers use
//! the pool currently published by the writer. A reload swaps that pool
//! while the writer is busy, so writes issued during a reload wait in the
//! channel and are applied to the new connection afterwards.

use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot, watch};

use ccuhub_app::ports::LogEntry;
use ccuhub_domain::event::Event;
use ccuhub_domain::id::ScheduleId;
use ccuhub_domain::schedule::Schedule;

use crate::error::StorageError;
use crate::event_log::{self, SqliteEventLog};
use crate::pool::{self, Config};
use crate::schedule_repo::{self, SqliteScheduleRepository};

const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

pub(crate) enum Command {
    Append { event: Event, reply: Reply<LogEntry> },
    SaveSchedule { schedule: Schedule, reply: Reply<()> },
    DeleteSchedule { id: ScheduleId, reply: Reply<bool> },
    Reload { reply: Reply<()> },
}

/// Handle to an open state directory. Cheap to clone.
#[derive(Clone)]
pub struct StateDir {
    config: Arc<Config>,
    pool: watch::Receiver<SqlitePool>,
    commands: mpsc::Sender<Command>,
}

impl StateDir {
    pub(crate) async fn open(config: Config) -> Result<Self, StorageError> {
        let pool = pool::connect(&config).await?;
        let config = Arc::new(config);
        let (published, receiver) = watch::channel(pool.clone());
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);

        let writer = Writer {
            config: Arc::clone(&config),
            pool,
            published,
            inbox,
        };
        tokio::spawn(writer.run());

        tracing::info!(path = %config.state_dir.display(), "state directory opened");
        Ok(Self {
            config,
            pool: receiver,
            commands,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.state_dir
    }

    #[must_use]
    pub fn event_log(&self) -> SqliteEventLog {
        SqliteEventLog::new(self.clone())
    }

    #[must_use]
    pub fn schedule_repository(&self) -> SqliteScheduleRepository {
        SqliteScheduleRepository::new(self.clone())
    }

    /// Reopen the database without restarting the process.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the new connection cannot be opened;
    /// the previous connection stays in use in that case.
    pub async fn reload(&self) -> Result<(), StorageError> {
        self.request(|reply| Command::Reload { reply }).await
    }

    /// The pool readers should use right now.
    pub(crate) fn reader(&self) -> SqlitePool {
        self.pool.borrow().clone()
    }

    pub(crate) async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, StorageError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| StorageError::WriterStopped)?;
        response.await.map_err(|_| StorageError::WriterStopped)?
    }
}

struct Writer {
    config: Arc<Config>,
    pool: SqlitePool,
    published: watch::Sender<SqlitePool>,
    inbox: mpsc::Receiver<Command>,
}

impl Writer {
    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            self.handle(command).await;
        }
        self.pool.close().await;
        tracing::debug!("storage writer stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Append { event, reply } => {
                let result = self
                    .config
                    .append_retry
                    .run("append event", StorageError::is_transient, || {
                        event_log::insert(&self.pool, &event)
                    })
                    .await;
                if let Err(err) = &result {
                    tracing::error!(event = %event.id, error = %err, "append failed");
                }
                let _ = reply.send(result);
            }
            Command::SaveSchedule { schedule, reply } => {
                let _ = reply.send(schedule_repo::upsert(&self.pool, &schedule).await);
            }
            Command::DeleteSchedule { id, reply } => {
                let _ = reply.send(schedule_repo::delete(&self.pool, id).await);
            }
            Command::Reload { reply } => {
                let _ = reply.send(self.reload().await);
            }
        }
    }

    async fn reload(&mut self) -> Result<(), StorageError> {
        tracing::info!(path = %self.config.state_dir.display(), "reloading state directory");
        let fresh = pool::connect(&self.config).await.inspect_err(|err| {
            tracing::error!(error = %err, "reload failed, keeping current connection");
        })?;
        self.pool = fresh.clone();
        self.published.send_replace(fresh);
        tracing::info!("state directory reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::pool::testing::TempStateDir;
    use ccuhub_app::ports::EventLog;
    use ccuhub_app::retry::{BackoffPolicy, RetryPolicy};
    use ccuhub_domain::error::CcuError;
    use ccuhub_domain::event::EventKind;
    use ccuhub_domain::time::{epoch, from_millis};

    const REJECT_EVENTS: &str = "CREATE TRIGGER reject_events BEFORE INSERT ON events \
        BEGIN SELECT RAISE(ABORT, 'database is locked'); END";

    fn event_at(ms: i64) -> Event {
        Event::new(
            EventKind::DeviceStateChange,
            "HM-1:1.STATE",
            from_millis(ms),
            serde_json::json!({ "value": true }),
        )
    }

    /// Opens `tmp` with a constant backoff of `delay` between `attempts`.
    async fn open_with_retry(tmp: &TempStateDir, attempts: u32, delay: Duration) -> StateDir {
        Config {
            append_retry: RetryPolicy {
                attempts,
                backoff: BackoffPolicy {
                    first: delay,
                    max: delay,
                    factor: 1.0,
                },
            },
            ..tmp.config()
        }
        .open()
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn should_keep_events_readable_after_reload() {
        let tmp = TempStateDir::new();
        let dir = tmp.open().await;
        let log = dir.event_log();
        log.append(event_at(1)).await.unwrap();

        dir.reload().await.unwrap();

        let events = log.read_since(epoch()).await.unwrap().collect().await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn should_apply_writes_issued_during_reload() {
        let tmp = TempStateDir::new();
        let dir = tmp.open().await;
        let log = dir.event_log();

        let (reloaded, first, second) = tokio::join!(
            dir.reload(),
            log.append(event_at(1)),
            log.append(event_at(2)),
        );
        reloaded.unwrap();
        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first.sequence, second.sequence);

        let events = log.read_since(epoch()).await.unwrap().collect().await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn should_persist_across_reopen() {
        let tmp = TempStateDir::new();
        {
            let dir = tmp.open().await;
            dir.event_log().append(event_at(5)).await.unwrap();
        }

        let reopened = tmp.open().await;
        let events = reopened
            .event_log()
            .read_since(epoch())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, from_millis(5));
    }

    #[tokio::test]
    async fn should_retry_rejected_append_until_it_succeeds() {
        let tmp = TempStateDir::new();
        let dir = open_with_retry(&tmp, 50, Duration::from_millis(10)).await;
        sqlx::query(REJECT_EVENTS).execute(&dir.reader()).await.unwrap();

        let log = dir.event_log();
        let append = tokio::spawn(async move { log.append(event_at(1)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!append.is_finished());

        sqlx::query("DROP TRIGGER reject_events")
            .execute(&dir.reader())
            .await
            .unwrap();

        let entry = append.await.unwrap().unwrap();
        assert_eq!(entry.sequence, 1);
        assert_eq!(dir.event_log().high_water_mark().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_fail_append_after_configured_attempts() {
        let tmp = TempStateDir::new();
        let delay = Duration::from_millis(25);
        let dir = open_with_retry(&tmp, 3, delay).await;
        sqlx::query(REJECT_EVENTS).execute(&dir.reader()).await.unwrap();

        let started = Instant::now();
        let result = dir.event_log().append(event_at(1)).await;

        assert!(matches!(result, Err(CcuError::Storage(_))));
        // three attempts sleep twice in between
        assert!(started.elapsed() >= delay * 2);
        assert_eq!(dir.event_log().high_water_mark().await.unwrap(), 0);

        // the writer keeps serving once the failure clears
        sqlx::query("DROP TRIGGER reject_events")
            .execute(&dir.reader())
            .await
            .unwrap();
        assert!(dir.event_log().append(event_at(2)).await.is_ok());
    }

    #[tokio::test]
    async fn should_fail_single_attempt_append_without_waiting() {
        let tmp = TempStateDir::new();
        let dir = open_with_retry(&tmp, 1, Duration::from_secs(30)).await;
        sqlx::query(REJECT_EVENTS).execute(&dir.reader()).await.unwrap();

        let started = Instant::now();
        let result = dir.event_log().append(event_at(1)).await;

        assert!(matches!(result, Err(CcuError::Storage(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn should_report_stopped_writer() {
        let tmp = TempStateDir::new();
        let dir = tmp.open().await;
        let (commands, _) = mpsc::channel(1);
        let orphan = StateDir {
            commands,
            ..dir.clone()
        };
        assert!(matches!(
            orphan.reload().await,
            Err(StorageError::WriterStopped)
        ));
    }
}
