//! `SQLite` implementation of [`EventLog`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use ccuhub_app::ports::{EventLog, LogEntry, LogPosition};
use ccuhub_domain::error::CcuError;
use ccuhub_domain::event::{Event, EventKind};
use ccuhub_domain::id::EventId;
use ccuhub_domain::time::{from_millis, to_millis};

use crate::error::StorageError;
use crate::state_dir::{Command, StateDir};

struct Wrapper(LogEntry);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let seq: i64 = row.try_get("seq")?;
        let id: uuid::Uuid = row.try_get("id")?;
        let timestamp_ms: i64 = row.try_get("timestamp_ms")?;
        let source: String = row.try_get("source")?;
        let kind: String = row.try_get("kind")?;
        let payload: String = row.try_get("payload")?;

        let kind: EventKind = kind
            .parse()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let payload: serde_json::Value =
            serde_json::from_str(&payload).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Self(LogEntry {
            sequence: u64::try_from(seq).unwrap_or_default(),
            event: Event {
                id: EventId::from_uuid(id),
                timestamp: from_millis(timestamp_ms),
                source,
                kind,
                payload,
            },
        }))
    }
}

const INSERT: &str = r"
    INSERT OR IGNORE INTO events (id, timestamp_ms, source, kind, payload)
    VALUES (?, ?, ?, ?, ?)
";

const SELECT_BY_ID: &str =
    "SELECT seq, id, timestamp_ms, source, kind, payload FROM events WHERE id = ?";
const SELECT_PAGE: &str = r"
    SELECT seq, id, timestamp_ms, source, kind, payload FROM events
    WHERE seq <= ? AND (timestamp_ms > ? OR (timestamp_ms = ? AND seq > ?))
    ORDER BY timestamp_ms, seq
    LIMIT ?
";
const SELECT_LATEST_FOR_SOURCE: &str = r"
    SELECT seq, id, timestamp_ms, source, kind, payload FROM events
    WHERE source = ?
    ORDER BY timestamp_ms DESC, seq DESC
    LIMIT 1
";
const SELECT_HIGH_WATER_MARK: &str = "SELECT COALESCE(MAX(seq), 0) FROM events";

/// Insert `event` unless its id is already stored, returning the stored
/// entry either way. Only called from the writer task.
pub(crate) async fn insert(pool: &SqlitePool, event: &Event) -> Result<LogEntry, StorageError> {
    let payload = serde_json::to_string(&event.payload)?;

    sqlx::query(INSERT)
        .bind(event.id.as_uuid())
        .bind(to_millis(event.timestamp))
        .bind(&event.source)
        .bind(event.kind.as_str())
        .bind(&payload)
        .execute(pool)
        .await?;

    let row: Wrapper = sqlx::query_as(SELECT_BY_ID)
        .bind(event.id.as_uuid())
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// `SQLite`-backed event log living in a [`StateDir`].
#[derive(Clone)]
pub struct SqliteEventLog {
    dir: StateDir,
}

impl SqliteEventLog {
    #[must_use]
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }
}

impl EventLog for SqliteEventLog {
    async fn append(&self, event: Event) -> Result<LogEntry, CcuError> {
        let entry = self
            .dir
            .request(|reply| Command::Append { event, reply })
            .await?;
        Ok(entry)
    }

    async fn fetch_page(
        &self,
        from: LogPosition,
        upper: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, CcuError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_PAGE)
            .bind(as_i64(upper))
            .bind(from.timestamp_ms)
            .bind(from.timestamp_ms)
            .bind(as_i64(from.sequence))
            .bind(limit)
            .fetch_all(&self.dir.reader())
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn high_water_mark(&self) -> Result<u64, CcuError> {
        let (max,): (i64,) = sqlx::query_as(SELECT_HIGH_WATER_MARK)
            .fetch_one(&self.dir.reader())
            .await
            .map_err(StorageError::from)?;
        Ok(u64::try_from(max).unwrap_or_default())
    }

    async fn latest_for_source(&self, source: &str) -> Result<Option<Event>, CcuError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_LATEST_FOR_SOURCE)
            .bind(source)
            .fetch_optional(&self.dir.reader())
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(|w| w.0.event))
    }

    async fn reload(&self) -> Result<(), CcuError> {
        self.dir.reload().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::TempStateDir;
    use ccuhub_domain::time::epoch;

    async fn setup() -> (TempStateDir, SqliteEventLog) {
        let tmp = TempStateDir::new();
        let log = tmp.open().await.event_log();
        (tmp, log)
    }

    fn event_at(ms: i64, source: &str) -> Event {
        Event::new(
            EventKind::DeviceStateChange,
            source,
            from_millis(ms),
            serde_json::json!({ "value": ms }),
        )
    }

    #[tokio::test]
    async fn should_order_by_timestamp_then_append_order() {
        let (_tmp, log) = setup().await;
        log.append(event_at(20, "b")).await.unwrap();
        log.append(event_at(10, "a")).await.unwrap();
        log.append(event_at(20, "c")).await.unwrap();

        let events = log.read_since(epoch()).await.unwrap().collect().await.unwrap();
        let sources: Vec<&str> = events.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn should_roundtrip_event_fields() {
        let (_tmp, log) = setup().await;
        let event = event_at(42, "HM-1:1.STATE");
        log.append(event.clone()).await.unwrap();

        let stored = log.read_since(epoch()).await.unwrap().collect().await.unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[tokio::test]
    async fn should_ignore_duplicate_event_id() {
        let (_tmp, log) = setup().await;
        let event = event_at(1, "a");
        let first = log.append(event.clone()).await.unwrap();
        let second = log.append(event).await.unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(log.high_water_mark().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_read_since_inclusive_with_small_pages() {
        let (_tmp, log) = setup().await;
        for ms in 1..=7 {
            log.append(event_at(ms * 10, "s")).await.unwrap();
        }

        let cursor = log
            .read_since(from_millis(30))
            .await
            .unwrap()
            .with_page_size(2);
        let events = cursor.collect().await.unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].timestamp, from_millis(30));
    }

    #[tokio::test]
    async fn should_bound_cursor_to_snapshot_and_restart() {
        let (_tmp, log) = setup().await;
        log.append(event_at(1, "a")).await.unwrap();
        log.append(event_at(2, "b")).await.unwrap();

        let mut cursor = log.read_since(epoch()).await.unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        log.append(event_at(3, "late")).await.unwrap();

        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_none());

        cursor.restart();
        let mut again = Vec::new();
        while let Some(event) = cursor.next().await.unwrap() {
            again.push(event.source);
        }
        assert_eq!(again, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn should_find_latest_event_for_source() {
        let (_tmp, log) = setup().await;
        log.append(event_at(5, "alice")).await.unwrap();
        log.append(event_at(9, "alice")).await.unwrap();
        log.append(event_at(7, "alice")).await.unwrap();
        log.append(event_at(50, "bob")).await.unwrap();

        let latest = log.latest_for_source("alice").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, from_millis(9));
        assert!(log.latest_for_source("carol").await.unwrap().is_none());
    }
}
