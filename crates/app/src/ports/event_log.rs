//! Event log port: the durable, append-only schedule & presence log.
//!
//! The log's total order is `(timestamp, sequence)`: events are sorted by
//! timestamp and ties are broken by the order in which they were appended.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use ccuhub_domain::error::CcuError;
use ccuhub_domain::event::Event;
use ccuhub_domain::time::{Timestamp, to_millis};

/// Page size used by [`LogCursor`].
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// A persisted event together with its append sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub sequence: u64,
    pub event: Event,
}

/// Exclusive lower bound for a page query: entries strictly after
/// `(timestamp_ms, sequence)` in log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition {
    pub timestamp_ms: i64,
    pub sequence: u64,
}

impl LogPosition {
    /// Position just before the first entry at or after `since`.
    #[must_use]
    pub fn start_of(since: Timestamp) -> Self {
        Self {
            timestamp_ms: to_millis(since),
            sequence: 0,
        }
    }

    #[must_use]
    pub fn of(entry: &LogEntry) -> Self {
        Self {
            timestamp_ms: to_millis(entry.event.timestamp),
            sequence: entry.sequence,
        }
    }
}

/// Durable append-only event storage.
pub trait EventLog: Send + Sync {
    /// Persist an event. Once this returns `Ok` the event is visible to
    /// subsequent reads. Appending the same event id twice is a no-op that
    /// returns the original entry.
    fn append(&self, event: Event) -> impl Future<Output = Result<LogEntry, CcuError>> + Send;

    /// Entries strictly after `from` in log order, with `sequence <= upper`,
    /// at most `limit` of them.
    fn fetch_page(
        &self,
        from: LogPosition,
        upper: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogEntry>, CcuError>> + Send;

    /// Highest sequence number persisted so far (`0` when empty).
    fn high_water_mark(&self) -> impl Future<Output = Result<u64, CcuError>> + Send;

    /// Most recent event (in log order) whose `source` equals `source`.
    fn latest_for_source(
        &self,
        source: &str,
    ) -> impl Future<Output = Result<Option<Event>, CcuError>> + Send;

    /// Reopen the persistent state without restarting the process.
    fn reload(&self) -> impl Future<Output = Result<(), CcuError>> + Send;

    /// Lazily read everything at or after `since` that is persisted now.
    fn read_since(
        &self,
        since: Timestamp,
    ) -> impl Future<Output = Result<LogCursor<'_, Self>, CcuError>> + Send
    where
        Self: Sized,
    {
        async move {
            let upper = self.high_water_mark().await?;
            Ok(LogCursor::new(self, since, upper))
        }
    }
}

impl<T: EventLog> EventLog for Arc<T> {
    fn append(&self, event: Event) -> impl Future<Output = Result<LogEntry, CcuError>> + Send {
        (**self).append(event)
    }

    fn fetch_page(
        &self,
        from: LogPosition,
        upper: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogEntry>, CcuError>> + Send {
        (**self).fetch_page(from, upper, limit)
    }

    fn high_water_mark(&self) -> impl Future<Output = Result<u64, CcuError>> + Send {
        (**self).high_water_mark()
    }

    fn latest_for_source(
        &self,
        source: &str,
    ) -> impl Future<Output = Result<Option<Event>, CcuError>> + Send {
        (**self).latest_for_source(source)
    }

    fn reload(&self) -> impl Future<Output = Result<(), CcuError>> + Send {
        (**self).reload()
    }
}

/// Lazy, restartable, finite sequence of events read from an [`EventLog`].
///
/// The upper bound is fixed when the cursor is created, so events appended
/// while iterating are not included and [`restart`](Self::restart) yields the
/// same sequence again.
pub struct LogCursor<'a, L> {
    log: &'a L,
    start: LogPosition,
    position: LogPosition,
    upper: u64,
    page_size: usize,
    buffer: VecDeque<LogEntry>,
    exhausted: bool,
}

impl<'a, L: EventLog> LogCursor<'a, L> {
    pub fn new(log: &'a L, since: Timestamp, upper: u64) -> Self {
        let start = LogPosition::start_of(since);
        Self {
            log,
            start,
            position: start,
            upper,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: upper == 0,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sequence number of the newest entry this cursor can return.
    #[must_use]
    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    /// Next event in log order, or `None` once the snapshot is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates storage errors from fetching the next page.
    pub async fn next(&mut self) -> Result<Option<Event>, CcuError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .log
                .fetch_page(self.position, self.upper, self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.position = LogPosition::of(last);
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front().map(|entry| entry.event))
    }

    /// Rewind to the beginning of the same snapshot.
    pub fn restart(&mut self) {
        self.position = self.start;
        self.buffer.clear();
        self.exhausted = self.upper == 0;
    }

    /// Drain the remaining events into a vector.
    ///
    /// # Errors
    ///
    /// Propagates storage errors from fetching pages.
    pub async fn collect(mut self) -> Result<Vec<Event>, CcuError> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await? {
            events.push(event);
        }
        Ok(events)
    }
}


#[cfg(test)]
mod tests {
    use super::memory::InMemoryEventLog;
    use super::*;
    use ccuhub_domain::event::EventKind;
    use ccuhub_domain::time::{epoch, from_millis};

    fn event_at(ms: i64, source: &str) -> Event {
        Event::new(
            EventKind::DeviceStateChange,
            source,
            from_millis(ms),
            serde_json::json!({"value": ms}),
        )
    }

    #[tokio::test]
    async fn should_read_all_events_in_timestamp_order() {
        let log = InMemoryEventLog::default();
        for ms in [30, 10, 20, 10] {
            log.append(event_at(ms, "HM-1:1.STATE")).await.unwrap();
        }
        let events = log.read_since(epoch()).await.unwrap().collect().await.unwrap();
        let times: Vec<i64> = events.iter().map(|e| to_millis(e.timestamp)).collect();
        assert_eq!(times, vec![10, 10, 20, 30]);
    }

    #[tokio::test]
    async fn should_include_events_at_since_timestamp() {
        let log = InMemoryEventLog::default();
        for ms in [10, 20, 30] {
            log.append(event_at(ms, "a")).await.unwrap();
        }
        let events = log
            .read_since(from_millis(20))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn should_page_through_more_than_one_page() {
        let log = InMemoryEventLog::default();
        for ms in 0..7 {
            log.append(event_at(ms, "a")).await.unwrap();
        }
        let cursor = log.read_since(epoch()).await.unwrap().with_page_size(3);
        assert_eq!(cursor.collect().await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn should_not_see_events_appended_after_creation() {
        let log = InMemoryEventLog::default();
        log.append(event_at(1, "a")).await.unwrap();
        let mut cursor = log.read_since(epoch()).await.unwrap();
        log.append(event_at(2, "a")).await.unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_yield_same_sequence_after_restart() {
        let log = InMemoryEventLog::default();
        for ms in [5, 3, 9] {
            log.append(event_at(ms, "a")).await.unwrap();
        }
        let mut cursor = log.read_since(epoch()).await.unwrap().with_page_size(2);
        let mut first = Vec::new();
        while let Some(e) = cursor.next().await.unwrap() {
            first.push(e.id);
        }
        cursor.restart();
        let mut second = Vec::new();
        while let Some(e) = cursor.next().await.unwrap() {
            second.push(e.id);
        }
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn should_return_nothing_for_empty_log() {
        let log = InMemoryEventLog::default();
        let mut cursor = log.read_since(epoch()).await.unwrap();
        assert_eq!(cursor.upper_bound(), 0);
        assert!(cursor.next().await.unwrap().is_none());
    }
}
