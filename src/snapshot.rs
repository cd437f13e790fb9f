use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::connection::ConnectionCache;
use crate::error::{SheetError, SheetResult};
use crate::remote::{AttemptLog, ConnectionHandle, Row, with_timeout};

/// An immutable copy of the whole sheet at one point in time.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub headers: Row,
    pub rows: Vec<Row>,
    /// Moment the read started; drives freshness.
    pub fetched_at: Instant,
    /// Wall-clock time of the same moment, for display.
    pub fetched_wall: DateTime<Utc>,
}

impl TableSnapshot {
    pub fn empty() -> Self {
        TableSnapshot {
            headers: Vec::new(),
            rows: Vec::new(),
            fetched_at: Instant::now(),
            fetched_wall: Utc::now(),
        }
    }

    /// Split a raw read into headers (first row) and data rows (the rest).
    /// Rows are kept exactly as read, ragged lengths included.
    pub fn from_values(mut values: Vec<Row>, fetched_at: Instant, fetched_wall: DateTime<Utc>) -> Self {
        let headers = if values.is_empty() {
            Vec::new()
        } else {
            values.remove(0)
        };
        TableSnapshot {
            headers,
            rows: values,
            fetched_at,
            fetched_wall,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// How much to trust a [`SnapshotRead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Read within the TTL window, or just refreshed.
    Fresh,
    /// Last good snapshot, served because a refresh failed.
    Stale,
    /// No snapshot could be produced; the data is empty.
    Unavailable,
}

/// A snapshot handed out by the cache, with the reason it might be degraded.
#[derive(Debug, Clone)]
pub struct SnapshotRead {
    pub snapshot: Arc<TableSnapshot>,
    pub freshness: Freshness,
    pub error: Option<SheetError>,
}

impl SnapshotRead {
    fn fresh(snapshot: Arc<TableSnapshot>) -> Self {
        SnapshotRead {
            snapshot,
            freshness: Freshness::Fresh,
            error: None,
        }
    }
}

struct Slot {
    snapshot: Arc<TableSnapshot>,
    generation: u64,
    seq: u64,
}

/// Memoizes the last full read of the sheet for a short TTL.
///
/// * fresh reads take a read lock and never wait on a refresh
/// * at most one refresh runs at a time; callers queued behind it re-check
///   and reuse its result, including its failure
/// * a failed refresh never overwrites the stored snapshot or its timestamp
pub struct SnapshotCache {
    connections: Arc<ConnectionCache>,
    ttl: Duration,
    timeout: Duration,
    serve_stale: bool,
    slot: Arc<RwLock<Option<Slot>>>,
    generation: Arc<AtomicU64>,
    started: AtomicU64,
    attempts: Arc<AttemptLog>,
    gate: Arc<Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(
        connections: Arc<ConnectionCache>,
        ttl: Duration,
        timeout: Duration,
        serve_stale: bool,
    ) -> Self {
        SnapshotCache {
            connections,
            ttl,
            timeout,
            serve_stale,
            slot: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            started: AtomicU64::new(0),
            attempts: Arc::new(AttemptLog::default()),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Get the current snapshot, refreshing it when stale, missing or `force`d.
    ///
    /// A forced call is satisfied by any refresh that started after the call
    /// was made, so a burst of forced callers still costs one read.
    pub async fn get(&self, force: bool) -> SnapshotRead {
        let ticket = self.started.load(Ordering::SeqCst);
        let attempt_ticket = self.attempts.ticket();
        if !force {
            if let Some(snapshot) = self.current(None) {
                return SnapshotRead::fresh(snapshot);
            }
        }

        let gate = Arc::clone(&self.gate).lock_owned().await;
        if let Some(snapshot) = self.current(force.then_some(ticket)) {
            return SnapshotRead::fresh(snapshot);
        }
        if let Some(e) = self.attempts.failed_since(attempt_ticket) {
            drop(gate);
            return self.fallback(e);
        }

        let seq = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let connections = Arc::clone(&self.connections);
        let slot = Arc::clone(&self.slot);
        let attempts = Arc::clone(&self.attempts);
        let generation = self.generation.load(Ordering::SeqCst);
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let _gate = gate;
            let result = fetch(&connections, timeout).await.map(Arc::new);
            if let Ok(snapshot) = &result {
                *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Slot {
                    snapshot: Arc::clone(snapshot),
                    generation,
                    seq,
                });
                debug!(
                    "snapshot refreshed: {} headers, {} rows",
                    snapshot.headers.len(),
                    snapshot.rows.len()
                );
            }
            attempts.record(&result);
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(SheetError::RemoteRead(format!("refresh task failed: {}", e))),
        };

        match result {
            Ok(snapshot) => SnapshotRead::fresh(snapshot),
            Err(e) => self.fallback(e),
        }
    }

    /// Mark the stored snapshot as out of date. The next `get` refreshes it.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Age of the stored snapshot, if any.
    pub fn age(&self) -> Option<Duration> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|s| s.snapshot.age())
    }

    /// The stored snapshot if it may be served. With `after`, the TTL is ignored
    /// and the snapshot must come from a refresh started after that ticket.
    fn current(&self, after: Option<u64>) -> Option<Arc<TableSnapshot>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        let slot = slot.as_ref()?;
        if slot.generation != self.generation.load(Ordering::SeqCst) {
            return None;
        }
        let usable = match after {
            Some(ticket) => slot.seq > ticket,
            None => slot.snapshot.age() < self.ttl,
        };
        usable.then(|| Arc::clone(&slot.snapshot))
    }

    fn fallback(&self, error: SheetError) -> SnapshotRead {
        if self.serve_stale {
            let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slot.as_ref() {
                warn!(
                    "snapshot refresh failed ({}); serving snapshot from {:?} ago",
                    error,
                    slot.snapshot.age()
                );
                return SnapshotRead {
                    snapshot: Arc::clone(&slot.snapshot),
                    freshness: Freshness::Stale,
                    error: Some(error),
                };
            }
        }
        warn!("snapshot refresh failed ({}); serving empty table", error);
        SnapshotRead {
            snapshot: Arc::new(TableSnapshot::empty()),
            freshness: Freshness::Unavailable,
            error: Some(error),
        }
    }
}

/// Read the whole sheet. When the remote rejects the cached session, it is
/// dropped and the read is retried once on a new one.
async fn fetch(connections: &ConnectionCache, timeout: Duration) -> SheetResult<TableSnapshot> {
    let handle = connections.get().await?;
    match read(&handle, timeout).await {
        Err(e) if e.is_auth_failure() => {
            warn!("sheet {} rejected the session ({}); reconnecting", handle.sheet_id, e);
            connections.invalidate();
            let handle = connections.get().await?;
            read(&handle, timeout).await.inspect_err(|e| {
                if e.is_auth_failure() {
                    connections.invalidate();
                }
            })
        }
        result => result,
    }
}

async fn read(handle: &ConnectionHandle, timeout: Duration) -> SheetResult<TableSnapshot> {
    let fetched_at = Instant::now();
    let fetched_wall = Utc::now();
    let values = with_timeout(timeout, handle.session.read_all()).await?;
    info!("read {} rows from sheet {}", values.len(), handle.sheet_id);
    Ok(TableSnapshot::from_values(values, fetched_at, fetched_wall))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn first_row_becomes_headers() {
        let snapshot = TableSnapshot::from_values(
            vec![row(&["Name", "Email"]), row(&["John", "j@x.com"]), row(&["Alice"])],
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(snapshot.headers, row(&["Name", "Email"]));
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[1], row(&["Alice"]));
    }

    #[test]
    fn single_row_yields_headers_only() {
        let snapshot = TableSnapshot::from_values(vec![row(&["Name"])], Instant::now(), Utc::now());
        assert_eq!(snapshot.headers, row(&["Name"]));
        assert!(snapshot.rows.is_empty());
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn no_rows_yields_empty_snapshot() {
        let snapshot = TableSnapshot::from_values(Vec::new(), Instant::now(), Utc::now());
        assert!(snapshot.is_empty());
    }
}
