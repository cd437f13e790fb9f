use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionCache;
use crate::error::{SheetError, SheetResult};
use crate::remote::{Row, with_timeout};
use crate::snapshot::{Freshness, SnapshotCache, SnapshotRead, TableSnapshot};

/// Rows selected by a query, with the freshness of the snapshot they came from.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub headers: Row,
    pub rows: Vec<Row>,
    pub freshness: Freshness,
    #[serde(skip)]
    pub error: Option<SheetError>,
}

impl QueryResult {
    fn empty() -> Self {
        QueryResult {
            headers: Vec::new(),
            rows: Vec::new(),
            freshness: Freshness::Fresh,
            error: None,
        }
    }

    fn from_read(read: &SnapshotRead, headers: Row, rows: Vec<Row>) -> Self {
        QueryResult {
            headers,
            rows,
            freshness: read.freshness,
            error: read.error.clone(),
        }
    }
}

/// The newest row of the sheet.
#[derive(Debug, Clone)]
pub struct Latest {
    pub row: Option<Row>,
    pub freshness: Freshness,
    pub error: Option<SheetError>,
}

/// Runs lookups against the cached snapshot and writes straight to the sheet.
pub struct QueryEngine {
    snapshots: Arc<SnapshotCache>,
    connections: Arc<ConnectionCache>,
    timeout: Duration,
    refresh_after_append: bool,
}

impl QueryEngine {
    pub fn new(
        snapshots: Arc<SnapshotCache>,
        connections: Arc<ConnectionCache>,
        timeout: Duration,
        refresh_after_append: bool,
    ) -> Self {
        QueryEngine {
            snapshots,
            connections,
            timeout,
            refresh_after_append,
        }
    }

    pub async fn snapshot(&self, force: bool) -> SnapshotRead {
        self.snapshots.get(force).await
    }

    /// Last row of the cached snapshot.
    pub async fn latest(&self) -> Latest {
        let read = self.snapshots.get(false).await;
        Latest {
            row: read.snapshot.rows.last().cloned(),
            freshness: read.freshness,
            error: read.error,
        }
    }

    /// Case-insensitive substring search over every cell of the cached snapshot.
    ///
    /// A blank query matches nothing and does not touch the cache.
    pub async fn search(&self, query: &str, max_results: usize) -> QueryResult {
        self.run_search(query, max_results, false).await
    }

    /// Same as [`search`](Self::search) but against a freshly read snapshot.
    pub async fn search_fresh(&self, query: &str, max_results: usize) -> QueryResult {
        self.run_search(query, max_results, true).await
    }

    async fn run_search(&self, query: &str, max_results: usize, force: bool) -> QueryResult {
        if query.trim().is_empty() {
            return QueryResult::empty();
        }
        let read = self.snapshots.get(force).await;
        let (headers, rows) = search_snapshot(&read.snapshot, query, max_results);
        QueryResult::from_read(&read, headers, rows)
    }

    /// The table as shown on the index page: the last `max_rows` rows, or all
    /// of them when `max_rows` is zero.
    pub async fn visible_rows(&self, max_rows: usize) -> QueryResult {
        let read = self.snapshots.get(false).await;
        let rows = &read.snapshot.rows;
        let start = if max_rows > 0 && rows.len() > max_rows {
            rows.len() - max_rows
        } else {
            0
        };
        QueryResult::from_read(&read, read.snapshot.headers.clone(), rows[start..].to_vec())
    }

    /// Append `[name, email, age]` to the sheet.
    ///
    /// The write goes straight to the remote source. The cached snapshot keeps
    /// serving the old rows until its TTL runs out, unless refresh-after-append
    /// is enabled.
    ///
    /// # Errors
    /// * connection errors when no session can be opened
    /// * `SheetError::RemoteWrite` or `SheetError::Timeout` when the append fails
    pub async fn append(&self, name: &str, email: &str, age: &str) -> SheetResult<()> {
        let handle = self.connections.get().await?;
        let row = vec![name.to_string(), email.to_string(), age.to_string()];

        if let Err(e) = with_timeout(self.timeout, handle.session.append_row(&row)).await {
            warn!("append to sheet {} failed: {}", handle.sheet_id, e);
            if e.is_auth_failure() {
                self.connections.invalidate();
            }
            return Err(e);
        }

        info!("appended row to sheet {}", handle.sheet_id);
        if self.refresh_after_append {
            self.snapshots.invalidate();
        }
        Ok(())
    }
}

/// Rows of `snapshot` having at least one cell that contains `query`,
/// ignoring case, in snapshot order and capped at `max_results` (`0` means no cap).
///
/// Returns empty headers and rows for a blank query.
pub fn search_snapshot(snapshot: &TableSnapshot, query: &str, max_results: usize) -> (Row, Vec<Row>) {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let matches = snapshot
        .rows
        .iter()
        .filter(|row| row.iter().any(|cell| cell.to_lowercase().contains(&needle)))
        .cloned();
    let rows = if max_results > 0 {
        matches.take(max_results).collect()
    } else {
        matches.collect()
    };

    (snapshot.headers.clone(), rows)
}
