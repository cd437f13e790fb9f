use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{SheetError, SheetResult};

/// One row as read from the sheet. Cells are opaque strings.
pub type Row = Vec<String>;

/// Opens authenticated sessions against the remote sheet.
///
/// Opening a session is the expensive step (credential load, token exchange,
/// sheet lookup), which is why the result is memoized by
/// [`ConnectionCache`](crate::connection::ConnectionCache).
#[async_trait]
pub trait TableConnector: Send + Sync {
    /// Identifier of the sheet this connector targets.
    fn sheet_id(&self) -> &str;

    /// Longest a session stays valid on the remote side, if it expires on its
    /// own (a bearer token, for instance). Sessions are never reused past it.
    fn max_session_age(&self) -> Option<Duration> {
        None
    }

    async fn connect(&self) -> SheetResult<Arc<dyn TableSession>>;
}

/// An open session on one sheet.
#[async_trait]
pub trait TableSession: Send + Sync {
    /// Every row of the sheet, first row included. Row lengths are whatever the
    /// source returned.
    async fn read_all(&self) -> SheetResult<Vec<Row>>;

    async fn append_row(&self, row: &[String]) -> SheetResult<()>;
}

/// A memoized session plus the moment it was established.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub session: Arc<dyn TableSession>,
    pub sheet_id: String,
    pub established_at: Instant,
}

impl ConnectionHandle {
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("sheet_id", &self.sheet_id)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

/// Run a remote call under `limit`, mapping an elapsed deadline to
/// [`SheetError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> SheetResult<T>
where
    F: std::future::Future<Output = SheetResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SheetError::Timeout(limit)),
    }
}

/// Outcome of the last finished refresh behind a single-flight gate.
///
/// Callers take a ticket before queueing on the gate. Once they hold it, a
/// failure recorded after their ticket is the result of an attempt they waited
/// on, so they reuse that error instead of calling the remote again. A caller
/// arriving after the failure finished gets a newer ticket and retries.
#[derive(Default)]
pub(crate) struct AttemptLog {
    finished: AtomicU64,
    failure: RwLock<Option<(u64, SheetError)>>,
}

impl AttemptLog {
    pub(crate) fn ticket(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }

    /// Must be called while the gate is still held.
    pub(crate) fn record<T>(&self, result: &SheetResult<T>) {
        let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) =
            result.as_ref().err().map(|e| (done, e.clone()));
    }

    /// The error of an attempt that finished after `ticket` was taken.
    pub(crate) fn failed_since(&self, ticket: u64) -> Option<SheetError> {
        let failure = self.failure.read().unwrap_or_else(PoisonError::into_inner);
        failure
            .as_ref()
            .filter(|(done, _)| *done > ticket)
            .map(|(_, error)| error.clone())
    }
}
