use log::{debug, info, warn};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{SheetError, SheetResult};
use crate::remote::{AttemptLog, ConnectionHandle, TableConnector, with_timeout};

/// Memoizes the authenticated session so that re-auth happens at most once per
/// reuse window.
///
/// Reads of a fresh handle only take a short read lock. A stale or missing
/// handle is refreshed behind `gate`, so concurrent callers share one connect,
/// and a failed connect is shared with everyone who queued behind it.
pub struct ConnectionCache {
    connector: Arc<dyn TableConnector>,
    reauth_after: Duration,
    timeout: Duration,
    serve_stale: bool,
    current: Arc<RwLock<Option<ConnectionHandle>>>,
    attempts: Arc<AttemptLog>,
    gate: Arc<Mutex<()>>,
}

impl ConnectionCache {
    /// The reuse window is `reauth_after`, shortened to the connector's
    /// session lifetime when that is smaller.
    pub fn new(
        connector: Arc<dyn TableConnector>,
        reauth_after: Duration,
        timeout: Duration,
        serve_stale: bool,
    ) -> Self {
        let reauth_after = match connector.max_session_age() {
            Some(limit) if limit < reauth_after => {
                info!(
                    "sessions for sheet {} expire after {:?}; re-authenticating at that age",
                    connector.sheet_id(),
                    limit
                );
                limit
            }
            _ => reauth_after,
        };
        ConnectionCache {
            connector,
            reauth_after,
            timeout,
            serve_stale,
            current: Arc::new(RwLock::new(None)),
            attempts: Arc::new(AttemptLog::default()),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn sheet_id(&self) -> &str {
        self.connector.sheet_id()
    }

    /// How long a handle is reused before re-authenticating.
    pub fn reauth_after(&self) -> Duration {
        self.reauth_after
    }

    /// Return a usable handle, connecting if the cached one is missing or past
    /// its reuse window.
    ///
    /// A failed reconnect leaves the old handle in place without refreshing its
    /// timestamp, so the next call tries again. When stale serving is enabled
    /// that old handle is returned instead of the error.
    ///
    /// # Errors
    /// * the connector's error (or `SheetError::Timeout`) when no handle can be served
    pub async fn get(&self) -> SheetResult<ConnectionHandle> {
        let ticket = self.attempts.ticket();
        if let Some(handle) = self.fresh() {
            return Ok(handle);
        }

        let gate = Arc::clone(&self.gate).lock_owned().await;
        if let Some(handle) = self.fresh() {
            return Ok(handle);
        }
        if let Some(e) = self.attempts.failed_since(ticket) {
            drop(gate);
            return self.fallback(e);
        }

        let connector = Arc::clone(&self.connector);
        let current = Arc::clone(&self.current);
        let attempts = Arc::clone(&self.attempts);
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let _gate = gate;
            let result = connect(connector.as_ref(), timeout).await;
            if let Ok(handle) = &result {
                *current.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
                info!("connected to sheet {}", handle.sheet_id);
            }
            attempts.record(&result);
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(SheetError::Connection(format!("connect task failed: {}", e))),
        };

        match result {
            Ok(handle) => Ok(handle),
            Err(e) => self.fallback(e),
        }
    }

    /// Drop the cached handle so the next `get` reconnects.
    pub fn invalidate(&self) {
        if self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("connection to sheet {} invalidated", self.sheet_id());
        }
    }

    fn fresh(&self) -> Option<ConnectionHandle> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|handle| handle.age() < self.reauth_after)
            .cloned()
    }

    fn fallback(&self, error: SheetError) -> SheetResult<ConnectionHandle> {
        if self.serve_stale {
            let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = current.as_ref() {
                warn!(
                    "re-auth to sheet {} failed ({}); reusing handle established {:?} ago",
                    self.sheet_id(),
                    error,
                    handle.age()
                );
                return Ok(handle.clone());
            }
        }
        warn!("no connection to sheet {}: {}", self.sheet_id(), error);
        Err(error)
    }
}

async fn connect(connector: &dyn TableConnector, timeout: Duration) -> SheetResult<ConnectionHandle> {
    let sheet_id = connector.sheet_id().to_string();
    debug!("opening connection to sheet {}", sheet_id);
    let session = with_timeout(timeout, connector.connect()).await?;
    Ok(ConnectionHandle {
        session,
        sheet_id,
        established_at: Instant::now(),
    })
}
