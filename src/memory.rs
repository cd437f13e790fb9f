//! In-process sheet that stands in for the remote source in tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{SheetError, SheetResult};
use crate::remote::{Row, TableConnector, TableSession};

#[derive(Default)]
struct MemoryState {
    rows: Mutex<Vec<Row>>,
    delay: Mutex<Duration>,
    connects: AtomicUsize,
    reads: AtomicUsize,
    appends: AtomicUsize,
    fail_connect: AtomicBool,
    fail_read: AtomicBool,
    fail_append: AtomicBool,
    session_epoch: AtomicU64,
    max_session_age: Mutex<Option<Duration>>,
}

/// A sheet held in memory that counts every remote-style call made against it.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// service owns another.
#[derive(Clone)]
pub struct MemoryTable {
    sheet_id: String,
    state: Arc<MemoryState>,
}

impl MemoryTable {
    pub fn new(sheet_id: &str, rows: Vec<Row>) -> Self {
        let state = MemoryState {
            rows: Mutex::new(rows),
            ..MemoryState::default()
        };
        MemoryTable {
            sheet_id: sheet_id.to_string(),
            state: Arc::new(state),
        }
    }

    /// Build a table from string literals, first row being the header.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        Self::new("memory", rows)
    }

    pub fn rows(&self) -> Vec<Row> {
        self.state.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.state.rows.lock().unwrap_or_else(PoisonError::into_inner) = rows;
    }

    /// Delay applied to every connect, read and append.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_read(&self, fail: bool) {
        self.state.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_append(&self, fail: bool) {
        self.state.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Sessions opened before this call are rejected as unauthenticated from
    /// now on, the way an expired or revoked token is.
    pub fn revoke_sessions(&self) {
        self.state.session_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Lifetime reported through [`TableConnector::max_session_age`].
    pub fn set_max_session_age(&self, age: Option<Duration>) {
        *self.state.max_session_age.lock().unwrap_or_else(PoisonError::into_inner) = age;
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn append_count(&self) -> usize {
        self.state.appends.load(Ordering::SeqCst)
    }
}

impl MemoryState {
    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_session(&self, epoch: u64) -> SheetResult<()> {
        if self.session_epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(SheetError::Connection("memory table session was revoked".to_string()))
        }
    }
}

#[async_trait]
impl TableConnector for MemoryTable {
    fn sheet_id(&self) -> &str {
        &self.sheet_id
    }

    fn max_session_age(&self) -> Option<Duration> {
        *self.state.max_session_age.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self) -> SheetResult<Arc<dyn TableSession>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.pause().await;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(SheetError::Connection("memory table refused the connection".to_string()));
        }
        Ok(Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            epoch: self.state.session_epoch.load(Ordering::SeqCst),
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
    epoch: u64,
}

#[async_trait]
impl TableSession for MemorySession {
    async fn read_all(&self) -> SheetResult<Vec<Row>> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        self.state.pause().await;
        self.state.check_session(self.epoch)?;
        if self.state.fail_read.load(Ordering::SeqCst) {
            return Err(SheetError::RemoteRead("memory table read failure".to_string()));
        }
        Ok(self.state.rows.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn append_row(&self, row: &[String]) -> SheetResult<()> {
        self.state.appends.fetch_add(1, Ordering::SeqCst);
        self.state.pause().await;
        self.state.check_session(self.epoch)?;
        if self.state.fail_append.load(Ordering::SeqCst) {
            return Err(SheetError::RemoteWrite("memory table write failure".to_string()));
        }
        self.state
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row.to_vec());
        Ok(())
    }
}
