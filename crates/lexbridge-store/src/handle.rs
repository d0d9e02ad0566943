//! Async access to the [`Database`].
//!
//! `rusqlite` is blocking, so every call is moved onto tokio's blocking pool
//! and bounded by a timeout. The timeout covers the wait for the connection:
//! a call still queued when it expires is withdrawn and surfaces as
//! [`StoreError::Unavailable`], and is guaranteed never to run. A call that
//! already holds the connection is waited out, so `Unavailable` always means
//! nothing was written.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::database::Database;
use crate::error::{Result, StoreError};

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const WITHDRAWN: u8 = 2;

#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    /// Fresh in-memory store with the default timeout.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            Duration::from_millis(lexbridge_shared::constants::STORE_TIMEOUT_MS),
        ))
    }

    /// Run `op` against the database with exclusive access.
    pub async fn call<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let state = Arc::new(AtomicU8::new(QUEUED));
        let claim = Arc::clone(&state);
        let mut task = tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            if claim
                .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(StoreError::Unavailable("withdrawn before start".into()));
            }
            op(&guard)
        });

        let joined = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                if state
                    .compare_exchange(QUEUED, WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::warn!(timeout_ms, "store call timed out waiting for the connection");
                    return Err(StoreError::Unavailable("timed out".into()));
                }
                tracing::warn!(timeout_ms, "store call overran its timeout, waiting for its outcome");
                task.await
            }
        };

        match joined {
            Ok(result) => result,
            Err(join) => {
                tracing::error!(error = %join, "store worker failed");
                Err(StoreError::Unavailable(join.to_string()))
            }
        }
    }
}
