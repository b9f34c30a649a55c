//! Async access to the synchronous [`Database`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::AppError;

use super::Database;

/// Cheaply cloneable (`Arc`-backed) handle. All SQLite work runs on
/// `tokio::task::spawn_blocking` so callers can hold this in async code.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }

    pub fn open(path: &Path) -> Result<Self, AppError> {
        Database::open(path).map(Self::new)
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&Database) -> Result<R, AppError> + Send + 'static,
        R: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| AppError::Database("database mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| AppError::Database(format!("blocking task join: {e}")))?
    }
}
