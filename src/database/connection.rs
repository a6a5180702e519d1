use super::retry::RetryPolicy;
use super::DatabaseError;
use crate::schema::SCHEMA;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Shared handle to the catalog store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl Database {
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Opened catalog {} (journal_mode={})", path.display(), mode);
        Self::initialize(conn, retry)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::initialize(Connection::open_in_memory()?, RetryPolicy::default())
    }

    fn initialize(conn: Connection, retry: RetryPolicy) -> Result<Self, DatabaseError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::Connection("connection mutex poisoned".to_string()))
    }

    /// Run read-only work against the connection.
    pub fn read<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `body` inside one transaction, retrying transient conflicts with
    /// exponential backoff. `body` may run more than once.
    pub async fn transaction<T, F>(&self, mut body: F) -> Result<T, DatabaseError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.try_transaction(&mut body);

            match result {
                Err(err) if err.is_transient() => match self.retry.delay_for(attempt) {
                    Some(delay) => {
                        log::warn!(
                            "Transient store conflict (attempt {}/{}): {}; retrying in {:?}",
                            attempt,
                            self.retry.max_attempts,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(DatabaseError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        })
                    }
                },
                other => return other,
            }
        }
    }

    fn try_transaction<T, F>(&self, body: &mut F) -> Result<T, DatabaseError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
