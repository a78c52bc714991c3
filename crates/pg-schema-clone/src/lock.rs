//! Per-target advisory lock.
//!
//! Two clones into the same target would interleave their existence checks
//! and DDL. A session-level advisory lock keyed by the target name serializes
//! them. The lock lives on a dedicated pooled connection for the whole run.

use deadpool_postgres::{Object, Pool};
use sha2::{Digest, Sha256};
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LockMode;
use crate::error::{CloneError, Result};

/// Advisory lock key for a target schema name.
pub fn lock_key(target: &str) -> i64 {
    let digest = Sha256::digest(format!("pg-schema-clone:{}", target).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

async fn lock_connection(pool: &Pool, target: &str) -> Result<Object> {
    pool.get()
        .await
        .map_err(|e| CloneError::pool(e, format!("acquiring lock connection for {}", target)))
}

/// Held advisory lock. Call [`release`](Self::release) when done.
///
/// Dropping the guard without releasing detaches its connection from the pool
/// and closes it, which ends the session and frees the lock server-side.
pub struct NamespaceLock {
    conn: Option<Object>,
    key: i64,
    target: String,
}

impl NamespaceLock {
    /// Acquire the lock for `target` according to `mode`.
    pub async fn acquire(
        pool: &Pool,
        target: &str,
        mode: LockMode,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let key = lock_key(target);

        let conn = match mode {
            LockMode::Disabled => {
                debug!("Advisory lock disabled for {}", target);
                None
            }
            LockMode::Try => {
                let conn = lock_connection(pool, target).await?;
                let row = conn
                    .query_one("SELECT pg_catalog.pg_try_advisory_lock($1)", &[&key])
                    .await?;
                let acquired: bool = row.get(0);
                if !acquired {
                    return Err(CloneError::NamespaceLocked(target.to_string()));
                }
                Some(conn)
            }
            LockMode::Wait => {
                let conn = lock_connection(pool, target).await?;
                info!("Waiting for advisory lock on {}", target);
                let waited = {
                    let params: [&(dyn ToSql + Sync); 1] = [&key];
                    let lock = conn.execute("SELECT pg_catalog.pg_advisory_lock($1)", &params);
                    tokio::pin!(lock);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        res = &mut lock => Some(res),
                    }
                };
                match waited {
                    Some(res) => {
                        res?;
                    }
                    None => {
                        // The backend is still blocked in pg_advisory_lock; closing
                        // the session abandons the wait.
                        drop(Object::take(conn));
                        return Err(CloneError::Cancelled);
                    }
                }
                Some(conn)
            }
        };

        if conn.is_some() {
            debug!("Acquired advisory lock {} for {}", key, target);
        }
        Ok(Self {
            conn,
            key,
            target: target.to_string(),
        })
    }

    /// Whether a server-side lock is actually held.
    pub fn is_held(&self) -> bool {
        self.conn.is_some()
    }

    /// Release the lock and return the connection to the pool.
    pub async fn release(mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = conn
            .query_one("SELECT pg_catalog.pg_advisory_unlock($1)", &[&self.key])
            .await;
        match unlocked {
            Ok(_) => {
                debug!("Released advisory lock for {}", self.target);
                Ok(())
            }
            Err(e) => {
                drop(Object::take(conn));
                Err(e.into())
            }
        }
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                "Advisory lock for {} dropped without release; closing its connection",
                self.target
            );
            drop(Object::take(conn));
        }
    }
}
