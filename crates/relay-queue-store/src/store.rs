//! SQLite-backed queue store shared by every topic in the process.

use crate::{migrations, DurableQueue, QueueError, QueueItem, QueueResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Process-wide store holding the queues of all topics.
///
/// All topics share one connection; the mutex serializes writers the same
/// way SQLite would. `close` is process-wide: once called, every
/// `TopicQueue` handed out by this store fails with [`QueueError::Closed`].
pub struct QueueStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl QueueStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // FULL sync: an acknowledged enqueue must survive power loss
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        info!(path = %path.display(), "Opened queue store");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    /// Path of the backing database, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a queue handle for a topic, registering the topic on first use.
    pub fn queue(self: &Arc<Self>, topic: &str) -> QueueResult<TopicQueue> {
        if topic.trim().is_empty() {
            return Err(QueueError::InvalidTopic(topic.to_string()));
        }

        let created = self.with_conn("register_topic", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO queue_topics (topic, next_index, created_at)
                 VALUES (?1, 0, ?2)",
                params![topic, Utc::now().to_rfc3339()],
            )
        })?;

        if created > 0 {
            info!(topic = %topic, "Registered queue topic");
        }

        Ok(TopicQueue {
            store: Arc::clone(self),
            topic: topic.to_string(),
        })
    }

    /// Flush and close the store. Returns `true` if this call closed it.
    ///
    /// Idempotent: later calls are no-ops returning `false`.
    pub fn close(&self) -> bool {
        let conn = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match conn {
            Some(conn) => {
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "Queue store did not close cleanly");
                }
                info!(path = ?self.path, "Queue store closed");
                true
            }
            None => {
                debug!("Queue store already closed");
                false
            }
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        match self.conn.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> QueueResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| QueueError::LockPoisoned(operation))?;
        let conn = guard.as_mut().ok_or(QueueError::Closed)?;
        Ok(f(conn)?)
    }
}

/// Handle onto a single topic's queue inside a [`QueueStore`].
#[derive(Clone)]
pub struct TopicQueue {
    store: Arc<QueueStore>,
    topic: String,
}

impl TopicQueue {
    /// The store this queue lives in.
    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }
}

impl DurableQueue for TopicQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn enqueue(&self, payload: &[u8]) -> QueueResult<u64> {
        let topic = self.topic.as_str();
        let index = self.store.with_conn("enqueue", |conn| {
            let tx = conn.transaction()?;
            let index: i64 = tx.query_row(
                "UPDATE queue_topics SET next_index = next_index + 1
                 WHERE topic = ?1
                 RETURNING next_index - 1",
                params![topic],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO queue_items (topic, item_index, payload, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![topic, index, payload, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(index)
        })?;

        debug!(topic = %self.topic, index, bytes = payload.len(), "Enqueued item");
        Ok(index as u64)
    }

    fn is_empty(&self) -> QueueResult<bool> {
        let topic = self.topic.as_str();
        self.store.with_conn("is_empty", |conn| {
            conn.query_row(
                "SELECT NOT EXISTS (SELECT 1 FROM queue_items WHERE topic = ?1)",
                params![topic],
                |row| row.get(0),
            )
        })
    }

    fn len(&self) -> QueueResult<u64> {
        let topic = self.topic.as_str();
        let count: i64 = self.store.with_conn("len", |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE topic = ?1",
                params![topic],
                |row| row.get(0),
            )
        })?;
        Ok(count as u64)
    }

    fn consume(&self) -> QueueResult<Option<QueueItem>> {
        let topic = self.topic.as_str();
        let item = self.store.with_conn("consume", |conn| {
            let tx = conn.transaction()?;
            let head = tx
                .query_row(
                    "SELECT item_index, payload FROM queue_items
                     WHERE topic = ?1
                     ORDER BY item_index ASC
                     LIMIT 1",
                    params![topic],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()?;

            if let Some((index, _)) = &head {
                tx.execute(
                    "DELETE FROM queue_items WHERE topic = ?1 AND item_index = ?2",
                    params![topic, index],
                )?;
            }
            tx.commit()?;

            Ok(head.map(|(index, payload)| QueueItem {
                index: index as u64,
                payload,
            }))
        })?;

        if let Some(item) = &item {
            debug!(topic = %self.topic, index = item.index, "Consumed item");
        }
        Ok(item)
    }
}
