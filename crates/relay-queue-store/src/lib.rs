//! Durable local queue for the broker relay.
//!
//! This crate provides:
//! - `DurableQueue`: the per-topic FIFO contract the delivery loop drains
//! - `QueueStore`: a SQLite-backed store holding every topic's queue
//! - `TopicQueue`: a handle onto one topic inside a store
//!
//! # Durability
//!
//! Writes go through a single connection in WAL mode with
//! `synchronous = FULL`, so an `enqueue` that returned `Ok` survives a
//! process crash. Each topic keeps a persisted index counter; indices start
//! at 0 and are never reused, even after the items holding them are consumed.
//!
//! ```ignore
//! let store = Arc::new(QueueStore::open(&paths.queue_database_file())?);
//! let orders = store.queue("orders")?;
//! let index = orders.enqueue(b"payload")?;
//! let item = orders.consume()?.expect("just enqueued");
//! assert_eq!(item.index, index);
//! store.close();
//! ```

mod error;
mod migrations;
mod queue;
mod store;

pub use error::{QueueError, QueueResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use queue::{DurableQueue, QueueItem};
pub use store::{QueueStore, TopicQueue};
