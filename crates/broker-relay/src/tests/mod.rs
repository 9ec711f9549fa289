//! Pipeline scenario tests.
//!
//! - `harness.rs`     - Recording listener, fixtures and wait helpers
//! - `ordering.rs`    - FIFO delivery and listener event sequence
//! - `health_gate.rs` - No consumption while the broker is unreachable
//! - `strategies.rs`  - Reliable retries/requeue, fast rejection, bad payloads
//! - `listeners.rs`   - Notification order and panic isolation
//! - `shutdown.rs`    - Ordered teardown, timeout and idempotence
//! - `durability.rs`  - Backlog survives a restart
//! - `builder.rs`     - Construction errors and defaults

pub(crate) mod harness;
mod listeners;
