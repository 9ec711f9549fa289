//! Broker reachability monitor.
//!
//! A background task probes the broker on a fixed interval and flips a
//! shared flag. The delivery worker reads the flag before every consume; it
//! never waits on a probe itself.

use crate::broker::BrokerClient;
use crate::listener::panic_message;
use futures_util::FutureExt;
use relay_config_and_utils::HealthConfig;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Read side of the reachability flag, shared with the delivery worker.
#[derive(Debug, Clone)]
pub(crate) struct HealthHandle {
    reachable: Arc<AtomicBool>,
}

impl HealthHandle {
    pub(crate) fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }
}

/// Periodically probes the broker and tracks whether it is reachable.
///
/// The broker counts as unreachable until the first probe succeeds.
pub struct HealthMonitor {
    reachable: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Spawn the probe task on the current tokio runtime.
    ///
    /// The first probe runs immediately.
    pub fn start(broker: Arc<dyn BrokerClient>, config: &HealthConfig) -> Self {
        let reachable = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(probe_loop(
            broker,
            reachable.clone(),
            config.probe_interval().max(Duration::from_millis(1)),
            config.probe_timeout(),
        ));

        Self {
            reachable,
            task: Mutex::new(Some(task)),
        }
    }

    /// Current reachability. Never blocks.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Whether the probe task is still active.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop probing. Returns `false` if the monitor was already cleared.
    pub fn clear(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        match task {
            Some(task) => {
                task.abort();
                debug!("Health monitor stopped");
                true
            }
            None => false,
        }
    }

    pub(crate) fn handle(&self) -> HealthHandle {
        HealthHandle {
            reachable: self.reachable.clone(),
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn probe_loop(
    broker: Arc<dyn BrokerClient>,
    reachable: Arc<AtomicBool>,
    probe_interval: Duration,
    probe_timeout: Duration,
) {
    let mut ticker = interval(probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let probe = AssertUnwindSafe(broker.probe()).catch_unwind();
        let now_reachable = match timeout(probe_timeout, probe).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "Broker probe failed");
                false
            }
            Ok(Err(payload)) => {
                warn!(panic = %panic_message(payload.as_ref()), "Broker probe panicked");
                false
            }
            Err(_) => {
                debug!(timeout_ms = probe_timeout.as_millis() as u64, "Broker probe timed out");
                false
            }
        };

        let was_reachable = reachable.swap(now_reachable, Ordering::AcqRel);
        match (was_reachable, now_reachable) {
            (false, true) => info!("Broker reachable, resuming delivery"),
            (true, false) => warn!("Broker unreachable, pausing delivery"),
            _ => {}
        }
    }
}
