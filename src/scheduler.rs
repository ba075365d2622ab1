//! One-shot named alarms.

use crate::clock::Clock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, warn};

pub trait Scheduler: Send + Sync {
    /// Arms (or re-arms) the alarm `name` to fire at `when_ms`.
    fn schedule_once(&self, name: &str, when_ms: i64);
}

/// Fires alarms by sending their name on a channel after a sleep.
pub struct TokioScheduler {
    tx: mpsc::Sender<String>,
    clock: Arc<dyn Clock>,
    pending: Mutex<FxHashMap<String, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::Sender<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tx,
            clock,
            pending: Mutex::new(FxHashMap::default()),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, name: &str, when_ms: i64) {
        let delay = (when_ms - self.clock.now_ms()).max(0) as u64;
        let tx = self.tx.clone();
        let alarm = name.to_string();
        let handle = tokio::spawn(async move {
            time::sleep(Duration::from_millis(delay)).await;
            if tx.send(alarm.clone()).await.is_err() {
                warn!(alarm = %alarm, "Alarm fired after dispatcher shut down");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, h| !h.is_finished());
        if let Some(previous) = pending.insert(name.to_string(), handle) {
            previous.abort();
        }
        debug!(alarm = %name, delay_ms = delay, "Alarm armed");
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

/// Records alarms without firing them.
#[derive(Default)]
pub struct ManualScheduler {
    armed: Mutex<FxHashMap<String, i64>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self, name: &str) -> Option<i64> {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// Removes and returns the alarms due at `now_ms`, earliest first.
    pub fn take_due(&self, now_ms: i64) -> Vec<String> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        let mut due: Vec<(String, i64)> = armed
            .iter()
            .filter(|&(_, &when)| when <= now_ms)
            .map(|(name, &when)| (name.clone(), when))
            .collect();
        due.sort_by_key(|(_, when)| *when);
        for (name, _) in &due {
            armed.remove(name);
        }
        due.into_iter().map(|(name, _)| name).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, name: &str, when_ms: i64) {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), when_ms);
    }
}
