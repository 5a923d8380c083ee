//! Single-flight coordination for cache misses.
//!
//! Concurrent lookups of the same missing key collapse into one upstream
//! call: the first looker becomes the leader, everyone else waits for
//! the leader's outcome and then re-reads the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// What the leader reports to its followers.
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    /// The leader finished and wrote the cache (positive or negative);
    /// followers should re-read.
    Ready,
    /// The leader's call failed without a cache write.
    Failed(String),
}

/// Role assigned to a caller entering a flight.
pub enum Flight {
    /// This caller must perform the upstream call and then call
    /// [`FlightGuard::complete`].
    Leader(FlightGuard),
    /// Another caller is already in flight; await the receiver.
    Follower(broadcast::Receiver<FlightOutcome>),
}

type FlightTable = Arc<Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>>;

/// Leader-side handle. Dropping without completing reports failure so
/// followers never hang on a crashed leader.
pub struct FlightGuard {
    key: String,
    table: FlightTable,
    sender: broadcast::Sender<FlightOutcome>,
    completed: bool,
}

impl FlightGuard {
    /// Publish the outcome and release the key.
    pub fn complete(mut self, outcome: FlightOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FlightOutcome) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Ok(mut table) = self.table.lock() {
            table.remove(&self.key);
        }
        // Send fails only when no follower is waiting.
        let _ = self.sender.send(outcome);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.finish(FlightOutcome::Failed("flight leader aborted".to_string()));
    }
}

/// Table of in-flight cache keys.
#[derive(Clone, Default)]
pub struct SingleFlight {
    table: FlightTable,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, becoming leader if nobody holds it.
    pub fn begin(&self, key: &str) -> Flight {
        let mut table = self.table.lock().expect("flight table poisoned");
        if let Some(sender) = table.get(key) {
            return Flight::Follower(sender.subscribe());
        }
        let (sender, _) = broadcast::channel(1);
        table.insert(key.to_string(), sender.clone());
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            table: Arc::clone(&self.table),
            sender,
            completed: false,
        })
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.table.lock().expect("flight table poisoned").len()
    }
}
