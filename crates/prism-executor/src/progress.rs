//! Progress reporting for execution batches.
//!
//! Progress is surfaced through an explicit callback rather than ambient
//! state. Updates are serialized under one lock so observers always see the
//! *start* of a tool before its *finish*, and counters never run backwards.

use std::sync::Arc;
use std::sync::Mutex;

/// Snapshot handed to the progress callback after each state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Tools scheduled so far (grows when a fallback batch is added).
    pub total: usize,
    /// Tools finished successfully.
    pub completed: usize,
    /// Tools finished with a failure.
    pub failed: usize,
    /// Tools currently executing.
    pub in_flight: usize,
}

/// Callback invoked after every tracker state change.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Default)]
struct State {
    total: usize,
    completed: usize,
    failed: usize,
    in_flight: usize,
}

/// Serialized progress state for one execution batch.
pub struct ProgressTracker {
    state: Mutex<State>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a tracker expecting `total` tools.
    pub fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            state: Mutex::new(State {
                total,
                ..State::default()
            }),
            callback,
        }
    }

    /// Grow the expected total, e.g. when a fallback batch is scheduled.
    pub fn add_total(&self, n: usize) {
        self.mutate(|s| s.total += n);
    }

    /// Record a tool entering execution.
    pub fn started(&self) {
        self.mutate(|s| s.in_flight += 1);
    }

    /// Record a tool finishing.
    pub fn finished(&self, success: bool) {
        self.mutate(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            if success {
                s.completed += 1;
            } else {
                s.failed += 1;
            }
        });
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ProgressUpdate {
        let s = self.state.lock().expect("progress lock poisoned");
        ProgressUpdate {
            total: s.total,
            completed: s.completed,
            failed: s.failed,
            in_flight: s.in_flight,
        }
    }

    // The callback runs under the lock: updates for one tool are observed
    // in order, start strictly before finish.
    fn mutate(&self, f: impl FnOnce(&mut State)) {
        let update = {
            let mut s = self.state.lock().expect("progress lock poisoned");
            f(&mut s);
            ProgressUpdate {
                total: s.total,
                completed: s.completed,
                failed: s.failed,
                in_flight: s.in_flight,
            }
        };
        if let Some(cb) = &self.callback {
            cb(update);
        }
    }
}
