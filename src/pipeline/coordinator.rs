//! Ordering and backpressure primitives for the playback coordinator.

use crate::pipeline::sink::StopSignal;
use crate::pipeline::types::AudioResult;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct GateState {
    in_flight: usize,
    peak: usize,
}

/// Counting gate bounding utterances claimed but not yet played.
///
/// Workers take a permit before claiming an utterance; the coordinator
/// returns it once that utterance has been played or skipped.
#[derive(Debug)]
pub struct InFlightGate {
    limit: usize,
    state: Mutex<GateState>,
    freed: Condvar,
}

impl InFlightGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(GateState::default()),
            freed: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until a permit is free or `stop` is set.
    /// Returns false if stopped without a permit.
    pub fn acquire(&self, stop: &StopSignal, poll: Duration) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if stop.is_triggered() {
                return false;
            }
            if state.in_flight < self.limit {
                state.in_flight += 1;
                state.peak = state.peak.max(state.in_flight);
                return true;
            }
            state = self
                .freed
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.freed.notify_one();
    }

    /// Wake every waiter, e.g. after cancellation.
    pub fn wake_all(&self) {
        self.freed.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
    }

    /// Highest in-flight count seen.
    pub fn peak(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peak
    }
}

/// Holds out-of-order results and releases them by ascending index.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, AudioResult>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a result. Indices already released are dropped with a warning.
    pub fn insert(&mut self, result: AudioResult) {
        if result.index < self.next || self.pending.contains_key(&result.index) {
            tracing::warn!(index = result.index, "dropping duplicate audio result");
            return;
        }
        self.pending.insert(result.index, result);
    }

    /// The result for the next index to play, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<AudioResult> {
        let result = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(result)
    }

    /// Index the coordinator is waiting for.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Results waiting for an earlier index.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
