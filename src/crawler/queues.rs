//! Primary and retry candidate queues with a backpressure gate
//!
//! Both queues live behind one mutex so the producer can block on a single
//! condition variable until room is made. Popped candidates stay charged
//! against the threshold until the reconciler settles them, so candidates
//! travelling back through the retry queue never push the total above it.

use crate::model::AlignmentCandidate;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Which queue a batch was drained from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSource {
    /// Fresh candidates, first crawl attempt
    Primary,
    /// Candidates whose first attempt failed or left URLs unresolved
    Retry,
}

impl BatchSource {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Retry => "retry",
        }
    }
}

#[derive(Default)]
struct QueueState {
    primary: VecDeque<AlignmentCandidate>,
    retry: VecDeque<AlignmentCandidate>,
    /// Popped candidates not yet settled
    outstanding: usize,
    closed: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.primary.len() + self.retry.len()
    }

    fn pending(&self) -> usize {
        self.len() + self.outstanding
    }

    fn queue_mut(&mut self, source: BatchSource) -> &mut VecDeque<AlignmentCandidate> {
        match source {
            BatchSource::Primary => &mut self.primary,
            BatchSource::Retry => &mut self.retry,
        }
    }
}

/// Shared FIFO queues feeding the batch builder
pub struct CandidateQueues {
    state: Mutex<QueueState>,
    space: Condvar,
    threshold: usize,
}

impl CandidateQueues {
    /// Creates empty queues that block the producer above `threshold`
    /// combined candidates
    pub fn new(threshold: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            space: Condvar::new(),
            threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a fresh candidate, then blocks while the queues are saturated
    ///
    /// Queued and unsettled candidates both count towards the threshold.
    /// Returns `false` without queueing if the queues are closed. A producer
    /// blocked here is released by [`settle`](Self::settle) or
    /// [`close`](Self::close).
    pub fn offer(&self, candidate: AlignmentCandidate) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.primary.push_back(candidate);

        if state.pending() > self.threshold {
            trace!(
                queued = state.len(),
                outstanding = state.outstanding,
                "Backpressure: producer waiting"
            );
            let threshold = self.threshold;
            let _state = self
                .space
                .wait_while(state, |s| !s.closed && s.pending() > threshold)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    /// Queues candidates for their second and last attempt
    pub fn push_retry(&self, candidates: impl IntoIterator<Item = AlignmentCandidate>) {
        let mut state = self.lock();
        state.retry.extend(candidates);
    }

    /// Picks the queue the next batch drains from
    ///
    /// Retry wins when it holds more candidates than primary. Returns `None`
    /// when both queues are empty.
    pub fn next_source(&self) -> Option<BatchSource> {
        let state = self.lock();
        if !state.retry.is_empty() && state.retry.len() > state.primary.len() {
            Some(BatchSource::Retry)
        } else if !state.primary.is_empty() {
            Some(BatchSource::Primary)
        } else {
            None
        }
    }

    /// Removes the oldest candidate of a queue
    ///
    /// The candidate stays charged against the threshold until it is
    /// settled.
    pub fn pop(&self, source: BatchSource) -> Option<AlignmentCandidate> {
        let mut state = self.lock();
        let candidate = state.queue_mut(source).pop_front();
        if candidate.is_some() {
            state.outstanding += 1;
        }
        candidate
    }

    /// Puts back a candidate that did not fit into the current batch
    pub fn unpop(&self, source: BatchSource, candidate: AlignmentCandidate) {
        let mut state = self.lock();
        state.queue_mut(source).push_front(candidate);
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    /// Releases `n` popped candidates once their batch has been reconciled
    ///
    /// Any retry candidates must be queued before the batch is settled.
    pub fn settle(&self, n: usize) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(n);
        if state.pending() <= self.threshold {
            self.space.notify_all();
        }
    }

    /// Stops accepting candidates and releases a blocked producer
    pub fn close(&self) {
        self.lock().closed = true;
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Combined size of both queues
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued plus popped but unsettled candidates, read under one lock
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn primary_len(&self) -> usize {
        self.lock().primary.len()
    }

    pub fn retry_len(&self) -> usize {
        self.lock().retry.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
