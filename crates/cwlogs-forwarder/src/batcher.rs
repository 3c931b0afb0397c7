// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory line buffer and the three ways of flushing it.
//!
//! ```text
//!   append ──┐                      ┌──> spawn transmit (threshold)
//!            v                      │
//!      ┌───────────┐  take + clear  │
//!      │  Buffer   │ ───────────────┼──> spawn transmit (periodic)
//!      │ (Mutex)   │                │
//!      └───────────┘                └──> await transmit  (drain)
//! ```
//!
//! The mutex is held only to push a line or to swap the buffer out. Sink calls
//! always run outside of it, so a slow destination never stalls ingestion.
//! Every flush drains the buffer completely, and the swap happens under the
//! same lock acquisition as the final push, so a line is either in exactly one
//! batch or still buffered.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, Instrument};

use crate::in_flight::InFlight;
use crate::sink::{Batch, Sink, SinkError};

/// What caused a flush. Only used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Threshold,
    Periodic,
    Drain,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold => write!(f, "threshold"),
            Self::Periodic => write!(f, "periodic"),
            Self::Drain => write!(f, "drain"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlushError {
    #[error("failed to transmit {lines} lines: {source}")]
    Transmit {
        lines: usize,
        #[source]
        source: SinkError,
    },
}

/// Point-in-time copy of the batcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub dispatched_batches: u64,
    pub sent_lines: u64,
    pub failed_batches: u64,
    pub dropped_lines: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched_batches: AtomicU64,
    sent_lines: AtomicU64,
    failed_batches: AtomicU64,
    dropped_lines: AtomicU64,
}

impl Counters {
    fn record(&self, lines: usize, result: &Result<(), SinkError>) {
        let lines = lines as u64;
        match result {
            Ok(()) => {
                self.sent_lines.fetch_add(lines, Ordering::Relaxed);
            }
            Err(e) => {
                let delivered = (e.delivered() as u64).min(lines);
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.sent_lines.fetch_add(delivered, Ordering::Relaxed);
                self.dropped_lines
                    .fetch_add(lines - delivered, Ordering::Relaxed);
            }
        }
    }
}

pub struct Batcher {
    buffer: Mutex<Vec<String>>,
    batch_size: usize,
    sink: Arc<dyn Sink>,
    in_flight: InFlight,
    counters: Arc<Counters>,
}

impl Batcher {
    /// Creates a batcher that flushes once `batch_size` lines are buffered.
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
            sink,
            in_flight: InFlight::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Buffers `line`, dispatching a transmission in the background if the
    /// buffer reached the threshold. Empty lines are dropped and `false` is
    /// returned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn append(&self, line: String) -> bool {
        if line.is_empty() {
            return false;
        }

        let full = {
            let mut buffer = self.lock();
            buffer.push(line);
            if buffer.len() >= self.batch_size {
                Some(self.take(&mut buffer))
            } else {
                None
            }
        };

        if let Some(lines) = full {
            self.dispatch(Batch::stamp(lines), FlushTrigger::Threshold);
        }
        true
    }

    /// Dispatches whatever is buffered in the background. Returns the number
    /// of lines handed off, zero when the buffer was empty.
    pub fn flush_async(&self) -> usize {
        let Some(batch) = self.take_batch() else {
            return 0;
        };
        let lines = batch.len();
        self.dispatch(batch, FlushTrigger::Periodic);
        lines
    }

    /// Transmits whatever is buffered and waits for the sink to answer.
    /// Failures are returned, not logged, and never retried.
    pub async fn flush_sync(&self) -> Result<usize, FlushError> {
        let Some(batch) = self.take_batch() else {
            return Ok(0);
        };
        let lines = batch.len();
        self.counters
            .dispatched_batches
            .fetch_add(1, Ordering::Relaxed);

        let result = batch.send_to(self.sink.as_ref()).await;
        self.counters.record(lines, &result);
        match result {
            Ok(()) => {
                debug!("BATCHER | Sent {lines} lines ({})", FlushTrigger::Drain);
                Ok(lines)
            }
            Err(source) => Err(FlushError::Transmit { lines, source }),
        }
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            dispatched_batches: self.counters.dispatched_batches.load(Ordering::Relaxed),
            sent_lines: self.counters.sent_lines.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
            dropped_lines: self.counters.dropped_lines.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    // Both critical sections are a single push or swap, so a panic elsewhere
    // cannot leave the buffer half updated.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, buffer: &mut Vec<String>) -> Vec<String> {
        std::mem::replace(buffer, Vec::with_capacity(self.batch_size))
    }

    fn take_batch(&self) -> Option<Batch> {
        let lines = {
            let mut buffer = self.lock();
            if buffer.is_empty() {
                return None;
            }
            self.take(&mut buffer)
        };
        Some(Batch::stamp(lines))
    }

    fn dispatch(&self, batch: Batch, trigger: FlushTrigger) {
        self.counters
            .dispatched_batches
            .fetch_add(1, Ordering::Relaxed);
        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);

        let transmit = async move {
            let lines = batch.len();
            let result = batch.send_to(sink.as_ref()).await;
            counters.record(lines, &result);
            match result {
                Ok(()) => debug!("BATCHER | Sent {lines} lines ({trigger})"),
                Err(e) => {
                    error!("BATCHER | Failed to send {lines} lines ({trigger}), batch dropped: {e}");
                }
            }
        };
        self.in_flight.spawn(transmit.in_current_span());
    }
}

impl fmt::Debug for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buffered())
            .field("in_flight", &self.in_flight.count())
            .finish_non_exhaustive()
    }
}
