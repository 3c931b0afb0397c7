// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Graceful termination: stop the timer, then drain the buffer once.
//!
//! ```text
//!   RUNNING ──(end of input | read error | signal | cancel)──> DRAINING ──(flush_sync returns)──> STOPPED
//! ```
//!
//! Transitions are one-way. A second request to drain is ignored, so the final
//! synchronous flush runs exactly once no matter how many termination sources
//! fire.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::{Batcher, FlushError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Why draining started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    EndOfInput,
    ReadError(String),
    Signal,
    Cancelled,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfInput => write!(f, "end of input"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::Signal => write!(f, "termination signal"),
            Self::Cancelled => write!(f, "shutdown requested"),
        }
    }
}

/// What to do with transmissions still running when draining starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Leave them running in the background. A batch that was dispatched but
    /// not yet confirmed is lost if the process exits first.
    #[default]
    Detach,
    /// Wait up to the given duration for them before the final flush.
    AwaitInFlight(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// Outcome of the final synchronous flush.
    pub drained: Result<usize, FlushError>,
    /// Transmissions still running when draining started.
    pub in_flight_at_drain: usize,
}

pub struct ShutdownCoordinator {
    state: AtomicU8,
    stop: CancellationToken,
    batcher: Arc<Batcher>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    policy: DrainPolicy,
}

impl ShutdownCoordinator {
    /// `stop` must be the token the scheduler (and ingestor) watch.
    #[must_use]
    pub fn new(
        batcher: Arc<Batcher>,
        stop: CancellationToken,
        scheduler: Option<JoinHandle<()>>,
        policy: DrainPolicy,
    ) -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            stop,
            batcher,
            scheduler: Mutex::new(scheduler),
            policy,
        }
    }

    #[must_use]
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs the shutdown sequence. Returns `None` if draining already started.
    pub async fn drain(&self, trigger: ShutdownTrigger) -> Option<ShutdownReport> {
        if self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!("SHUTDOWN | Ignoring {trigger}, already {:?}", self.state());
            return None;
        }
        info!("SHUTDOWN | Draining after {trigger}");

        self.stop.cancel();
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.await {
                warn!("SHUTDOWN | Scheduler task ended abnormally: {e}");
            }
        }

        let in_flight_at_drain = self.batcher.in_flight().count();
        match self.policy {
            DrainPolicy::Detach => {
                if in_flight_at_drain > 0 {
                    debug!("SHUTDOWN | Not waiting for {in_flight_at_drain} in-flight transmissions");
                }
            }
            DrainPolicy::AwaitInFlight(timeout) => {
                if !self.batcher.in_flight().wait_timeout(timeout).await {
                    warn!(
                        "SHUTDOWN | {} transmissions still running after {}ms",
                        self.batcher.in_flight().count(),
                        timeout.as_millis()
                    );
                }
            }
        }

        let drained = self.batcher.flush_sync().await;
        match &drained {
            Ok(lines) => info!(
                "SHUTDOWN | Flushed {lines} remaining lines to {}",
                self.batcher.sink().describe()
            ),
            Err(e) => error!("SHUTDOWN | Final flush failed: {e}"),
        }

        self.state
            .store(ShutdownState::Stopped as u8, Ordering::Release);
        Some(ShutdownReport {
            trigger,
            drained,
            in_flight_at_drain,
        })
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-unix targets).
pub async fn termination_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::sink::{Sink, SinkError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Semaphore;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct GatedSink {
        calls: AtomicUsize,
        lines: AtomicUsize,
        fail: AtomicBool,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl Sink for GatedSink {
        async fn transmit(&self, lines: &[String], _timestamp_millis: i64) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Unreachable("mock outage".to_string()));
            }
            self.lines.fetch_add(lines.len(), Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    fn coordinator(sink: Arc<GatedSink>, policy: DrainPolicy) -> (Arc<Batcher>, ShutdownCoordinator) {
        let batcher = Arc::new(Batcher::new(sink as Arc<dyn Sink>, 5));
        let stop = CancellationToken::new();
        let scheduler = Scheduler::spawn(Arc::clone(&batcher), Duration::from_secs(5), stop.clone());
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&batcher), stop, Some(scheduler), policy);
        (batcher, coordinator)
    }

    #[tokio::test]
    async fn test_drain_runs_exactly_once() {
        let sink = Arc::new(GatedSink::default());
        let (batcher, coordinator) = coordinator(Arc::clone(&sink), DrainPolicy::Detach);
        batcher.append("a".to_string());
        batcher.append("b".to_string());
        assert_eq!(coordinator.state(), ShutdownState::Running);

        let report = coordinator.drain(ShutdownTrigger::EndOfInput).await.unwrap();
        assert_eq!(report.trigger, ShutdownTrigger::EndOfInput);
        assert_eq!(report.drained, Ok(2));
        assert_eq!(coordinator.state(), ShutdownState::Stopped);

        batcher.append("c".to_string());
        assert!(coordinator.drain(ShutdownTrigger::Signal).await.is_none());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(batcher.buffered(), 1);
    }

    #[tokio::test]
    async fn test_drain_cancels_stop_token() {
        let sink = Arc::new(GatedSink::default());
        let batcher = Arc::new(Batcher::new(Arc::clone(&sink) as Arc<dyn Sink>, 5));
        let stop = CancellationToken::new();
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&batcher), stop.clone(), None, DrainPolicy::Detach);

        let report = coordinator.drain(ShutdownTrigger::Cancelled).await.unwrap();
        assert!(stop.is_cancelled());
        assert_eq!(report.drained, Ok(0));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drain_failure_still_stops() {
        let sink = Arc::new(GatedSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let (batcher, coordinator) = coordinator(Arc::clone(&sink), DrainPolicy::Detach);
        batcher.append("a".to_string());

        let report = coordinator.drain(ShutdownTrigger::Signal).await.unwrap();
        assert!(matches!(report.drained, Err(FlushError::Transmit { lines: 1, .. })));
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        // one error line for the one failed transmission
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("ERROR")).count() {
                1 => Ok(()),
                n => Err(format!("expected one error line, got {n}")),
            }
        });
    }

    #[tokio::test]
    async fn test_detach_does_not_wait_for_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let sink = Arc::new(GatedSink {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let (batcher, coordinator) = coordinator(Arc::clone(&sink), DrainPolicy::Detach);
        for i in 0..5 {
            batcher.append(format!("hot {i}"));
        }
        assert_eq!(batcher.in_flight().count(), 1);

        let report = coordinator.drain(ShutdownTrigger::EndOfInput).await.unwrap();
        assert_eq!(report.in_flight_at_drain, 1);
        assert_eq!(report.drained, Ok(0));
        assert_eq!(batcher.in_flight().count(), 1);
        assert_eq!(sink.lines.load(Ordering::SeqCst), 0);

        gate.add_permits(1);
        batcher.in_flight().wait().await;
        assert_eq!(sink.lines.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_await_in_flight_waits_before_drain() {
        let gate = Arc::new(Semaphore::new(0));
        let sink = Arc::new(GatedSink {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let (batcher, coordinator) = coordinator(
            Arc::clone(&sink),
            DrainPolicy::AwaitInFlight(Duration::from_secs(5)),
        );
        for i in 0..7 {
            batcher.append(format!("line {i}"));
        }
        assert_eq!(batcher.in_flight().count(), 1);
        assert_eq!(batcher.buffered(), 2);

        let releaser = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.add_permits(2);
            })
        };
        let report = coordinator.drain(ShutdownTrigger::Signal).await.unwrap();
        releaser.await.unwrap();

        assert_eq!(report.drained, Ok(2));
        assert_eq!(batcher.in_flight().count(), 0);
        assert_eq!(sink.lines.load(Ordering::SeqCst), 7);
    }
}
