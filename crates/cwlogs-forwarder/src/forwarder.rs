// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the ingestor, batcher, scheduler and shutdown coordinator together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batcher::Batcher;
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, MIN_FLUSH_INTERVAL};
use crate::ingest::Ingestor;
use crate::scheduler::Scheduler;
use crate::shutdown::{
    termination_signal, DrainPolicy, ShutdownCoordinator, ShutdownReport, ShutdownTrigger,
};
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Buffered line count that triggers a background flush.
    pub batch_size: usize,
    /// Period of the timer-driven flush.
    pub flush_interval: Duration,
    pub drain_policy: DrainPolicy,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_policy: DrainPolicy::Detach,
        }
    }
}

/// Handle used to request a graceful shutdown from outside the forwarder.
#[derive(Clone, Debug)]
pub struct ForwarderHandle {
    stop: CancellationToken,
}

impl ForwarderHandle {
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

pub struct Forwarder {
    batcher: Arc<Batcher>,
    config: ForwarderConfig,
    stop: CancellationToken,
}

impl Forwarder {
    /// A zero `batch_size` is treated as one and a `flush_interval` below
    /// [`MIN_FLUSH_INTERVAL`] is raised to it.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, mut config: ForwarderConfig) -> Self {
        config.flush_interval = config.flush_interval.max(MIN_FLUSH_INTERVAL);
        Self {
            batcher: Arc::new(Batcher::new(sink, config.batch_size)),
            config,
            stop: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> ForwarderHandle {
        ForwarderHandle {
            stop: self.stop.clone(),
        }
    }

    #[must_use]
    pub fn batcher(&self) -> &Arc<Batcher> {
        &self.batcher
    }

    /// Forwards until end of input, a read error, SIGINT/SIGTERM, or
    /// [`ForwarderHandle::shutdown`], then drains.
    pub async fn run<R>(self, ingestor: Ingestor<R>) -> ShutdownReport
    where
        R: AsyncBufRead + Unpin,
    {
        let signal = async {
            match termination_signal().await {
                Ok(()) => info!("Received interrupt signal, flushing remaining logs"),
                Err(e) => {
                    error!("Failed to listen for termination signals: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        self.run_until(ingestor, signal).await
    }

    /// Same as [`Forwarder::run`] with `termination` standing in for the OS
    /// signal.
    pub async fn run_until<R, F>(self, ingestor: Ingestor<R>, termination: F) -> ShutdownReport
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        info!(
            "Forwarding to {} (batch size {}, flush every {}ms)",
            self.batcher.sink().describe(),
            self.batcher.batch_size(),
            self.config.flush_interval.as_millis()
        );

        let scheduler = Scheduler::spawn(
            Arc::clone(&self.batcher),
            self.config.flush_interval,
            self.stop.clone(),
        );
        let coordinator = ShutdownCoordinator::new(
            Arc::clone(&self.batcher),
            self.stop.clone(),
            Some(scheduler),
            self.config.drain_policy,
        );

        let trigger = {
            let ingest = ingestor.run(&self.batcher, &self.stop);
            tokio::pin!(ingest);
            tokio::pin!(termination);

            tokio::select! {
                outcome = &mut ingest => outcome.into_trigger(),
                () = &mut termination => {
                    // no appends may race the final flush
                    self.stop.cancel();
                    ingest.await;
                    ShutdownTrigger::Signal
                }
            }
        };

        // only this call can move the coordinator out of Running
        match coordinator.drain(trigger.clone()).await {
            Some(report) => report,
            None => ShutdownReport {
                trigger,
                drained: Ok(0),
                in_flight_at_drain: self.batcher.in_flight().count(),
            },
        }
    }
}
