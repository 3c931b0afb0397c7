// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic flush timer.
//!
//! Bounds how long a line can sit in the buffer when traffic is too low to
//! reach the size threshold: a line appended at `T` is handed to the sink no
//! later than `T + interval`. Once its token is cancelled the timer exits and
//! is never restarted.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batcher::Batcher;
use crate::constants::MIN_FLUSH_INTERVAL;

pub struct Scheduler;

impl Scheduler {
    /// Spawns the timer task. The returned handle completes once `stop` is
    /// cancelled.
    #[must_use]
    pub fn spawn(
        batcher: Arc<Batcher>,
        every: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::run(batcher, every, stop))
    }

    /// An `every` below [`MIN_FLUSH_INTERVAL`] is raised to it.
    pub async fn run(batcher: Arc<Batcher>, every: Duration, stop: CancellationToken) {
        let mut ticker = interval(every.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    debug!("SCHEDULER | Stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let lines = batcher.flush_async();
                    if lines > 0 {
                        debug!("SCHEDULER | Periodic flush of {lines} lines");
                    }
                }
            }
        }
    }
}
