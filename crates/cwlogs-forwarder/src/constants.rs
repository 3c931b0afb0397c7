// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Buffered line count at which a background flush is triggered.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Period of the timer-driven flush. Upper bound on how long a line can stay
/// buffered while the forwarder is running.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest accepted flush period. A zero period is raised to this.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);
