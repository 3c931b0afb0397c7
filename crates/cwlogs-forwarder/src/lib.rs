// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering, batching and flush engine for `cwlogs`.
//!
//! ```text
//!   Ingestor ──append──> Batcher ──(threshold)──> spawn ──> Sink
//!                           ^
//!   Scheduler ──tick────────┘ ──flush_async──> spawn ──> Sink
//!
//!   ShutdownCoordinator: stop Scheduler ──> flush_sync ──> Sink (awaited)
//! ```
//!
//! Hot-path flushes (size threshold and timer) never wait for the sink. The
//! single flush performed at shutdown does, so data buffered at exit is
//! confirmed attempted before the process returns.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod constants;
pub mod forwarder;
pub mod in_flight;
pub mod ingest;
pub mod scheduler;
pub mod shutdown;
pub mod sink;

pub use batcher::{Batcher, BatcherStats, FlushError};
pub use forwarder::{Forwarder, ForwarderConfig, ForwarderHandle};
pub use ingest::{IngestOutcome, Ingestor};
pub use shutdown::{DrainPolicy, ShutdownReport, ShutdownState, ShutdownTrigger};
pub use sink::{Batch, Sink, SinkError};
