// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the remote append-only log destination.
//!
//! The core only ever hands a sink an owned, non-empty batch together with a
//! single timestamp shared by every line in it. Sinks decide how to encode and
//! ship it; the core decides when.

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Reasons a sink could not accept a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The destination answered but refused the payload.
    #[error("destination rejected batch ({status}): {message}")]
    Rejected { status: String, message: String },

    /// The destination could not be reached at all.
    #[error("destination unreachable: {0}")]
    Unreachable(String),

    /// The batch could not be encoded for this destination.
    #[error("failed to prepare payload: {0}")]
    Payload(String),

    /// The destination could not be established or verified.
    #[error("destination setup failed: {0}")]
    Setup(String),

    /// Only the first `delivered` lines of the batch were accepted.
    #[error("destination accepted {delivered} lines of the batch: {message}")]
    Partial { delivered: usize, message: String },
}

impl SinkError {
    /// Lines of a failed batch that still reached the destination.
    #[must_use]
    pub fn delivered(&self) -> usize {
        match self {
            Self::Partial { delivered, .. } => *delivered,
            _ => 0,
        }
    }
}

/// An external destination for batches of log lines.
///
/// Implementations must treat an empty `lines` slice as a successful no-op.
/// The core never calls `transmit` with an empty batch, but embedders may.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn transmit(&self, lines: &[String], timestamp_millis: i64) -> Result<(), SinkError>;

    /// Human readable name of the resolved destination, used in status lines.
    fn describe(&self) -> String;
}

/// Owned snapshot of the buffer taken at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub lines: Vec<String>,
    pub timestamp_millis: i64,
}

impl Batch {
    /// Stamps `lines` with the current wall-clock time.
    #[must_use]
    pub fn stamp(lines: Vec<String>) -> Self {
        Self {
            lines,
            timestamp_millis: now_millis(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub async fn send_to(&self, sink: &dyn Sink) -> Result<(), SinkError> {
        sink.transmit(&self.lines, self.timestamp_millis).await
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
