// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks for exercising the forwarder without a real destination

use cwlogs_forwarder::{Batch, Sink, SinkError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Records every batch it accepts. Can be switched into a failing mode, in
/// which batches are counted as calls but not recorded.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Batch>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().expect("lock poisoned").clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Batch::len).collect()
    }

    pub fn all_lines(&self) -> Vec<String> {
        self.batches().into_iter().flat_map(|b| b.lines).collect()
    }
}

#[async_trait::async_trait]
impl Sink for RecordingSink {
    async fn transmit(&self, lines: &[String], timestamp_millis: i64) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected {
                status: "503".to_string(),
                message: "mock outage".to_string(),
            });
        }
        self.batches.lock().expect("lock poisoned").push(Batch {
            lines: lines.to_vec(),
            timestamp_millis,
        });
        Ok(())
    }

    fn describe(&self) -> String {
        "mock-group/mock-stream".to_string()
    }
}
