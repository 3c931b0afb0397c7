// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented reader feeding the batcher.
//!
//! Records are split on `\n`; a `\r` right before the terminator is dropped as
//! well. Bytes that are not valid UTF-8 are replaced rather than ending the
//! stream. Empty records never reach the batcher.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batcher::Batcher;
use crate::shutdown::ShutdownTrigger;

type EchoWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug)]
pub enum IngestOutcome {
    EndOfInput { lines: u64 },
    ReadError { lines: u64, error: std::io::Error },
    Cancelled { lines: u64 },
}

impl IngestOutcome {
    /// Number of lines handed to the batcher.
    #[must_use]
    pub fn lines(&self) -> u64 {
        match self {
            Self::EndOfInput { lines }
            | Self::ReadError { lines, .. }
            | Self::Cancelled { lines } => *lines,
        }
    }

    #[must_use]
    pub fn into_trigger(self) -> ShutdownTrigger {
        match self {
            Self::EndOfInput { .. } => ShutdownTrigger::EndOfInput,
            Self::ReadError { error, .. } => ShutdownTrigger::ReadError(error.to_string()),
            Self::Cancelled { .. } => ShutdownTrigger::Cancelled,
        }
    }
}

pub struct Ingestor<R> {
    reader: R,
    echo: Option<EchoWriter>,
}

impl<R> Ingestor<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader, echo: None }
    }

    /// Copies every accepted line to `writer` before it is buffered.
    #[must_use]
    pub fn with_echo<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.echo = Some(Box::new(writer));
        self
    }

    /// Reads until end of input, a read error, or `stop` is cancelled.
    pub async fn run(mut self, batcher: &Batcher, stop: &CancellationToken) -> IngestOutcome {
        let mut accepted: u64 = 0;
        let mut record = Vec::new();

        loop {
            record.clear();
            let read = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    debug!("INGEST | Stopped after {accepted} lines");
                    return IngestOutcome::Cancelled { lines: accepted };
                }
                read = self.reader.read_until(b'\n', &mut record) => read,
            };

            match read {
                Ok(0) => {
                    debug!("INGEST | End of input after {accepted} lines");
                    return IngestOutcome::EndOfInput { lines: accepted };
                }
                Ok(_) => {
                    let Some(line) = decode_line(&record) else {
                        continue;
                    };
                    self.echo(&line, stop).await;
                    if batcher.append(line) {
                        accepted += 1;
                    }
                }
                Err(error) => {
                    error!("INGEST | Error reading input: {error}");
                    return IngestOutcome::ReadError {
                        lines: accepted,
                        error,
                    };
                }
            }
        }
    }

    // A blocked echo writer must not hold up shutdown.
    async fn echo(&mut self, line: &str, stop: &CancellationToken) {
        let Some(writer) = self.echo.as_mut() else {
            return;
        };
        let written = tokio::select! {
            biased;
            () = stop.cancelled() => None,
            written = write_line(writer, line) => Some(written),
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("INGEST | Disabling echo, write failed: {e}");
                self.echo = None;
            }
            None => {
                debug!("INGEST | Disabling echo, shutdown requested");
                self.echo = None;
            }
        }
    }
}

async fn write_line(writer: &mut EchoWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Strips the record terminator. Returns `None` for an empty line.
#[must_use]
pub fn decode_line(record: &[u8]) -> Option<String> {
    let record = record.strip_suffix(b"\n").unwrap_or(record);
    let record = record.strip_suffix(b"\r").unwrap_or(record);
    if record.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(record).into_owned())
}
