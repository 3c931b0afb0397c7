// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS CloudWatch Logs destination.
//!
//! The log group and log stream are created when the sink connects; an
//! existing group or stream is reused. Each batch becomes one or more
//! `PutLogEvents` calls, all events carrying the batch timestamp.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use cwlogs_forwarder::{Sink, SinkError};

/// `PutLogEvents` limit on events per call.
pub const MAX_EVENTS_PER_CALL: usize = 10_000;
/// `PutLogEvents` limit on payload size, counting [`EVENT_OVERHEAD_BYTES`]
/// per event.
pub const MAX_BYTES_PER_CALL: usize = 1_048_576;
pub const EVENT_OVERHEAD_BYTES: usize = 26;
/// Largest message CloudWatch accepts for a single event.
pub const MAX_MESSAGE_BYTES: usize = 262_144 - EVENT_OVERHEAD_BYTES;

const STREAM_PREFIX: &str = "cwlogs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudWatchConfig {
    /// Shared config profile. `None` uses the default credential chain.
    pub profile: Option<String>,
    pub region: Option<String>,
    pub log_group: String,
    /// Generated as `cwlogs-<unix seconds>` when unset or empty.
    pub log_stream: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloudWatchSink {
    client: Client,
    log_group: String,
    log_stream: String,
}

impl CloudWatchSink {
    /// Resolves credentials for `config` and makes sure the destination
    /// exists. Fails if the group or stream can neither be created nor found.
    pub async fn connect(config: &CloudWatchConfig) -> Result<Self, SinkError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        Self::with_client(
            Client::new(&sdk_config),
            config.log_group.clone(),
            config.log_stream.clone(),
        )
        .await
    }

    pub async fn with_client(
        client: Client,
        log_group: String,
        log_stream: Option<String>,
    ) -> Result<Self, SinkError> {
        if log_group.is_empty() {
            return Err(SinkError::Setup("log group name cannot be empty".to_string()));
        }
        let log_stream = log_stream
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_stream_name);

        match client.create_log_group().log_group_name(&log_group).send().await {
            Ok(_) => debug!("CLOUDWATCH | Created log group {log_group}"),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_already_exists_exception()) =>
            {
                debug!("CLOUDWATCH | Log group {log_group} already exists");
            }
            Err(e) => {
                return Err(SinkError::Setup(format!(
                    "failed to create log group {log_group}: {}",
                    DisplayErrorContext(&e)
                )))
            }
        }

        match client
            .create_log_stream()
            .log_group_name(&log_group)
            .log_stream_name(&log_stream)
            .send()
            .await
        {
            Ok(_) => debug!("CLOUDWATCH | Created log stream {log_stream}"),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_already_exists_exception()) =>
            {
                debug!("CLOUDWATCH | Log stream {log_stream} already exists");
            }
            Err(e) => {
                return Err(SinkError::Setup(format!(
                    "failed to create log stream {log_stream}: {}",
                    DisplayErrorContext(&e)
                )))
            }
        }

        info!("CLOUDWATCH | Ready to send to {log_group}/{log_stream}");
        Ok(Self {
            client,
            log_group,
            log_stream,
        })
    }

    #[must_use]
    pub fn log_group(&self) -> &str {
        &self.log_group
    }

    #[must_use]
    pub fn log_stream(&self) -> &str {
        &self.log_stream
    }

    /// Sends one `PutLogEvents` call and returns how many events were
    /// accepted.
    async fn put(&self, messages: Vec<&str>, timestamp_millis: i64) -> Result<usize, SinkError> {
        let count = messages.len();
        let events = messages
            .into_iter()
            .map(|message| {
                InputLogEvent::builder()
                    .message(message)
                    .timestamp(timestamp_millis)
                    .build()
                    .map_err(|e| SinkError::Payload(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(&self.log_group)
            .log_stream_name(&self.log_stream)
            .set_log_events(Some(events))
            .send()
            .await
            .map_err(map_sdk_err)?;

        let accepted = match output.rejected_log_events_info() {
            Some(rejected) => {
                warn!("CLOUDWATCH | Some events were rejected: {rejected:?}");
                accepted_events(
                    count,
                    rejected.too_old_log_event_end_index(),
                    rejected.expired_log_event_end_index(),
                    rejected.too_new_log_event_start_index(),
                )
            }
            None => count,
        };
        Ok(accepted)
    }
}

#[async_trait]
impl Sink for CloudWatchSink {
    async fn transmit(&self, lines: &[String], timestamp_millis: i64) -> Result<(), SinkError> {
        let mut delivered = 0;
        for chunk in chunk_messages(lines) {
            match self.put(chunk, timestamp_millis).await {
                Ok(accepted) => delivered += accepted,
                Err(e) if delivered == 0 => return Err(e),
                Err(e) => {
                    return Err(SinkError::Partial {
                        delivered,
                        message: e.to_string(),
                    })
                }
            }
        }
        if delivered < lines.len() {
            return Err(SinkError::Partial {
                delivered,
                message: format!("{} events rejected", lines.len() - delivered),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("log group {}, log stream {}", self.log_group, self.log_stream)
    }
}

fn map_sdk_err<E, R>(err: SdkError<E, R>) -> SinkError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service_err) => SinkError::Rejected {
            status: service_err.code().unwrap_or("unknown").to_string(),
            message: service_err.message().unwrap_or_default().to_string(),
        },
        None => SinkError::Unreachable(DisplayErrorContext(&err).to_string()),
    }
}

#[must_use]
pub fn default_stream_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{STREAM_PREFIX}-{secs}")
}

/// Events left after CloudWatch drops everything before the too-old or
/// expired end index (exclusive) and from the too-new start index onward.
fn accepted_events(
    count: usize,
    too_old_end: Option<i32>,
    expired_end: Option<i32>,
    too_new_start: Option<i32>,
) -> usize {
    let index = |i: Option<i32>| i.and_then(|i| usize::try_from(i).ok());
    let first = index(too_old_end)
        .into_iter()
        .chain(index(expired_end))
        .max()
        .unwrap_or(0)
        .min(count);
    let end = index(too_new_start).unwrap_or(count).clamp(first, count);
    end - first
}

/// Cuts `message` to [`MAX_MESSAGE_BYTES`] on a char boundary.
#[must_use]
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Splits a batch into groups that each fit in one `PutLogEvents` call,
/// preserving order.
#[must_use]
pub fn chunk_messages(lines: &[String]) -> Vec<Vec<&str>> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_bytes = 0;

    for line in lines {
        let message = truncate_message(line);
        let size = message.len() + EVENT_OVERHEAD_BYTES;
        if !current.is_empty()
            && (current.len() == MAX_EVENTS_PER_CALL || current_bytes + size > MAX_BYTES_PER_CALL)
        {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(message);
        current_bytes += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
