// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic HTTP intake destination.
//!
//! Each batch is POSTed as `{"timestamp": <ms>, "lines": [...]}`, optionally
//! zstd compressed. Any 2xx answer counts as delivered.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::debug;
use zstd::stream::write::Encoder;

use cwlogs_forwarder::{Sink, SinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    pub timeout: Duration,
    /// zstd level; `None` sends the JSON body uncompressed.
    pub compression_level: Option<i32>,
    pub https_proxy: Option<String>,
}

impl HttpSinkConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            timeout: Duration::from_secs(5),
            compression_level: None,
            https_proxy: None,
        }
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    timestamp: i64,
    lines: &'a [String],
}

#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
    headers: HeaderMap,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        if config.endpoint.is_empty() {
            return Err(SinkError::Setup("HTTP endpoint cannot be empty".to_string()));
        }

        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| SinkError::Setup(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SinkError::Setup(format!("failed to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SinkError::Setup(format!("invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            config,
            headers,
        })
    }

    fn encode(&self, lines: &[String], timestamp_millis: i64) -> Result<Vec<u8>, SinkError> {
        let body = serde_json::to_vec(&Payload {
            timestamp: timestamp_millis,
            lines,
        })
        .map_err(|e| SinkError::Payload(e.to_string()))?;

        let Some(level) = self.config.compression_level else {
            return Ok(body);
        };
        let compress = || -> std::io::Result<Vec<u8>> {
            let mut encoder = Encoder::new(Vec::new(), level)?;
            encoder.write_all(&body)?;
            encoder.finish()
        };
        compress().map_err(|e| SinkError::Payload(format!("zstd: {e}")))
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn transmit(&self, lines: &[String], timestamp_millis: i64) -> Result<(), SinkError> {
        if lines.is_empty() {
            return Ok(());
        }
        let body = self.encode(lines, timestamp_millis)?;

        let resp = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!("HTTP_SINK | {} accepted {} lines", self.config.endpoint, lines.len());
            return Ok(());
        }
        Err(SinkError::Rejected {
            status: status.as_u16().to_string(),
            message: resp.text().await.unwrap_or_default(),
        })
    }

    fn describe(&self) -> String {
        format!("HTTP endpoint {}", self.config.endpoint)
    }
}
