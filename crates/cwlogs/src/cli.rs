// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "cwlogs")]
#[command(about = "Forward stdin to AWS CloudWatch Logs in batches", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Prompt for log group, profile and region and save them
    Setup,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkKind {
    #[default]
    Cloudwatch,
    Http,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Log stream name (default: cwlogs-<unix seconds>)
    #[arg(short, long)]
    pub stream: Option<String>,

    /// Do not echo forwarded lines to stdout
    #[arg(long)]
    pub silent: bool,

    /// Log group, overrides the saved configuration
    #[arg(short = 'g', long)]
    pub log_group: Option<String>,

    /// AWS shared config profile
    #[arg(short, long)]
    pub profile: Option<String>,

    /// AWS region
    #[arg(short, long)]
    pub region: Option<String>,

    /// Lines buffered before a batch is sent
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds between periodic flushes
    #[arg(long, value_name = "SECS")]
    pub flush_interval: Option<u64>,

    /// On shutdown, wait up to SECS for batches already being sent
    #[arg(long, value_name = "SECS")]
    pub await_in_flight: Option<u64>,

    /// Destination type
    #[arg(long, value_enum, default_value_t = SinkKind::Cloudwatch)]
    pub sink: SinkKind,

    /// Intake URL for the http sink
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Bearer token for the http sink
    #[arg(long)]
    pub token: Option<String>,

    /// zstd level for the http sink body
    #[arg(long, value_name = "LEVEL")]
    pub compress: Option<i32>,
}
