// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cwlogs_forwarder::{Forwarder, Ingestor, ShutdownTrigger, Sink};
use cwlogs_sinks::{CloudWatchSink, HttpSink};

mod cli;
mod config;
mod setup;

use cli::{Cli, Command};
use config::{EnvOverrides, SinkSettings};

const DEFAULT_LOG_LEVEL: &str = "info";

pub fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("cwlogs: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // a pending stdin read sits on a blocking thread that cannot be
    // interrupted, so do not wait for it once the drain is done
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    let env = match EnvOverrides::from_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("cwlogs: {e}");
            return ExitCode::FAILURE;
        }
    };
    let log_level = env.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    if let Err(e) = init_logging(log_level) {
        eprintln!("cwlogs: {e:#}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let result = match cli.command {
        Some(Command::Setup) => run_setup(),
        None => forward(&cli.run, &env).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = format!("aws_smithy_runtime=off,hyper=off,h2=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn run_setup() -> anyhow::Result<ExitCode> {
    let path = config::config_path()?;
    let current = config::load_from(&path)?;

    let stdin = io::stdin();
    let saved = setup::prompt(&mut stdin.lock(), &mut io::stdout(), current.as_ref())?;
    config::save_to(&path, &saved)?;

    info!("Configuration saved to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn forward(args: &cli::RunArgs, env: &EnvOverrides) -> anyhow::Result<ExitCode> {
    let file = match config::config_path() {
        Ok(path) => config::load_from(&path)?,
        Err(e) => {
            warn!("Skipping saved configuration: {e}");
            None
        }
    };
    let settings = config::resolve(args, env, file)?;

    let sink: Arc<dyn Sink> = match &settings.sink {
        SinkSettings::CloudWatch(cw) => Arc::new(
            CloudWatchSink::connect(cw)
                .await
                .context("failed to prepare CloudWatch destination")?,
        ),
        SinkSettings::Http(http) => Arc::new(
            HttpSink::new(http.clone()).context("failed to prepare HTTP destination")?,
        ),
    };

    let mut ingestor = Ingestor::new(BufReader::new(tokio::io::stdin()));
    if settings.echo {
        ingestor = ingestor.with_echo(tokio::io::stdout());
    }

    let destination = sink.describe();
    let report = Forwarder::new(sink, settings.forwarder).run(ingestor).await;

    info!("Stopped forwarding to {destination}");
    Ok(match report.trigger {
        ShutdownTrigger::ReadError(e) => {
            error!("Stopped after input error: {e}");
            ExitCode::FAILURE
        }
        trigger => {
            debug!("Stopped on {trigger}");
            ExitCode::SUCCESS
        }
    })
}
