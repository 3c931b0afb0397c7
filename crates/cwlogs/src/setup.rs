// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interactive `cwlogs setup`.

use std::io::{self, BufRead, Write};
use thiserror::Error;

use crate::config::{FileConfig, DEFAULT_PROFILE, DEFAULT_REGION};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("log group is required")]
    EmptyLogGroup,

    #[error("input closed before setup finished")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Asks for log group, profile and region. Blank answers keep the current
/// value, or the default when nothing is saved yet.
pub fn prompt<R, W>(
    input: &mut R,
    output: &mut W,
    current: Option<&FileConfig>,
) -> Result<FileConfig, SetupError>
where
    R: BufRead,
    W: Write,
{
    let current = current.cloned().unwrap_or_default();

    let log_group = ask(input, output, "Log group", &current.log_group)?;
    if log_group.is_empty() {
        return Err(SetupError::EmptyLogGroup);
    }
    let profile = ask(
        input,
        output,
        "AWS profile",
        or_default(&current.profile, DEFAULT_PROFILE),
    )?;
    let region = ask(
        input,
        output,
        "AWS region",
        or_default(&current.region, DEFAULT_REGION),
    )?;

    Ok(FileConfig {
        log_group,
        profile,
        region,
    })
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn ask<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
    default: &str,
) -> Result<String, SetupError> {
    if default.is_empty() {
        write!(output, "{label}: ")?;
    } else {
        write!(output, "{label} [{default}]: ")?;
    }
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Err(SetupError::Closed);
    }
    let answer = answer.trim();
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    })
}
