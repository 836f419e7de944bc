// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context as _, Result};
use log::{error, warn};

use crate::{
    catalog::SyscallCatalog,
    config::load_config,
    sys_trace::Trace,
};

use super::cli::ParseOptions;

pub fn cli(options: &ParseOptions) -> ExitCode {
    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("error occurred parsing trace: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &ParseOptions) -> Result<()> {
    let config = load_config(options.config.as_deref())?;
    let catalog = SyscallCatalog::load(&options.catalog)?;
    let trace = Trace::open_with_config(&options.trace, Arc::new(catalog), &config)
        .with_context(|| format!("failed to parse trace {:?}", options.trace))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if options.summary {
        writeln!(out, "{trace}")?;
    } else {
        write_records(&trace, &mut out)?;
    }

    for diagnostic in trace.diagnostics() {
        warn!("{diagnostic}");
    }
    Ok(())
}

/// One JSON object per record, one per line.
pub fn write_records<W: Write>(trace: &Trace, out: &mut W) -> Result<()> {
    for record in trace {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(())
}
