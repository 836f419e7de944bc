// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Args, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::set_max_level;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::{path::PathBuf, process::ExitCode};

use super::parse;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonOptions,

    #[command(flatten)]
    parse: ParseOptions,
}

#[derive(Args, Debug)]
pub struct CommonOptions {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

#[derive(Args, Debug)]
pub struct ParseOptions {
    /// Syscall definition catalog; a TOML file of `[[syscall]]` tables
    #[arg(long)]
    pub catalog: PathBuf,

    /// Parser configuration file; `.config/traceparse.toml` is used if present
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the trace's metadata instead of its records
    #[arg(long)]
    pub summary: bool,

    /// Output of `strace -f -v`
    pub trace: PathBuf,
}

pub fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    // fails only if a logger is already installed, which is fine to keep
    let _ = TermLogger::init(
        cli.common.verbose.log_level_filter(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    set_max_level(cli.common.verbose.log_level_filter());

    parse::cli(&cli.parse)
}
