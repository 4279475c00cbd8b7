// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface of `psrelay`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "psrelay", version, about = "PostScript marker injection and relay", long_about = None)]
pub struct Cli {
    /// Machine-wide settings file (JSON object)
    #[arg(long, env = "PSRELAY_MACHINE_SETTINGS")]
    pub machine_settings: Option<PathBuf>,

    /// Per-user settings file (JSON object)
    #[arg(long, env = "PSRELAY_USER_SETTINGS")]
    pub user_settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a scripted job through the marker injector and relay
    Replay(ReplayArgs),
    /// List the structural events and their policies
    Catalog,
    /// Print the resolved settings as JSON
    Settings,
}

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// JSON script of structural events and output buffers
    pub script: PathBuf,

    /// Where markers are written
    #[arg(long, value_enum, default_value_t = RouteArg::Spool)]
    pub route: RouteArg,

    /// Relay into this file instead of launching the configured consumer
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Eight-digit job id (overrides the script's)
    #[arg(long)]
    pub job_id: Option<u32>,

    /// Printer or output name; a long digit run in it is the parameter id
    #[arg(long)]
    pub printer_name: Option<String>,

    /// Save what the job writes to the host's own output here
    #[arg(long)]
    pub host_output: Option<PathBuf>,

    /// Largest buffer handed to the job at once
    #[arg(long, default_value_t = 4096)]
    pub chunk: usize,

    /// Launch the consumer with this process's credentials only
    #[arg(long)]
    pub no_interactive_user: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteArg {
    /// Markers go into the spool and come back as output
    Spool,
    /// Markers go straight to the relay
    Relay,
}
