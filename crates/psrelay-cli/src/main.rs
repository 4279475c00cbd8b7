// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// psrelay: command-line driver for the marker injector and relay.
//
// `replay` plays the host's part for one scripted job, `catalog` lists the
// structural events, `settings` shows what the settings store resolves to.

mod args;
mod script;

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};

use psrelay_core::config::{JsonSettingsStore, SettingsPaths, ShowConsoleCache};
use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::{EventId, JobId};
use psrelay_core::{RelaySettings, SettingsStore};
use psrelay_stream::{
    JobController, LocalPipeConnector, MarkerCatalog, MarkerRoute, SpoolBuffer, StartOptions,
    TokioLauncher, TraceRole, TracingTrace,
};

use args::{Cli, Commands, ReplayArgs, RouteArg};
use script::{Script, Step};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli)?;

    match cli.command {
        Commands::Catalog => print_catalog(),
        Commands::Settings => {
            let settings = RelaySettings::load(store).await;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Replay(args) => replay(store, args).await?,
    }
    Ok(())
}

fn open_store(cli: &Cli) -> Result<Arc<dyn SettingsStore>> {
    let defaults = SettingsPaths::discover();
    let machine = cli.machine_settings.clone().unwrap_or(defaults.machine);
    let user = cli.user_settings.clone().unwrap_or(defaults.user);
    debug!(machine = %machine.display(), user = %user.display(), "opening settings");
    Ok(Arc::new(JsonSettingsStore::open(machine, user)?))
}

fn print_catalog() {
    let catalog = MarkerCatalog::standard();
    for (id, name, policy) in catalog.iter() {
        println!("{:>4}  {:<8} {name}", id.0, format!("{policy:?}"));
    }
}

async fn replay(store: Arc<dyn SettingsStore>, args: ReplayArgs) -> Result<()> {
    let script = Script::load(&args.script)?;
    let settings = RelaySettings::load(Arc::clone(&store)).await;
    debug!(?settings, "replaying with settings");

    let job_id = match args.job_id.or(script.job_id) {
        Some(raw) => JobId::from_raw(raw)
            .ok_or_else(|| RelayError::Settings(format!("job id {raw} is not eight digits")))?,
        None => JobId::generate(),
    };

    let spool = SpoolBuffer::new();
    let route = match args.route {
        RouteArg::Spool => MarkerRoute::Spool(Box::new(spool.clone())),
        RouteArg::Relay => MarkerRoute::Relay,
    };
    let trace = Box::new(TracingTrace::for_job(TraceRole::Caller, job_id));
    let mut job = JobController::new(settings, job_id, route, trace)?;
    if let Some(name) = &args.printer_name {
        job = job.with_printer_name(name);
    }

    match &args.out {
        Some(path) => {
            let file = tokio::fs::File::create(path).await?;
            job.start_with_pipe(Box::new(file)).await?;
        }
        None => {
            let console = ShowConsoleCache::new();
            let options = StartOptions {
                run_as_interactive_user: !args.no_interactive_user,
                show_console: console.get(store.as_ref()),
            };
            job.start(&TokioLauncher, &LocalPipeConnector, options).await;
        }
    }

    let chunk = args.chunk.max(1);
    for step in &script.steps {
        match step {
            Step::Event(id) => {
                let outcome = job.on_structural_event(EventId(*id)).await;
                info!(event = id, ?outcome, "structural event");
                // Spooled markers come back to the job as host output.
                let spooled = spool.take();
                deliver(&mut job, &spooled, chunk).await;
            }
            Step::Output(text) => deliver(&mut job, text.as_bytes(), chunk).await,
            Step::OutputFile(file) => {
                let bytes = tokio::fs::read(script.resolve(file)).await?;
                deliver(&mut job, &bytes, chunk).await;
            }
        }
    }

    let summary = job.teardown().await;
    if let Some(path) = &args.host_output {
        tokio::fs::write(path, spool.take_host_output()).await?;
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Hand `bytes` to the job in host-sized buffers.
async fn deliver(job: &mut JobController, bytes: &[u8], chunk: usize) {
    for piece in bytes.chunks(chunk) {
        job.on_output_bytes(piece).await;
    }
}
