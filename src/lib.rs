// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod store;
pub mod types;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, CreateArgs};
use crate::config::{ConfigFile, load_or_default};
use crate::engine::{PreviewReport, Supervisor};
use crate::store::{NewRecord, Record};
use crate::types::RecordKind;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Both supervisors of one data directory.
#[derive(Debug, Clone)]
pub struct Ferryman {
    pub jobs: Supervisor,
    pub operations: Supervisor,
}

impl Ferryman {
    /// Open both stores and reconcile zombies left by a previous process.
    pub fn open(cfg: &ConfigFile) -> errors::Result<Self> {
        let ferryman = Self {
            jobs: Supervisor::from_config(cfg, RecordKind::Job)?,
            operations: Supervisor::from_config(cfg, RecordKind::Operation)?,
        };
        let (jobs, operations) = ferryman.reconcile()?;
        if jobs + operations > 0 {
            warn!(jobs, operations, "reclassified zombie records at startup");
        }
        Ok(ferryman)
    }

    pub fn reconcile(&self) -> errors::Result<(usize, usize)> {
        Ok((
            self.jobs.reconcile_zombies()?,
            self.operations.reconcile_zombies()?,
        ))
    }

    pub fn supervisor(&self, kind: RecordKind) -> &Supervisor {
        match kind {
            RecordKind::Job => &self.jobs,
            RecordKind::Operation => &self.operations,
        }
    }

    /// The supervisor whose store holds `id`.
    pub fn owner_of(&self, id: &str) -> Option<&Supervisor> {
        [&self.jobs, &self.operations]
            .into_iter()
            .find(|s| s.store().get(id).is_some())
    }

    pub fn is_idle(&self) -> bool {
        self.jobs.is_idle() && self.operations.is_idle()
    }
}

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_or_default(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let app = Ferryman::open(&cfg)?;

    match args.command {
        Command::List => print_records(&app),
        Command::CreateJob(create) => {
            let id = app.jobs.submit(new_record(create, None)?)?;
            println!("{id}");
        }
        Command::CreateOperation {
            operation_type,
            preview,
            args,
        } => {
            let new = new_record(args, Some(operation_type))?;
            if preview {
                let report = app.operations.submit_with_preview(new).await?;
                print_preview(&report);
            } else {
                println!("{}", app.operations.submit(new)?);
            }
        }
        Command::Run { id } => run_to_completion(&app, &id).await?,
        Command::Approve { id } => {
            if !app.operations.approve(&id).await? {
                bail!("{id} is not an operation awaiting approval");
            }
            wait_and_report(&app.operations, &id).await?;
        }
        Command::RestartFailed => {
            let jobs = app.jobs.restart_failed().await?;
            let operations = app.operations.restart_failed().await?;
            info!(jobs, operations, "restarted failed records");
            wait_for_idle(&app).await;
            print_records(&app);
        }
        Command::Reconcile => {
            let (jobs, operations) = app.reconcile()?;
            println!("reclassified {jobs} job(s) and {operations} operation(s)");
        }
        Command::Delete { id } => {
            let Some(owner) = app.owner_of(&id) else {
                bail!("no record with id {id}");
            };
            owner.delete(&id).await?;
        }
        Command::Logs { id } => {
            let Some(owner) = app.owner_of(&id) else {
                bail!("no record with id {id}");
            };
            print!("{}", owner.read_log(&id)?);
        }
    }

    Ok(())
}

fn new_record(args: CreateArgs, operation_type: Option<String>) -> Result<NewRecord> {
    let options = serde_json::from_str(&args.options)
        .with_context(|| format!("parsing --options {:?}", args.options))?;
    Ok(NewRecord {
        name: args.name,
        source: args.source,
        destination: args.destination,
        operation_type,
        options,
        excludes: args.excludes,
        max_retries: args.max_retries,
    })
}

/// Start `id` and wait for it (retries included). Ctrl-C stops it.
async fn run_to_completion(app: &Ferryman, id: &str) -> Result<()> {
    let Some(owner) = app.owner_of(id) else {
        bail!("no record with id {id}");
    };
    if !owner.start(id).await? {
        bail!("{id} is already running");
    }
    wait_and_report(owner, id).await
}

async fn wait_and_report(owner: &Supervisor, id: &str) -> Result<()> {
    let record = tokio::select! {
        record = owner.wait_until_idle(id, POLL_INTERVAL) => record?,
        _ = tokio::signal::ctrl_c() => {
            info!(id, "Ctrl-C received; stopping");
            owner.stop(id).await?;
            owner.wait_until_idle(id, POLL_INTERVAL).await?
        }
    };

    print_record(&record);
    if let Some(msg) = &record.error_message {
        bail!("{id} ended {}: {msg}", record.status);
    }
    Ok(())
}

async fn wait_for_idle(app: &Ferryman) {
    while !app.is_idle() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_records(app: &Ferryman) {
    for kind in [RecordKind::Job, RecordKind::Operation] {
        for record in app.supervisor(kind).store().list() {
            print_record(&record);
        }
    }
}

fn print_preview(report: &PreviewReport) {
    println!("{} {}", report.id, report.status);
    let stats = &report.stats;
    if let (Some(done), Some(total)) = (stats.files_transferred, stats.total_files) {
        println!("  files: {done}/{total}");
    }
    if let Some(amount) = &stats.transferred_display {
        println!("  transferred: {amount}");
    }
    if let Some(msg) = &report.error_message {
        println!("  {msg}");
    }
}

fn print_record(record: &Record) {
    let percent = record
        .progress
        .as_ref()
        .and_then(|p| p.percent)
        .map(|p| format!("{p:>3}%"))
        .unwrap_or_else(|| "   -".to_string());
    println!(
        "{:<44} {:<16} {} retries {}/{}  {}",
        record.id, record.status, percent, record.retry_count, record.max_retries, record.name
    );
}
