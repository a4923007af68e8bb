pub mod cli;
pub mod data;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod quality;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod snapshot;
pub mod store;

use std::env;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, ReportFormat};
use crate::pipeline::{Orchestrator, RunOptions};
use crate::schema::SchemaRegistry;
use crate::store::CsvStore;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("reconcile_managed", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

/// CLI entry point; returns the process exit code on orderly completion.
pub fn run() -> Result<i32> {
    init_logging();
    let cli = Cli::parse();
    execute(&cli)
}

/// Runs a full reconcile-and-merge invocation against the CSV store.
pub fn execute(cli: &Cli) -> Result<i32> {
    let registry = SchemaRegistry::load(&cli.schema)
        .with_context(|| format!("Loading schema registry from {:?}", cli.schema))?;
    let schema = registry.schema(&cli.dataset)?;
    info!(
        "Dataset '{}': {} canonical field(s), key(s) {:?}",
        schema.dataset,
        schema.fields.len(),
        schema.key_fields()
    );

    let store = CsvStore::new(&cli.store);
    let options = RunOptions {
        threshold: cli.threshold,
        jobs: cli.jobs,
        keep_extras: cli.keep_extras,
    };
    let orchestrator = Orchestrator::new(&store, schema, options);
    let partitions = cli.resolve_partitions();
    let cancel = AtomicBool::new(false);
    let report = orchestrator
        .run(&partitions, &cancel)
        .context("Running reconcile-and-merge pipeline")?;

    match cli.format {
        ReportFormat::Table => print!("{}", report.render()),
        ReportFormat::Json => {
            println!("{}", report.to_json().context("Serializing run report")?);
        }
    }
    Ok(report.exit_code())
}
