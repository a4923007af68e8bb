use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::pipeline::Partition;
use crate::reconcile::DEFAULT_DISTANCE_THRESHOLD;

#[derive(Debug, Parser)]
#[command(
    name = "reconcile-and-merge",
    version,
    about = "Reconcile drifting source tables into canonical, versioned targets",
    long_about = None
)]
pub struct Cli {
    /// Dataset id whose canonical schema drives reconciliation
    #[arg(short, long)]
    pub dataset: String,
    /// YAML schema registry file
    #[arg(short = 'm', long = "schema")]
    pub schema: PathBuf,
    /// Directory holding the CSV table store
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Partition id(s); with several, --source/--target become prefixes and
    /// each partition uses `<source>_<id>` / `<target>_<id>`
    #[arg(short, long = "partition", action = clap::ArgAction::Append)]
    pub partitions: Vec<String>,
    /// Maximum Jaro-Winkler distance for a fuzzy column mapping (0.0-1.0)
    #[arg(long, value_parser = parse_threshold, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
    pub threshold: f64,
    /// Source table to reconcile and merge from
    #[arg(long)]
    pub source: String,
    /// Target table to merge into
    #[arg(long)]
    pub target: String,
    /// Worker threads for independent partitions
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,
    /// Persist unmapped source columns to a `<target>__extras` side table
    #[arg(long = "keep-extras")]
    pub keep_extras: bool,
    /// Run report output format
    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Table,
    Json,
}

impl Cli {
    /// Expands CLI arguments into concrete partitions. A single partition id
    /// (or none) uses the source/target names verbatim; several ids derive
    /// per-partition table names by suffixing, one table pair per partition
    /// as the dataset layout expects.
    pub fn resolve_partitions(&self) -> Vec<Partition> {
        match self.partitions.as_slice() {
            [] => vec![Partition {
                id: "all".to_string(),
                source: self.source.clone(),
                target: self.target.clone(),
            }],
            [only] => vec![Partition {
                id: only.clone(),
                source: self.source.clone(),
                target: self.target.clone(),
            }],
            many => many
                .iter()
                .map(|id| Partition {
                    id: id.clone(),
                    source: format!("{}_{}", self.source, id),
                    target: format!("{}_{}", self.target, id),
                })
                .collect(),
        }
    }
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(format!("threshold {parsed} must be within 0.0..=1.0"))
    }
}
