//! Pipeline Orchestrator: drives reconcile → snapshot → merge → score per
//! partition, isolating failures.
//!
//! Partitions are independent batches (one product line each, in the original
//! system) and may run on parallel worker threads. The orchestrator validates
//! the precondition that makes parallel merges commutative — pairwise-distinct
//! target tables — before any partition starts, serializes the
//! snapshot-then-merge pair per physical table, and checks for cancellation
//! only at stage boundaries so an in-flight merge always completes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, bail};
use itertools::Itertools;
use log::{error, info};

use crate::data::{Row, raw_from_typed_rows, typed_rows_from_raw};
use crate::error::EngineError;
use crate::merge::{MergeResult, merge};
use crate::quality::score;
use crate::reconcile::{ReconciledRow, apply, reconcile};
use crate::report::{PartitionReport, PartitionStatus, QualitySummary, RunReport, Stage};
use crate::schema::SchemaDefinition;
use crate::snapshot::SnapshotManager;
use crate::store::{RawTable, TableStore, WriteMode};

/// One independently processed subset of the dataset.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum reconciliation distance for a fuzzy column mapping.
    pub threshold: f64,
    /// Worker threads; clamped to the partition count.
    pub jobs: usize,
    /// Persist unmapped source columns to a `<target>__extras` side table
    /// instead of discarding them.
    pub keep_extras: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            threshold: crate::reconcile::DEFAULT_DISTANCE_THRESHOLD,
            jobs: 1,
            keep_extras: false,
        }
    }
}

struct CompletedStages {
    snapshot: Option<String>,
    merge: MergeResult,
    quality: QualitySummary,
}

pub struct Orchestrator<'a> {
    store: &'a dyn TableStore,
    schema: &'a SchemaDefinition,
    options: RunOptions,
    table_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a dyn TableStore, schema: &'a SchemaDefinition, options: RunOptions) -> Self {
        Self {
            store,
            schema,
            options,
            table_locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Runs every partition to completion or failure and returns the run
    /// report. Only a violated run-level precondition (overlapping targets,
    /// duplicate ids) is an `Err`; per-partition errors are isolated into
    /// failure records.
    pub fn run(&self, partitions: &[Partition], cancel: &AtomicBool) -> Result<RunReport> {
        self.validate_partitions(partitions)?;
        if partitions.is_empty() {
            return Ok(RunReport::new(Vec::new()));
        }

        let jobs = self.options.jobs.clamp(1, partitions.len());
        info!(
            "Starting run: {} partition(s) on {} worker(s), threshold {:.2}",
            partitions.len(),
            jobs,
            self.options.threshold
        );

        let reports = if jobs == 1 {
            partitions
                .iter()
                .map(|p| self.run_partition(p, cancel))
                .collect()
        } else {
            self.run_parallel(partitions, jobs, cancel)
        };
        Ok(RunReport::new(reports))
    }

    fn run_parallel(
        &self,
        partitions: &[Partition],
        jobs: usize,
        cancel: &AtomicBool,
    ) -> Vec<PartitionReport> {
        let queue: Mutex<VecDeque<&Partition>> = Mutex::new(partitions.iter().collect());
        let (tx, rx) = mpsc::channel::<PartitionReport>();
        thread::scope(|scope| {
            for _ in 0..jobs {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let next = queue.lock().expect("partition queue lock").pop_front();
                        let Some(partition) = next else { break };
                        let report = self.run_partition(partition, cancel);
                        if tx.send(report).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    fn validate_partitions(&self, partitions: &[Partition]) -> Result<()> {
        let mut ids = BTreeSet::new();
        let mut targets = BTreeSet::new();
        for partition in partitions {
            if !ids.insert(partition.id.as_str()) {
                bail!("Duplicate partition id '{}'", partition.id);
            }
            if !targets.insert(partition.target.as_str()) {
                bail!(
                    "Partitions overlap on target table '{}'; key spaces must be disjoint, \
                     so each partition needs its own target",
                    partition.target
                );
            }
        }
        Ok(())
    }

    fn run_partition(&self, partition: &Partition, cancel: &AtomicBool) -> PartitionReport {
        match self.execute_stages(partition, cancel) {
            Ok(done) => {
                info!(
                    "Partition '{}' completed: {} inserted, {} updated, {} unchanged",
                    partition.id, done.merge.inserted, done.merge.updated, done.merge.unchanged
                );
                PartitionReport {
                    partition: partition.id.clone(),
                    status: PartitionStatus::Completed,
                    stage: Stage::Completed,
                    error: None,
                    snapshot: done.snapshot,
                    merge: Some(done.merge),
                    quality: Some(done.quality),
                }
            }
            Err((stage, err)) => {
                error!(
                    "Partition '{}' failed at stage '{}' ({}): {}",
                    partition.id,
                    stage.label(),
                    err.kind(),
                    err
                );
                PartitionReport::failed(&partition.id, stage, err.kind(), err.to_string())
            }
        }
    }

    fn execute_stages(
        &self,
        partition: &Partition,
        cancel: &AtomicBool,
    ) -> Result<CompletedStages, (Stage, EngineError)> {
        checkpoint(cancel, Stage::Reconciling)?;
        let source = self
            .store
            .read_table(&partition.source)
            .map_err(|e| (Stage::Reconciling, e))?;
        let reconciliation = reconcile(&source.columns, self.schema, self.options.threshold)
            .map_err(|e| (Stage::Reconciling, e))?;
        info!(
            "Partition '{}': {} column(s) mapped, {} extra(s)",
            partition.id,
            reconciliation.mappings.len(),
            reconciliation.extras.len()
        );
        let incoming = apply(&reconciliation, &source, self.schema);

        checkpoint(cancel, Stage::Merging)?;
        let key_fields = self.schema.key_fields();
        let lock = self.table_lock(&partition.target);
        let guard = lock.lock().expect("table write lock");
        let snapshots = SnapshotManager::new(self.store);
        let snapshot = snapshots
            .snapshot(&partition.target)
            .map_err(|e| (Stage::Merging, e))?;
        let existing: Vec<Row> = if self
            .store
            .table_exists(&partition.target)
            .map_err(|e| (Stage::Merging, e))?
        {
            let raw = self
                .store
                .read_table(&partition.target)
                .map_err(|e| (Stage::Merging, e))?;
            typed_rows_from_raw(&raw, self.schema)
        } else {
            Vec::new()
        };
        let (merged, merge_result) =
            merge(&existing, &incoming, &key_fields).map_err(|e| (Stage::Merging, e))?;
        let raw = raw_from_typed_rows(&merged, self.schema);
        self.store
            .write_table(&partition.target, &raw, WriteMode::Overwrite)
            .map_err(|e| (Stage::Merging, e))?;
        if self.options.keep_extras {
            self.write_extras(&partition.target, &incoming, &key_fields)
                .map_err(|e| (Stage::Merging, e))?;
        }
        drop(guard);

        checkpoint(cancel, Stage::Scoring)?;
        let quality = score(&merged, self.schema);
        info!(
            "Partition '{}': {} row(s), average completeness {:.3}",
            partition.id,
            quality.row_count(),
            quality.average_completeness
        );
        Ok(CompletedStages {
            snapshot,
            merge: merge_result,
            quality: QualitySummary {
                rows: quality.row_count(),
                average_completeness: quality.average_completeness,
                invalid_values: quality.invalid_value_count(),
            },
        })
    }

    /// Persists unmapped source columns keyed by the canonical key tuple,
    /// so dropped data stays auditable without entering business logic.
    fn write_extras(
        &self,
        target: &str,
        incoming: &[ReconciledRow],
        key_fields: &[String],
    ) -> Result<(), EngineError> {
        let extra_columns: Vec<String> = incoming
            .iter()
            .flat_map(|row| row.extras.keys().cloned())
            .unique()
            .sorted()
            .collect();
        if extra_columns.is_empty() {
            return Ok(());
        }
        let mut columns: Vec<String> = key_fields.to_vec();
        columns.extend(extra_columns.iter().cloned());
        let rows: Vec<Vec<String>> = incoming
            .iter()
            .filter(|row| !row.extras.is_empty())
            .map(|row| {
                let mut cells: Vec<String> = key_fields
                    .iter()
                    .map(|k| {
                        row.fields
                            .get(k)
                            .map(|v| v.as_display())
                            .unwrap_or_default()
                    })
                    .collect();
                cells.extend(
                    extra_columns
                        .iter()
                        .map(|c| row.extras.get(c).cloned().unwrap_or_default()),
                );
                cells
            })
            .collect();
        let table = RawTable { columns, rows };
        let name = format!("{target}__extras");
        info!(
            "Persisting {} extra column(s) to side table '{}'",
            extra_columns.len(),
            name
        );
        self.store.write_table(&name, &table, WriteMode::Overwrite)
    }

    fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().expect("table lock registry");
        locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn checkpoint(cancel: &AtomicBool, next: Stage) -> Result<(), (Stage, EngineError)> {
    if cancel.load(Ordering::SeqCst) {
        Err((
            next,
            EngineError::Cancelled {
                stage: next.label().to_string(),
            },
        ))
    } else {
        Ok(())
    }
}
