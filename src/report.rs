//! Run report model and rendering.
//!
//! The orchestrator returns a [`RunReport`]: one entry per partition with the
//! stage reached, error details for failures, and merge/quality numbers for
//! completions. Rendering is either a width-aligned plain-text table (for
//! terminals) or pretty JSON (for downstream tooling).

use std::fmt::Write as _;

use serde::Serialize;

use crate::error::ErrorKind;
use crate::merge::MergeResult;

/// Pipeline stages, in execution order. Snapshotting happens at the head of
/// `Merging`: the snapshot and its merge form one critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Reconciling,
    Merging,
    Scoring,
    Completed,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Reconciling => "reconciling",
            Stage::Merging => "merging",
            Stage::Scoring => "scoring",
            Stage::Completed => "completed",
        }
    }
}

/// Terminal status of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Completed,
    Failed,
}

/// Failure record scoped to one partition.
#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Condensed quality numbers carried into the report.
#[derive(Debug, Clone, Serialize)]
pub struct QualitySummary {
    pub rows: usize,
    pub average_completeness: f64,
    pub invalid_values: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub status: PartitionStatus,
    /// Last stage the partition entered.
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualitySummary>,
}

impl PartitionReport {
    pub fn failed(partition: &str, stage: Stage, kind: ErrorKind, message: String) -> Self {
        Self {
            partition: partition.to_string(),
            status: PartitionStatus::Failed,
            stage,
            error: Some(StageError { kind, message }),
            snapshot: None,
            merge: None,
            quality: None,
        }
    }
}

/// Whole-run outcome; partitions are sorted by id for deterministic output.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub partitions: Vec<PartitionReport>,
}

impl RunReport {
    pub fn new(mut partitions: Vec<PartitionReport>) -> Self {
        partitions.sort_by(|a, b| a.partition.cmp(&b.partition));
        Self { partitions }
    }

    pub fn completed_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.status == PartitionStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.partitions.len() - self.completed_count()
    }

    /// Row totals across completed partitions.
    pub fn totals(&self) -> MergeResult {
        let mut totals = MergeResult::default();
        for partition in &self.partitions {
            if let Some(merge) = &partition.merge {
                totals.absorb(merge);
            }
        }
        totals
    }

    /// 0 when every partition completed; otherwise the highest exit code
    /// among the failures (store I/O 3 > missing key 2 > schema conflict 1).
    pub fn exit_code(&self) -> i32 {
        self.partitions
            .iter()
            .filter_map(|p| p.error.as_ref())
            .map(|e| e.kind.exit_code())
            .max()
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Width-aligned plain-text rendering, one row per partition plus a
    /// totals footer.
    pub fn render(&self) -> String {
        let headers = [
            "partition",
            "status",
            "stage",
            "inserted",
            "updated",
            "unchanged",
            "conflicts",
            "avg_completeness",
            "error",
        ];
        let mut rows: Vec<Vec<String>> = Vec::with_capacity(self.partitions.len() + 1);
        for p in &self.partitions {
            let (inserted, updated, unchanged, conflicts) = match &p.merge {
                Some(m) => (
                    m.inserted.to_string(),
                    m.updated.to_string(),
                    m.unchanged.to_string(),
                    m.conflicts.len().to_string(),
                ),
                None => ("-".into(), "-".into(), "-".into(), "-".into()),
            };
            let completeness = p
                .quality
                .as_ref()
                .map(|q| format!("{:.3}", q.average_completeness))
                .unwrap_or_else(|| "-".into());
            let error = p
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.kind, sanitize(&e.message)))
                .unwrap_or_else(|| "-".into());
            let status = match p.status {
                PartitionStatus::Completed => "completed",
                PartitionStatus::Failed => "failed",
            };
            rows.push(vec![
                p.partition.clone(),
                status.into(),
                p.stage.label().into(),
                inserted,
                updated,
                unchanged,
                conflicts,
                completeness,
                error,
            ]);
        }
        let totals = self.totals();
        rows.push(vec![
            "(totals)".into(),
            format!("{}/{} completed", self.completed_count(), self.partitions.len()),
            "-".into(),
            totals.inserted.to_string(),
            totals.updated.to_string(),
            totals.unchanged.to_string(),
            totals.conflicts.len().to_string(),
            "-".into(),
            "-".into(),
        ]);

        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in &rows {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_row(&headers.map(String::from), &widths));
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let _ = writeln!(output, "{}", format_row(&separator, &widths));
        for row in &rows {
            let _ = writeln!(output, "{}", format_row(row, &widths));
        }
        output
    }
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, cell) in cells.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        let padding = widths[idx].saturating_sub(cell.chars().count());
        if idx + 1 < cells.len() {
            line.push_str(&" ".repeat(padding));
        }
    }
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect()
}
