//! End-to-end pipeline runs against a real CSV store on disk.

mod common;

use std::sync::atomic::AtomicBool;

use common::TestWorkspace;
use reconcile_managed::data::typed_rows_from_raw;
use reconcile_managed::error::ErrorKind;
use reconcile_managed::pipeline::{Orchestrator, Partition, RunOptions};
use reconcile_managed::report::PartitionStatus;
use reconcile_managed::schema::SchemaRegistry;
use reconcile_managed::store::{CsvStore, TableStore};

fn partition(id: &str, source: &str, target: &str) -> Partition {
    Partition {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
    }
}

#[test]
fn drifted_headers_fold_into_a_canonical_table() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    workspace.write_table(
        "incoming",
        "ASIN,Title,Review_Text,Stars,Time\n\
         \"B001\",\"Opener\",\"Works well\",\"4.5\",\"2024-01-02\"\n\
         \"B002\",\"Corkscrew\",\"\",\"3.9\",\"2024-01-03\"\n",
    );
    let store = CsvStore::new(workspace.store_dir());
    let orchestrator = Orchestrator::new(&store, schema, RunOptions::default());
    let report = orchestrator
        .run(&[partition("all", "incoming", "reviews")], &AtomicBool::new(false))
        .unwrap();

    assert_eq!(report.completed_count(), 1);
    let merge = report.partitions[0].merge.as_ref().unwrap();
    assert_eq!((merge.inserted, merge.updated, merge.unchanged), (2, 0, 0));

    let target = store.read_table("reviews").unwrap();
    assert_eq!(
        target.columns,
        vec!["asin", "title", "body", "rating", "time"]
    );
    let rows = typed_rows_from_raw(&target, schema);
    assert_eq!(rows[0]["body"].as_display(), "Works well");
    assert_eq!(rows[1]["rating"].as_number(), Some(3.9));
}

#[test]
fn rerunning_an_identical_merge_is_idempotent() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    workspace.write_table(
        "incoming",
        "ASIN,Title,Rating\n\"B001\",\"Opener\",\"4.5\"\n\"B002\",\"Corkscrew\",\"3.9\"\n",
    );
    let store = CsvStore::new(workspace.store_dir());
    let orchestrator = Orchestrator::new(&store, schema, RunOptions::default());
    let cancel = AtomicBool::new(false);
    let partitions = [partition("all", "incoming", "reviews")];

    orchestrator.run(&partitions, &cancel).unwrap();
    let first_content = store.read_table("reviews").unwrap();
    let second = orchestrator.run(&partitions, &cancel).unwrap();

    let merge = second.partitions[0].merge.as_ref().unwrap();
    assert_eq!((merge.inserted, merge.updated, merge.unchanged), (0, 0, 2));
    assert_eq!(store.read_table("reviews").unwrap(), first_content);
}

#[test]
fn partial_rows_patch_without_null_overwrites() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    workspace.write_table(
        "reviews",
        "asin,title,body,rating,time\n\"B001\",\"Old\",\"\",\"4.5\",\"\"\n",
    );
    // Incoming drops the title column entirely and revises the rating.
    workspace.write_table("incoming", "ASIN,Rating\n\"B001\",\"4.8\"\n");
    let store = CsvStore::new(workspace.store_dir());
    let orchestrator = Orchestrator::new(&store, schema, RunOptions::default());
    let report = orchestrator
        .run(&[partition("all", "incoming", "reviews")], &AtomicBool::new(false))
        .unwrap();

    let merge = report.partitions[0].merge.as_ref().unwrap();
    assert_eq!((merge.inserted, merge.updated, merge.unchanged), (0, 1, 0));
    let rows = typed_rows_from_raw(&store.read_table("reviews").unwrap(), schema);
    assert_eq!(rows[0]["title"].as_display(), "Old");
    assert_eq!(rows[0]["rating"].as_number(), Some(4.8));
}

#[test]
fn a_snapshot_lands_on_disk_before_every_mutation() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    workspace.write_table(
        "reviews",
        "asin,title,body,rating,time\n\"B001\",\"Old\",\"\",\"4.5\",\"\"\n",
    );
    workspace.write_table("incoming", "ASIN,Title,Rating\n\"B001\",\"New\",\"4.8\"\n");
    let store = CsvStore::new(workspace.store_dir());
    let orchestrator = Orchestrator::new(&store, schema, RunOptions::default());
    let report = orchestrator
        .run(&[partition("all", "incoming", "reviews")], &AtomicBool::new(false))
        .unwrap();

    let snapshot = report.partitions[0].snapshot.as_deref().unwrap();
    assert!(snapshot.starts_with("reviews__snap_"));
    // The snapshot holds the pre-merge state; the target holds the new one.
    let snapshot_rows = typed_rows_from_raw(&store.read_table(snapshot).unwrap(), schema);
    assert_eq!(snapshot_rows[0]["title"].as_display(), "Old");
    let target_rows = typed_rows_from_raw(&store.read_table("reviews").unwrap(), schema);
    assert_eq!(target_rows[0]["title"].as_display(), "New");
}

#[test]
fn one_conflicted_partition_leaves_the_rest_standing() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    for id in ["openers", "corkscrews", "pourers"] {
        workspace.write_table(
            &format!("incoming_{id}"),
            "ASIN,Title,Rating\n\"B001\",\"Item\",\"4.0\"\n",
        );
    }
    // Ambiguous headers: both resolve to canonical "asin".
    workspace.write_table(
        "incoming_broken",
        "asin,Asin_Code,Title,Rating\n\"B001\",\"B001\",\"Item\",\"4.0\"\n",
    );
    let store = CsvStore::new(workspace.store_dir());
    let options = RunOptions {
        jobs: 4,
        ..RunOptions::default()
    };
    let orchestrator = Orchestrator::new(&store, schema, options);
    let partitions: Vec<Partition> = ["openers", "corkscrews", "pourers", "broken"]
        .iter()
        .map(|id| partition(id, &format!("incoming_{id}"), &format!("reviews_{id}")))
        .collect();
    let report = orchestrator
        .run(&partitions, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(report.completed_count(), 3);
    assert_eq!(report.failed_count(), 1);
    let broken = report
        .partitions
        .iter()
        .find(|p| p.partition == "broken")
        .unwrap();
    assert_eq!(broken.status, PartitionStatus::Failed);
    let error = broken.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::SchemaConflict);
    assert!(error.message.contains("asin") && error.message.contains("Asin_Code"));
    assert!(!workspace.table_exists("reviews_broken"));
    for id in ["openers", "corkscrews", "pourers"] {
        assert!(workspace.table_exists(&format!("reviews_{id}")));
        let merge = report
            .partitions
            .iter()
            .find(|p| p.partition == id)
            .and_then(|p| p.merge.as_ref())
            .unwrap();
        assert_eq!(merge.inserted, 1);
    }
    assert_eq!(report.totals().inserted, 3);
}

#[test]
fn duplicate_incoming_keys_report_a_conflict_and_keep_the_last_value() {
    let workspace = TestWorkspace::new();
    let registry = SchemaRegistry::load(&workspace.write_registry()).unwrap();
    let schema = registry.schema("reviews").unwrap();
    workspace.write_table(
        "incoming",
        "ASIN,Title,Rating\n\
         \"B002\",\"Pourer\",\"1.0\"\n\
         \"B002\",\"Pourer\",\"2.0\"\n",
    );
    let store = CsvStore::new(workspace.store_dir());
    let orchestrator = Orchestrator::new(&store, schema, RunOptions::default());
    let report = orchestrator
        .run(&[partition("all", "incoming", "reviews")], &AtomicBool::new(false))
        .unwrap();

    let merge = report.partitions[0].merge.as_ref().unwrap();
    assert_eq!(merge.inserted, 1);
    assert_eq!(merge.conflicts.len(), 1);
    assert_eq!(merge.conflicts[0].key, vec!["B002".to_string()]);
    assert_eq!(merge.conflicts[0].occurrences, 2);
    let rows = typed_rows_from_raw(&store.read_table("reviews").unwrap(), schema);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["rating"].as_number(), Some(2.0));
}
