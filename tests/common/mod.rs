#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Registry with the review dataset used across the integration suite:
/// asin (key), title, body, rating (bounded number), time (date).
pub const REVIEW_REGISTRY: &str = r#"
datasets:
  - dataset: reviews
    fields:
      - name: asin
        type: string
        required: true
        role: key
        aliases: [product_id]
      - name: title
        type: string
        required: true
      - name: body
        type: string
        aliases: [review_text]
      - name: rating
        type: number
        required: true
        aliases: [stars]
        min: 0
        max: 5
      - name: time
        type: date
"#;

/// Scratch directory helper that cleans up automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory the CSV table store lives in.
    pub fn store_dir(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("tables");
        fs::create_dir_all(&dir).expect("create store dir");
        dir
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes the review schema registry and returns its path.
    pub fn write_registry(&self) -> PathBuf {
        self.write("schemas.yaml", REVIEW_REGISTRY)
    }

    /// Writes a CSV table into the store directory.
    pub fn write_table(&self, name: &str, csv: &str) -> PathBuf {
        let path = self.store_dir().join(format!("{name}.csv"));
        let mut file = File::create(&path).expect("create table file");
        file.write_all(csv.as_bytes()).expect("write table contents");
        path
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.store_dir().join(format!("{name}.csv")).exists()
    }
}
