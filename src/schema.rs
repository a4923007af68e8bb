//! Canonical schema model: field definitions, per-dataset schemas, and the
//! YAML-backed registry.
//!
//! A [`SchemaDefinition`] is loaded once per run and is immutable thereafter.
//! Field declaration order is significant: it is the deterministic tie-breaker
//! when reconciliation finds two canonical fields at equal distance.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::data::normalize_column_name;

/// Declared type of a canonical field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

/// Whether a field participates in the key tuple or carries a value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Key,
    #[default]
    Value,
}

/// One canonical business attribute of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub role: FieldRole,
    /// Lower validity bound for number fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper validity bound for number fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl CanonicalField {
    /// True when `candidate` (already normalized) matches the field's name or
    /// one of its aliases, ignoring case and punctuation.
    pub fn matches_normalized(&self, candidate: &str) -> bool {
        if normalize_column_name(&self.name) == candidate {
            return true;
        }
        self.aliases
            .iter()
            .any(|alias| normalize_column_name(alias) == candidate)
    }
}

/// Ordered canonical field list for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub dataset: String,
    pub fields: Vec<CanonicalField>,
}

impl SchemaDefinition {
    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        let normalized = normalize_column_name(name);
        self.fields
            .iter()
            .find(|f| normalize_column_name(&f.name) == normalized)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn key_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.role == FieldRole::Key)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn required_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Structural validation applied once at load time.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.dataset.trim().is_empty(),
            "Schema dataset id must not be empty"
        );
        ensure!(
            !self.fields.is_empty(),
            "Schema '{}' declares no fields",
            self.dataset
        );
        ensure!(
            self.fields.iter().any(|f| f.role == FieldRole::Key),
            "Schema '{}' declares no key field",
            self.dataset
        );
        let mut seen: HashSet<String> = HashSet::new();
        for field in &self.fields {
            ensure!(
                !field.name.trim().is_empty(),
                "Schema '{}' contains a field with an empty name",
                self.dataset
            );
            let normalized = normalize_column_name(&field.name);
            ensure!(
                seen.insert(normalized.clone()),
                "Schema '{}': field or alias '{}' is declared more than once",
                self.dataset,
                field.name
            );
            for alias in &field.aliases {
                ensure!(
                    seen.insert(normalize_column_name(alias)),
                    "Schema '{}': field or alias '{}' is declared more than once",
                    self.dataset,
                    alias
                );
            }
            if let (Some(min), Some(max)) = (field.min, field.max) {
                ensure!(
                    min <= max,
                    "Schema '{}': field '{}' has min {} greater than max {}",
                    self.dataset,
                    field.name,
                    min,
                    max
                );
            }
            if field.min.is_some() || field.max.is_some() {
                ensure!(
                    field.field_type == FieldType::Number,
                    "Schema '{}': field '{}' declares numeric bounds but is not a number",
                    self.dataset,
                    field.name
                );
            }
        }
        Ok(())
    }
}

/// All dataset schemas known for a run, loaded once from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub datasets: Vec<SchemaDefinition>,
}

impl SchemaRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let registry: SchemaRegistry =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        for schema in &registry.datasets {
            schema.validate()?;
        }
        Ok(registry)
    }

    pub fn schema(&self, dataset_id: &str) -> Result<&SchemaDefinition> {
        self.datasets
            .iter()
            .find(|s| s.dataset == dataset_id)
            .ok_or_else(|| anyhow!("Unknown dataset '{dataset_id}' in schema registry"))
    }
}
