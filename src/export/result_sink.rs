use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::model::{FusionOutcome, FusionResponse};
use crate::export::TableSink;

/// Writes `<root>/<document>/tables/<i>.json` and `<root>/<document>/contents/<i>.md`.
///
/// Files are overwritten on re-runs; an empty outcome is written as `{}`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tables_dir(&self, document: &str) -> PathBuf {
        self.root.join(document).join("tables")
    }

    pub fn contents_dir(&self, document: &str) -> PathBuf {
        self.root.join(document).join("contents")
    }

    pub fn table_path(&self, document: &str, index: usize) -> PathBuf {
        self.tables_dir(document).join(format!("{index}.json"))
    }

    pub fn rationale_path(&self, document: &str, index: usize) -> PathBuf {
        self.contents_dir(document).join(format!("{index}.md"))
    }
}

impl TableSink for DirectorySink {
    fn persist(&self, document: &str, index: usize, response: &FusionResponse) -> Result<()> {
        persist(&self.root, document, index, &response.rationale, &response.outcome)
    }
}

/// Writes one fused table and the oracle text it came from.
pub fn persist(
    root: &Path,
    document: &str,
    index: usize,
    rationale: &str,
    outcome: &FusionOutcome,
) -> Result<()> {
    let tables_dir = root.join(document).join("tables");
    let contents_dir = root.join(document).join("contents");
    fs::create_dir_all(&tables_dir)
        .with_context(|| format!("Failed to create {}", tables_dir.display()))?;
    fs::create_dir_all(&contents_dir)
        .with_context(|| format!("Failed to create {}", contents_dir.display()))?;

    let table_path = tables_dir.join(format!("{index}.json"));
    fs::write(&table_path, to_pretty_json(&outcome.to_json())?)
        .with_context(|| format!("Failed to write {}", table_path.display()))?;

    let rationale_path = contents_dir.join(format!("{index}.md"));
    fs::write(&rationale_path, rationale)
        .with_context(|| format!("Failed to write {}", rationale_path.display()))?;
    Ok(())
}

/// Pretty JSON with a four-space indent and non-ASCII text kept as is.
fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}
