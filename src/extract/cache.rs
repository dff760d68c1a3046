use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::model::{document_name, TableDetection};
use crate::extract::TableExtractor;

/// Memoizes another extractor on disk.
///
/// Results live in `<root>/<tool>/<document>/<i>.json`, one detection per file,
/// numbered from 1. A non-empty directory is treated as a hit and the wrapped
/// extractor is not run.
pub struct CachedExtractor {
    inner: Box<dyn TableExtractor>,
    root: PathBuf,
}

impl CachedExtractor {
    pub fn new(inner: Box<dyn TableExtractor>, root: PathBuf) -> Self {
        Self { inner, root }
    }

    pub fn cache_dir(&self, pdf_path: &Path) -> PathBuf {
        self.root
            .join(self.inner.name())
            .join(document_name(pdf_path))
    }
}

impl TableExtractor for CachedExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn extract(&self, pdf_path: &Path) -> Result<Vec<TableDetection>> {
        let dir = self.cache_dir(pdf_path);
        if is_populated(&dir)? {
            let tables = load_cached(&dir)?;
            debug!(tool = self.name(), dir = %dir.display(), tables = tables.len(), "extractor cache hit");
            return Ok(tables);
        }

        let tables = self.inner.extract(pdf_path)?;
        save_cached(&dir, &tables)?;
        info!(tool = self.name(), dir = %dir.display(), tables = tables.len(), "cached extractor output");
        Ok(tables)
    }
}

fn is_populated(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(dir)?.next().is_some())
}

pub fn save_cached(dir: &Path, tables: &[TableDetection]) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (i, table) in tables.iter().enumerate() {
        let path = dir.join(format!("{}.json", i + 1));
        let data = serde_json::to_string_pretty(table)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

pub fn load_cached(dir: &Path) -> Result<Vec<TableDetection>> {
    let mut entries: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let index = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(index) = index {
            entries.push((index, path));
        }
    }
    entries.sort_by_key(|(index, _)| *index);

    entries
        .into_iter()
        .map(|(_, path)| {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)
                .with_context(|| format!("malformed cached detection {}", path.display()))
        })
        .collect()
}
