pub mod bridge;
pub mod cache;

pub use bridge::{BboxOrigin, CommandExtractor};
pub use cache::CachedExtractor;

use anyhow::Result;
use std::path::Path;

use crate::core::model::TableDetection;

/// One table-extraction tool.
///
/// Every detection must carry a bbox in top-left-origin PDF points so that
/// detections from different tools can be matched against each other.
pub trait TableExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, pdf_path: &Path) -> Result<Vec<TableDetection>>;
}

/// Fixed detections, for replaying recorded extractor output.
#[derive(Debug, Clone)]
pub struct StaticExtractor {
    name: String,
    tables: Vec<TableDetection>,
}

impl StaticExtractor {
    pub fn new(name: impl Into<String>, tables: Vec<TableDetection>) -> Self {
        Self {
            name: name.into(),
            tables,
        }
    }
}

impl TableExtractor for StaticExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, _pdf_path: &Path) -> Result<Vec<TableDetection>> {
        Ok(self.tables.clone())
    }
}
