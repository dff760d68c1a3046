pub mod result_sink;

use anyhow::Result;

use crate::core::model::FusionResponse;

pub use result_sink::DirectorySink;

/// Destination for fused tables, one call per table.
pub trait TableSink: Send + Sync {
    /// `index` is 1-based and is the table's position in the document's sorted group list.
    fn persist(&self, document: &str, index: usize, response: &FusionResponse) -> Result<()>;
}
