pub mod config;
pub mod core;
pub mod export;
pub mod extract;
pub mod fusion;
pub mod matcher;
pub mod oracle;
pub mod pipeline;
pub mod render;

pub use config::FuseConfig;
pub use core::geometry::BBox;
pub use core::model::{FusedTableRecord, FusionOutcome, MatchedGroup, TableDetection};
pub use core::TableFuseError;
pub use pipeline::{BatchSummary, DocumentReport, Pipeline, PipelineConfig};
