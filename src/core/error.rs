use thiserror::Error;

/// Conditions callers may want to match on; everything else travels as `anyhow` context.
#[derive(Debug, Error)]
pub enum TableFuseError {
    #[error("page {page_idx} not found (document has {page_count} pages)")]
    PageNotFound { page_idx: usize, page_count: usize },

    #[error("oracle request failed ({status}): {message}")]
    Oracle { status: u16, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no extractor named `{0}` is configured")]
    MissingTool(String),
}
