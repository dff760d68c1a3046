use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::core::geometry::BBox;
use crate::core::model::TableDetection;
use crate::extract::TableExtractor;

/// Placeholder in configured arguments that is replaced by the PDF path.
pub const PDF_PLACEHOLDER: &str = "{pdf}";

/// Vertical convention of the boxes a tool reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BboxOrigin {
    /// `[left, top, right, bottom]` with y growing downward.
    #[default]
    TopLeft,
    /// y measured upward from the page bottom; needs `page_height` per detection.
    BottomLeft,
}

/// Detection as printed by an extractor script.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub table_body: String,
    #[serde(default)]
    pub table_caption: String,
    #[serde(default)]
    pub table_footnote: String,
    #[serde(with = "crate::core::model::page_idx", rename = "page_idx")]
    pub page_index: usize,
    pub bbox: BBox,
    #[serde(default)]
    pub page_height: Option<f64>,
}

impl RawDetection {
    pub fn normalize(self, origin: BboxOrigin) -> Result<TableDetection> {
        let bbox = match origin {
            BboxOrigin::TopLeft => self.bbox,
            BboxOrigin::BottomLeft => {
                let height = self.page_height.with_context(|| {
                    format!(
                        "bottom-left detection on page {} has no page_height",
                        self.page_index
                    )
                })?;
                self.bbox.flip_vertical(height)
            }
        };
        Ok(TableDetection {
            body: self.table_body,
            caption: self.table_caption,
            footnote: self.table_footnote,
            page_index: self.page_index,
            bbox,
        })
    }
}

/// Runs an external extraction tool that prints a JSON array of detections.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    name: String,
    program: String,
    args: Vec<String>,
    origin: BboxOrigin,
}

impl CommandExtractor {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: vec![PDF_PLACEHOLDER.to_string()],
            origin: BboxOrigin::TopLeft,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_origin(mut self, origin: BboxOrigin) -> Self {
        self.origin = origin;
        self
    }

    fn command_args(&self, pdf_path: &Path) -> Vec<String> {
        let pdf = pdf_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(PDF_PLACEHOLDER, &pdf))
            .collect()
    }
}

pub fn parse_detections(stdout: &str, origin: BboxOrigin) -> Result<Vec<TableDetection>> {
    let raw: Vec<RawDetection> =
        serde_json::from_str(stdout).with_context(|| "failed to parse extractor JSON output")?;
    raw.into_iter().map(|r| r.normalize(origin)).collect()
}

impl TableExtractor for CommandExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, pdf_path: &Path) -> Result<Vec<TableDetection>> {
        let output = Command::new(&self.program)
            .args(self.command_args(pdf_path))
            .output()
            .with_context(|| format!("failed to invoke extractor `{}`", self.name))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("extractor `{}` failed: {stderr}", self.name);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tables = parse_detections(&stdout, self.origin)
            .with_context(|| format!("extractor `{}` returned malformed output", self.name))?;
        debug!(tool = %self.name, tables = tables.len(), "extractor finished");
        Ok(tables)
    }
}
