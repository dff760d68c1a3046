//! Run configuration, read from a TOML file and overridden from the command line.
//!
//! ```toml
//! iou_threshold = 0.7
//! mode = "combined-vision"
//! cache_dir = "cache"
//!
//! [oracle]
//! model = "gpt-4o"
//!
//! [[tools]]
//! name = "marker"
//! program = "python3"
//! args = ["bridges/marker_tables.py", "{pdf}"]
//!
//! [[tools]]
//! name = "docling"
//! program = "python3"
//! args = ["bridges/docling_tables.py", "{pdf}"]
//! bbox_origin = "bottom-left"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::TableFuseError;
use crate::extract::{BboxOrigin, CachedExtractor, CommandExtractor, TableExtractor};
use crate::fusion::FusionMode;
use crate::matcher::DEFAULT_IOU_THRESHOLD;
use crate::render::DEFAULT_DPI;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    pub iou_threshold: f64,
    pub dpi: u32,
    pub workers: usize,
    pub mode: FusionMode,
    /// Tool used in `single` mode; the first configured tool when unset.
    pub single_tool: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub oracle: OracleConfig,
    pub tools: Vec<ToolConfig>,
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            dpi: DEFAULT_DPI,
            workers: DEFAULT_WORKERS,
            mode: FusionMode::default(),
            single_tool: None,
            cache_dir: None,
            output_dir: PathBuf::from("output"),
            oracle: OracleConfig::default(),
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub program: String,
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub bbox_origin: BboxOrigin,
}

fn default_tool_args() -> Vec<String> {
    vec![crate::extract::bridge::PDF_PLACEHOLDER.to_string()]
}

impl ToolConfig {
    pub fn extractor(&self) -> CommandExtractor {
        CommandExtractor::new(&self.name, &self.program)
            .with_args(self.args.clone())
            .with_origin(self.bbox_origin)
    }
}

impl FuseConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse TOML")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(config_error(format!(
                "iou_threshold must be in (0, 1], got {}",
                self.iou_threshold
            )));
        }
        if self.dpi == 0 {
            return Err(config_error("dpi must be positive"));
        }
        if self.workers == 0 {
            return Err(config_error("workers must be positive"));
        }
        if self.tools.is_empty() {
            return Err(config_error("at least one [[tools]] entry is required"));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.is_empty() {
                return Err(config_error("tool names must not be empty"));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(config_error(format!("duplicate tool name `{}`", tool.name)));
            }
        }

        if let Some(name) = &self.single_tool {
            if !seen.contains(name.as_str()) {
                return Err(TableFuseError::MissingTool(name.clone()).into());
            }
        }
        Ok(())
    }

    /// Tools taking part in a run: every tool, or just the single tool in `single` mode.
    pub fn active_tools(&self) -> Result<Vec<&ToolConfig>> {
        if self.mode != FusionMode::Single {
            return Ok(self.tools.iter().collect());
        }
        let tool = match &self.single_tool {
            Some(name) => self
                .tools
                .iter()
                .find(|tool| &tool.name == name)
                .ok_or_else(|| TableFuseError::MissingTool(name.clone()))?,
            None => self
                .tools
                .first()
                .ok_or_else(|| config_error("at least one [[tools]] entry is required"))?,
        };
        Ok(vec![tool])
    }

    /// One extractor per active tool, in configured order, cached when `cache_dir` is set.
    pub fn build_extractors(&self) -> Result<Vec<Box<dyn TableExtractor>>> {
        let extractors = self
            .active_tools()?
            .into_iter()
            .map(|tool| -> Box<dyn TableExtractor> {
                let extractor: Box<dyn TableExtractor> = Box::new(tool.extractor());
                match &self.cache_dir {
                    Some(root) => Box::new(CachedExtractor::new(extractor, root.clone())),
                    None => extractor,
                }
            })
            .collect();
        Ok(extractors)
    }
}

fn config_error(message: impl Into<String>) -> anyhow::Error {
    TableFuseError::Config(message.into()).into()
}
