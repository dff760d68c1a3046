use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::FuseConfig;
use crate::core::error::TableFuseError;
use crate::core::model::document_name;
use crate::export::{DirectorySink, TableSink};
use crate::extract::TableExtractor;
use crate::fusion::{FusionEngine, FusionMode, OracleFusionEngine};
use crate::matcher::{match_tables, one_group_per_detection, MatchResult, MatchSummary};
use crate::oracle::{ChatCompletionsOracle, CorrectionOracle};
use crate::render::{PageRenderer, PageSource, RegionCropper};

/// Opens a page source for one document; the second argument is a scratch directory.
pub type PageSourceFactory = dyn Fn(&Path, &Path) -> Result<Box<dyn PageSource>> + Send + Sync;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub iou_threshold: f64,
    pub dpi: u32,
    pub workers: usize,
    pub mode: FusionMode,
    /// Scratch space for rendered pages, one subdirectory per document.
    pub work_dir: PathBuf,
}

impl PipelineConfig {
    pub fn from_fuse_config(config: &FuseConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            dpi: config.dpi,
            workers: config.workers,
            mode: config.mode,
            work_dir: std::env::temp_dir().join(format!("tablefuse-{}", std::process::id())),
        }
    }
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReport {
    pub document: String,
    pub summary: MatchSummary,
    pub fused: usize,
    pub empty: usize,
    /// 1-based indices of groups whose fusion failed; nothing was written for them.
    pub failed: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub groups_formed: usize,
    pub groups_kept: usize,
    pub fused: usize,
    pub empty: usize,
    pub failed_groups: usize,
}

impl BatchSummary {
    pub fn record(&mut self, report: &DocumentReport) {
        self.documents_processed += 1;
        self.groups_formed += report.summary.groups_formed;
        self.groups_kept += report.summary.groups_kept;
        self.fused += report.fused;
        self.empty += report.empty;
        self.failed_groups += report.failed.len();
    }

    pub fn keep_rate(&self) -> f64 {
        if self.groups_formed == 0 {
            0.0
        } else {
            self.groups_kept as f64 / self.groups_formed as f64
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} document(s) processed, {} failed; kept {}/{} groups ({:.1}%); {} fused, {} empty, {} failed",
            self.documents_processed,
            self.documents_failed,
            self.groups_kept,
            self.groups_formed,
            self.keep_rate() * 100.0,
            self.fused,
            self.empty,
            self.failed_groups
        )
    }
}

/// Runs every extractor on `pdf` in order and groups the results.
///
/// `single` mode takes exactly one extractor and gives each of its detections
/// a group of its own; the other modes match across tools by IoU.
pub fn extract_and_match(
    extractors: &[Box<dyn TableExtractor>],
    pdf: &Path,
    iou_threshold: f64,
    mode: FusionMode,
) -> Result<MatchResult> {
    if mode == FusionMode::Single && extractors.len() != 1 {
        return Err(TableFuseError::Config(format!(
            "single mode takes exactly one tool, got {}",
            extractors.len()
        ))
        .into());
    }
    let document = document_name(pdf);
    let mut tool_tables = Vec::with_capacity(extractors.len());
    for extractor in extractors {
        let tables = extractor
            .extract(pdf)
            .with_context(|| format!("{document}: extractor `{}` failed", extractor.name()))?;
        tool_tables.push(tables);
    }
    if mode == FusionMode::Single {
        let tables = tool_tables.into_iter().flatten().collect();
        return Ok(one_group_per_detection(tables));
    }
    Ok(match_tables(tool_tables, iou_threshold))
}

/// Expands directories to the PDFs directly inside them, sorted by path.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            pdfs.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = fs::read_dir(input)
            .with_context(|| format!("Failed to list {}", input.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        found.sort();
        pdfs.extend(found);
    }
    Ok(pdfs)
}

pub struct Pipeline {
    extractors: Vec<Box<dyn TableExtractor>>,
    oracle: Box<dyn CorrectionOracle>,
    sink: Box<dyn TableSink>,
    pages: Box<PageSourceFactory>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        extractors: Vec<Box<dyn TableExtractor>>,
        oracle: Box<dyn CorrectionOracle>,
        sink: Box<dyn TableSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            extractors,
            oracle,
            sink,
            pages: Box::new(|pdf: &Path, work_dir: &Path| -> Result<Box<dyn PageSource>> {
                Ok(Box::new(PageRenderer::new(pdf.to_path_buf(), work_dir.to_path_buf())?))
            }),
            config,
        }
    }

    /// Command extractors, the chat-completions oracle and a directory sink, all from `config`.
    pub fn from_config(config: &FuseConfig) -> Result<Self> {
        config.validate()?;
        let extractors = config.build_extractors()?;
        let oracle = ChatCompletionsOracle::from_config(&config.oracle)?;
        let sink = DirectorySink::new(config.output_dir.clone());
        Ok(Self::new(
            extractors,
            Box::new(oracle),
            Box::new(sink),
            PipelineConfig::from_fuse_config(config),
        ))
    }

    /// Replaces the poppler renderer used for table crops.
    pub fn with_page_source<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Path, &Path) -> Result<Box<dyn PageSource>> + Send + Sync + 'static,
    {
        self.pages = Box::new(factory);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_string()).collect()
    }

    /// Extracts, matches, fuses and persists every table of one PDF.
    ///
    /// Extraction errors abort the document. A group that fails to fuse is
    /// logged, counted and skipped; its index stays unused.
    pub fn process_document(&self, pdf: &Path) -> Result<DocumentReport> {
        if !pdf.is_file() {
            anyhow::bail!("Input file does not exist: {}", pdf.display());
        }
        let document = document_name(pdf);
        info!(document = %document, mode = %self.config.mode, "processing document");

        let matched =
            extract_and_match(&self.extractors, pdf, self.config.iou_threshold, self.config.mode)?;
        let summary = matched.summary.clone();

        let cropper = if self.config.mode.needs_image() && !matched.groups.is_empty() {
            let work_dir = self.config.work_dir.join(&document);
            let source = (self.pages)(pdf, &work_dir)
                .with_context(|| format!("{document}: failed to open page renderer"))?;
            Some(RegionCropper::new(source, self.config.dpi)?)
        } else {
            None
        };

        let results = {
            let mut engine =
                OracleFusionEngine::new(self.oracle.as_ref(), self.tool_names(), self.config.mode);
            if let Some(cropper) = &cropper {
                engine = engine.with_cropper(cropper);
            }
            self.fuse_groups(&engine, &document, matched)?
        };

        if let Some(cropper) = cropper {
            if let Err(err) = cropper.close() {
                let reason = format!("{err:#}");
                warn!(document = %document, error = %reason, "failed to release page renderer");
            }
        }

        let mut report = DocumentReport {
            document,
            summary,
            fused: 0,
            empty: 0,
            failed: Vec::new(),
        };
        for (index, result) in results {
            match result {
                Ok(true) => report.empty += 1,
                Ok(false) => report.fused += 1,
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(
                        document = %report.document,
                        table = index,
                        error = %reason,
                        "table fusion failed"
                    );
                    report.failed.push(index);
                }
            }
        }
        info!(
            document = %report.document,
            fused = report.fused,
            empty = report.empty,
            failed = report.failed.len(),
            "document finished"
        );
        Ok(report)
    }

    /// Fuses and persists groups on the worker pool; yields `(index, is_empty)` per group.
    fn fuse_groups(
        &self,
        engine: &dyn FusionEngine,
        document: &str,
        matched: MatchResult,
    ) -> Result<Vec<(usize, Result<bool>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .context("Failed to build fusion worker pool")?;

        let results: Vec<(usize, Result<bool>)> = pool.install(|| {
            matched
                .groups
                .into_par_iter()
                .enumerate()
                .map(|(i, group)| {
                    let index = i + 1;
                    let result = engine
                        .fuse(group)
                        .and_then(|response| {
                            self.sink.persist(document, index, &response)?;
                            Ok(response.outcome.is_empty())
                        })
                        .with_context(|| format!("{document}: table {index}"));
                    (index, result)
                })
                .collect()
        });
        Ok(results)
    }

    /// Processes every PDF in turn, calling `on_document` after each one.
    pub fn run_batch<F>(&self, pdfs: &[PathBuf], mut on_document: F) -> BatchSummary
    where
        F: FnMut(usize, &Path, &Result<DocumentReport>),
    {
        let mut summary = BatchSummary::default();
        for (i, pdf) in pdfs.iter().enumerate() {
            let result = self.process_document(pdf);
            match &result {
                Ok(report) => summary.record(report),
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(pdf = %pdf.display(), error = %reason, "document failed");
                    summary.documents_failed += 1;
                }
            }
            on_document(i, pdf, &result);
        }
        info!("batch finished: {summary}");
        summary
    }
}
