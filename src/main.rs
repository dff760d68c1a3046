use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tablefuse::config::FuseConfig;
use tablefuse::fusion::FusionMode;
use tablefuse::pipeline::{expand_inputs, extract_and_match, Pipeline};
use tablefuse::render::PdfReader;

const DEFAULT_CONFIG: &str = "tablefuse.toml";

#[derive(Parser, Debug)]
#[command(name = "tablefuse")]
#[command(version, about = "Multi-source PDF table consensus and fusion", long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuse the tables of one PDF
    Fuse {
        /// Input PDF file path
        input: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Fuse the tables of several PDFs or directories of PDFs
    Batch {
        /// Input PDF files or directories
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run extractors and matching only, and list the kept groups
    Match {
        /// Input PDF file path
        input: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show information about a PDF file
    Info {
        /// Input PDF file path
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML configuration (default: ./tablefuse.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output root directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rendering DPI for table crops
    #[arg(long)]
    dpi: Option<u32>,

    /// Minimum IoU for two detections to be the same table
    #[arg(long)]
    iou_threshold: Option<f64>,

    /// Concurrent oracle calls per document
    #[arg(long)]
    workers: Option<usize>,

    /// Fusion mode
    #[arg(long, value_enum)]
    mode: Option<FusionMode>,
}

impl RunArgs {
    fn load(&self) -> Result<FuseConfig> {
        let mut config = match &self.config {
            Some(path) => FuseConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG).is_file() => FuseConfig::load(Path::new(DEFAULT_CONFIG))?,
            None => FuseConfig::default(),
        };
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(dpi) = self.dpi {
            config.dpi = dpi;
        }
        if let Some(threshold) = self.iou_threshold {
            config.iou_threshold = threshold;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fuse { input, run } => fuse_single(input, &run),
        Commands::Batch { inputs, run } => fuse_batch(inputs, &run),
        Commands::Match { input, run } => show_matches(input, &run),
        Commands::Info { input } => show_info(input),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tablefuse=debug" } else { "tablefuse=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fuse_single(input: PathBuf, run: &RunArgs) -> Result<()> {
    let config = run.load()?;
    let pipeline = Pipeline::from_config(&config)?;

    println!("[*] Processing: {}", input.display());
    println!("[*] Output: {}", config.output_dir.display());
    println!("[*] Mode: {}", config.mode);
    println!("[*] Tools: {}", pipeline.tool_names().join(", "));

    let report = pipeline
        .process_document(&input)
        .with_context(|| format!("Failed to process PDF: {}", input.display()))?;

    println!("[+] {}", report.summary);
    println!(
        "[+] {} fused, {} empty, {} failed",
        report.fused,
        report.empty,
        report.failed.len()
    );
    if !report.failed.is_empty() {
        let indices: Vec<String> = report.failed.iter().map(usize::to_string).collect();
        eprintln!("[!] Failed tables: {}", indices.join(", "));
    }
    println!(
        "\n[✓] Done! Results saved to: {}",
        config.output_dir.join(&report.document).display()
    );
    Ok(())
}

fn fuse_batch(inputs: Vec<PathBuf>, run: &RunArgs) -> Result<()> {
    if inputs.is_empty() {
        anyhow::bail!("No input files specified");
    }

    let config = run.load()?;
    let pipeline = Pipeline::from_config(&config)?;
    let pdfs = expand_inputs(&inputs)?;

    println!("[*] Batch processing {} file(s)", pdfs.len());
    println!("[*] Base output: {}\n", config.output_dir.display());

    let total = pdfs.len();
    let summary = pipeline.run_batch(&pdfs, |i, pdf, result| {
        println!("[{}/{}] Processing: {}", i + 1, total, pdf.display());
        match result {
            Ok(report) => println!(
                "  [✓] {}: {} fused, {} empty, {} failed",
                report.document,
                report.fused,
                report.empty,
                report.failed.len()
            ),
            Err(e) => eprintln!("  [✗] Failed: {e:#}"),
        }
    });

    println!("\n[*] Summary: {summary}");

    if summary.documents_failed > 0 {
        anyhow::bail!("{} file(s) failed to process", summary.documents_failed);
    }
    Ok(())
}

fn show_matches(input: PathBuf, run: &RunArgs) -> Result<()> {
    let config = run.load()?;
    let extractors = config.build_extractors()?;
    let names: Vec<String> = extractors.iter().map(|e| e.name().to_string()).collect();

    let matched = extract_and_match(&extractors, &input, config.iou_threshold, config.mode)
        .with_context(|| format!("Failed to match tables in: {}", input.display()))?;

    println!("Matched Tables");
    println!("==============");
    println!("File: {}", input.display());
    println!("{}\n", matched.summary);
    for (i, group) in matched.groups.iter().enumerate() {
        let Some(anchor) = group.first_present() else {
            continue;
        };
        let tools: Vec<&str> = group
            .tool_indices()
            .into_iter()
            .filter_map(|idx| names.get(idx).map(String::as_str))
            .collect();
        let bbox: [f64; 4] = anchor.bbox.into();
        println!(
            "#{:<3} page {:<4} bbox {:?}  tools: {}",
            i + 1,
            anchor.page_index,
            bbox,
            tools.join(", ")
        );
    }
    Ok(())
}

fn show_info(input: PathBuf) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let reader = PdfReader::new(input.clone())
        .with_context(|| format!("Failed to open PDF: {}", input.display()))?;

    let page_count = reader.page_count()?;

    println!("PDF Information");
    println!("===============");
    println!("File: {}", input.display());
    println!("Pages: {}", page_count);

    Ok(())
}
