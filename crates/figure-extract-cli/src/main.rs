//! Figure Extract CLI - textbook figure extraction
//!
//! Runs layout analysis and zero-shot detection on page images, merges the
//! results and writes one directory of crops plus `figures.json` per page.

use anyhow::{Context as _, Result};
use clap::Parser;
use figure_extract_core::{FigurePipeline, PageOutcome, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod summary;

#[derive(Parser, Debug)]
#[command(
    name = "figure-extract",
    version,
    about = "Extract figures from textbook page images",
    long_about = "Extract figures from textbook page images.\n\
                  Each page goes through a layout-analysis tool and an open-vocabulary\n\
                  detector; layout regions win where both overlap.",
    after_help = "EXAMPLES:\n  \
                  figure-extract --images pages/p001.png pages/p002.png --output out\n  \
                  figure-extract --images pages/*.png --output out --max-concurrent 4\n  \
                  figure-extract --config figures.yaml --images p012.png --output out --annotate"
)]
struct Cli {
    /// Page image paths
    #[arg(long, value_name = "IMAGE", num_args = 1.., required = true)]
    images: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// YAML pipeline configuration
    #[arg(short, long, value_name = "YAML")]
    config: Option<PathBuf>,

    /// Layout-analysis tool executable
    #[arg(long, value_name = "PATH")]
    layout_bin: Option<PathBuf>,

    /// Grounding DINO ONNX model
    #[arg(long, value_name = "ONNX")]
    model: Option<PathBuf>,

    /// Tokenizer matching the model
    #[arg(long, value_name = "JSON")]
    tokenizer: Option<PathBuf>,

    /// Maximum pages processed at the same time
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Also write annotated.jpg for each page
    #[arg(long)]
    annotate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Load the config file, if any, and apply command-line overrides
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        config.output_dir = self.output.clone();
        if let Some(binary) = &self.layout_bin {
            config.layout.binary = binary.clone();
        }
        if let Some(model) = &self.model {
            config.zero_shot.model_path = model.clone();
        }
        if let Some(tokenizer) = &self.tokenizer {
            config.zero_shot.tokenizer_path = tokenizer.clone();
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_pages = max;
        }
        if self.annotate {
            config.storage.annotate = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = cli.pipeline_config()?;

    info!("=== Figure Extract ===");
    info!("Pages: {}", cli.images.len());
    info!("Output: {}", config.output_dir.display());

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let pipeline = Arc::new(
        tokio::task::spawn_blocking(move || FigurePipeline::from_config(config))
            .await
            .context("Model loading task failed")?
            .context("Failed to initialize pipeline")?,
    );

    let start = Instant::now();
    let outcomes: Vec<PageOutcome> = pipeline.run(cli.images).await;

    println!("{}", summary::render(&outcomes));
    info!("Finished in {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}
