//! Per-page orchestration and the page queue

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use figure_extract_common::PageImage;
use figure_fusion::{FusionEngine, FusionResult};
use figure_layout_detection::LayoutDetector;
use figure_storage::{MergedFigure, Persister};
use figure_zero_shot_detection::ZeroShotDetector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Result of a successfully processed page
#[derive(Debug, Clone)]
pub struct PageReport {
    /// Page name (file stem)
    pub page: String,
    pub path: PathBuf,
    /// Records written to `figures.json`
    pub figures: Vec<MergedFigure>,
    /// Detections from the layout tool
    pub layout_count: usize,
    /// Detections from the zero-shot model before fusion
    pub zero_shot_count: usize,
    /// Zero-shot detections that survived fusion
    pub zero_shot_kept: usize,
    pub processing_time: Duration,
}

/// Outcome of one page in a run
#[derive(Debug, Clone)]
pub enum PageOutcome {
    Completed(PageReport),
    Failed { path: PathBuf, error: String },
}

impl PageOutcome {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            PageOutcome::Completed(report) => &report.path,
            PageOutcome::Failed { path, .. } => path,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, PageOutcome::Completed(_))
    }
}

/// Layout detection, zero-shot detection, fusion and persistence for pages
pub struct FigurePipeline {
    config: PipelineConfig,
    layout: LayoutDetector,
    zero_shot: Arc<ZeroShotDetector>,
    fusion: FusionEngine,
    persister: Persister,
}

impl FigurePipeline {
    /// Build a pipeline around caller-constructed detectors
    pub fn new(
        config: PipelineConfig,
        layout: LayoutDetector,
        zero_shot: Arc<ZeroShotDetector>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let fusion = FusionEngine::new(config.fusion.clone())?;
        let persister = Persister::new(config.storage.clone())?;

        Ok(Self {
            config,
            layout,
            zero_shot,
            fusion,
            persister,
        })
    }

    /// Build the layout detector and load the zero-shot model from `config`
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let layout = LayoutDetector::new(config.layout_config());
        let zero_shot = Arc::new(ZeroShotDetector::from_config(config.zero_shot_config())?);
        Self::new(config, layout, zero_shot)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one page image end to end
    pub async fn process_page(&self, path: &Path) -> Result<PageReport, PipelineError> {
        let start = Instant::now();
        let output_dir = self.config.output_dir.clone();

        let page = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || PageImage::open(path)).await??
        };
        let name = page.name();
        info!("Processing {} ({}x{})", name, page.width(), page.height());

        let layout = self.layout.detect(&page, &output_dir).await;

        let zero_shot = {
            let detector = Arc::clone(&self.zero_shot);
            let page = page.clone();
            let work_dir = output_dir.clone();
            tokio::task::spawn_blocking(move || detector.detect(&page, &work_dir)).await??
        };

        let FusionResult {
            detections,
            summary,
        } = self.fusion.fuse(layout, zero_shot);

        let figures = {
            let persister = self.persister.clone();
            let page = page.clone();
            tokio::task::spawn_blocking(move || persister.persist(&page, &detections, &output_dir))
                .await??
        };

        let processing_time = start.elapsed();
        info!(
            "{}: {} figures (layout={}, zero-shot={}, zero-shot kept={}) in {:.2}s",
            name,
            figures.len(),
            summary.priority,
            summary.secondary,
            summary.secondary_kept,
            processing_time.as_secs_f64()
        );

        Ok(PageReport {
            page: name,
            path: path.to_path_buf(),
            figures,
            layout_count: summary.priority,
            zero_shot_count: summary.secondary,
            zero_shot_kept: summary.secondary_kept,
            processing_time,
        })
    }

    async fn outcome(&self, path: PathBuf) -> PageOutcome {
        match self.process_page(&path).await {
            Ok(report) => PageOutcome::Completed(report),
            Err(e) => {
                error!("{}: {}", path.display(), e);
                PageOutcome::Failed {
                    path,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Process every page best-effort, returning outcomes in input order
    ///
    /// With `max_concurrent_pages == 1` pages run one after another. Otherwise
    /// up to that many pages are in flight at once.
    pub async fn run(self: Arc<Self>, paths: Vec<PathBuf>) -> Vec<PageOutcome> {
        let max_concurrent = self.config.max_concurrent_pages;
        info!("Pages: {}, max concurrent: {}", paths.len(), max_concurrent);

        let outcomes = if max_concurrent <= 1 {
            let mut outcomes = Vec::with_capacity(paths.len());
            for path in paths {
                outcomes.push(self.outcome(path).await);
            }
            outcomes
        } else {
            Self::run_concurrent(&self, paths, max_concurrent).await
        };

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        info!("Run finished: {} completed, {} failed", completed, outcomes.len() - completed);

        outcomes
    }

    async fn run_concurrent(
        pipeline: &Arc<Self>,
        paths: Vec<PathBuf>,
        max_concurrent: usize,
    ) -> Vec<PageOutcome> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut tasks = Vec::with_capacity(paths.len());

        for path in paths {
            let pipeline = Arc::clone(pipeline);
            let semaphore = Arc::clone(&semaphore);
            let task_path = path.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                pipeline.outcome(task_path).await
            });
            tasks.push((path, handle));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (path, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}: page task failed: {}", path.display(), e);
                    PageOutcome::Failed {
                        path,
                        error: PipelineError::Task(e).to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}
