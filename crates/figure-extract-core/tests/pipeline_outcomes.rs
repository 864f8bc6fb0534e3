//! Best-effort run semantics with a scripted zero-shot model and no layout tool

use figure_extract_core::{FigurePipeline, PageOutcome, PipelineConfig};
use figure_layout_detection::LayoutDetector;
use figure_zero_shot_detection::{
    RawDetections, ZeroShotConfig, ZeroShotDetector, ZeroShotError, ZeroShotModel,
};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const FAILING_WIDTH: u32 = 333;

/// One chart in the top-left quarter; fails on images `FAILING_WIDTH` wide
struct QuarterModel {
    calls: Arc<AtomicUsize>,
}

impl ZeroShotModel for QuarterModel {
    fn predict(
        &mut self,
        image: &RgbImage,
        _phrases: &[&str],
        _box_threshold: f32,
        _text_threshold: f32,
    ) -> Result<RawDetections, ZeroShotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image.width() == FAILING_WIDTH {
            return Err(ZeroShotError::Inference("out of memory".to_string()));
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(RawDetections {
            boxes: vec![[0.0, 0.0, w / 2.0, h / 2.0]],
            scores: vec![0.9],
            labels: vec!["chart".to_string()],
        })
    }
}

fn write_page(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
        .save(&path)
        .unwrap();
    path
}

fn pipeline(output: &Path, max_concurrent_pages: usize) -> (Arc<FigurePipeline>, Arc<AtomicUsize>) {
    let config = PipelineConfig {
        output_dir: output.to_path_buf(),
        max_concurrent_pages,
        ..PipelineConfig::default()
    };
    let mut layout_config = config.layout_config();
    layout_config.binary = PathBuf::from("/nonexistent/magic-pdf");

    let calls = Arc::new(AtomicUsize::new(0));
    let model = QuarterModel {
        calls: Arc::clone(&calls),
    };
    let zero_shot = Arc::new(ZeroShotDetector::new(model, ZeroShotConfig::default()));
    let pipeline =
        FigurePipeline::new(config, LayoutDetector::new(layout_config), zero_shot).unwrap();
    (Arc::new(pipeline), calls)
}

#[tokio::test]
async fn test_failed_pages_do_not_stop_the_run() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let paths = vec![
        write_page(input.path(), "p1.png", 400, 300),
        write_page(input.path(), "p2.png", FAILING_WIDTH, 300),
        input.path().join("missing.png"),
        write_page(input.path(), "p4.png", 640, 480),
    ];

    let (pipeline, calls) = pipeline(output.path(), 1);
    let outcomes = pipeline.run(paths.clone()).await;

    assert_eq!(outcomes.len(), 4);
    let order: Vec<&Path> = outcomes.iter().map(PageOutcome::path).collect();
    assert_eq!(order, paths.iter().map(PathBuf::as_path).collect::<Vec<_>>());

    assert!(outcomes[0].is_completed());
    match &outcomes[1] {
        PageOutcome::Failed { error, .. } => assert!(error.contains("out of memory")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!outcomes[2].is_completed());
    assert!(outcomes[3].is_completed());

    // The unreadable page never reaches the model
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let PageOutcome::Completed(report) = &outcomes[3] else {
        panic!("p4 should complete");
    };
    assert_eq!(report.page, "p4");
    assert_eq!(report.layout_count, 0);
    assert_eq!(report.zero_shot_count, 1);
    assert_eq!(report.zero_shot_kept, 1);
    assert_eq!(report.figures[0].crop_file, "fig_00_Z_chart.jpg");
    assert_eq!(report.figures[0].bbox, [0, 0, 320, 240]);
    assert!(output
        .path()
        .join("merged/p4/fig_00_Z_chart.jpg")
        .exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_run_keeps_input_order() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let paths: Vec<PathBuf> = (0..8)
        .map(|i| {
            let width = if i == 5 { FAILING_WIDTH } else { 200 + 40 * i };
            write_page(input.path(), &format!("page_{i:02}.png"), width, 200)
        })
        .collect();

    let (pipeline, calls) = pipeline(output.path(), 3);
    let outcomes = pipeline.run(paths.clone()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 8);
    for (i, (outcome, path)) in outcomes.iter().zip(&paths).enumerate() {
        assert_eq!(outcome.path(), path.as_path());
        assert_eq!(outcome.is_completed(), i != 5, "page {i}");
    }

    for i in [0usize, 7] {
        let metadata = output.path().join(format!("merged/page_{i:02}/figures.json"));
        assert!(metadata.exists());
    }
}

#[test]
fn test_invalid_config_rejected() {
    let config = PipelineConfig {
        max_concurrent_pages: 0,
        ..PipelineConfig::default()
    };
    let model = QuarterModel {
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let zero_shot = Arc::new(ZeroShotDetector::new(model, ZeroShotConfig::default()));
    let layout = LayoutDetector::new(config.layout_config());

    assert!(FigurePipeline::new(config, layout, zero_shot).is_err());
}
