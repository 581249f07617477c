// src/main.rs

mod annotate;
mod capture;
mod comparison;
mod config;
mod detector;
mod embedding;
mod error;
mod imageops;
mod interfaces;
mod matching;
mod top_count;
mod tracker;
mod types;
mod video;

use anyhow::Result;
use comparison::ComparisonOrchestrator;
use detector::{ModelKind, YoloDetector};
use embedding::OnnxFeatureExtractor;
use error::JobError;
use interfaces::{CancelToken, FsImageStore, ImageStore, ObjectTracker, ProgressSink};
use std::path::Path;
use tracing::{error, info};
use tracker::IouTracker;
use types::{Capture, CaptureStrategy, Config};

/// Progress updates go to the log; an orchestration layer would push them to
/// its own task state instead.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&self, percent: u8, status: &str) {
        info!("[{:>3}%] {}", percent, status);
    }
}

fn main() -> Result<()> {
    let config = Config::load("config.yaml")?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("wagon_inspection={},ort=warn", config.logging.level))
        .init();

    info!("🚃 Wagon Damage Inspection Starting");
    info!("✓ Configuration loaded");

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("capture");

    let outcome = match mode {
        "capture" => {
            let top_view = args.get(2).map(|s| s == "top").unwrap_or(false);
            capture_mode(&config, top_view)
        }
        "compare" => {
            let entry_dir = args.get(2).cloned().unwrap_or_else(|| {
                format!("{}/entry", config.video.input_dir)
            });
            let exit_dir = args.get(3).cloned().unwrap_or_else(|| {
                format!("{}/exit", config.video.input_dir)
            });
            compare_mode(&config, &entry_dir, &exit_dir)
        }
        "topcount" => {
            let dir = args
                .get(2)
                .cloned()
                .unwrap_or_else(|| config.video.input_dir.clone());
            topcount_mode(&config, &dir)
        }
        other => {
            anyhow::bail!("unknown mode '{other}' (expected capture | compare | topcount)");
        }
    };

    if let Err(e) = &outcome {
        error!("Job failed: {}", e);
    }
    outcome.map_err(Into::into)
}

fn capture_mode(config: &Config, top_view: bool) -> Result<(), JobError> {
    let videos = video::find_video_files(&config.video.input_dir)?;
    if videos.is_empty() {
        return Err(JobError::InputNotFound(config.video.input_dir.clone()));
    }

    let (model_path, kind, wagon_class) = if top_view {
        (
            &config.model.top_model_path,
            ModelKind::TopWagon,
            config.capture.top_wagon_class_id,
        )
    } else {
        (
            &config.model.wagon_model_path,
            ModelKind::Wagon,
            config.capture.wagon_class_id,
        )
    };

    let mut detector = YoloDetector::new(model_path, kind, config.model.num_threads)
        .map_err(|e| JobError::ModelUnavailable(e.to_string()))?;

    let mut capture_config = config.capture.clone();
    capture_config.wagon_class_id = wagon_class;

    let mut store = FsImageStore;
    let cancel = CancelToken::new();

    for video_path in &videos {
        info!("Processing video: {}", video_path.display());

        let mut reader = video::open_video(video_path)?;
        let mut tracker = IouTracker::new(config.tracker.clone());
        let tracker_ref: Option<&mut dyn ObjectTracker> = match capture_config.strategy {
            CaptureStrategy::Sequential => None,
            CaptureStrategy::Tracked => Some(&mut tracker),
        };

        let captures = capture::run_capture(
            &mut reader,
            &mut detector,
            tracker_ref,
            &capture_config,
            &LogProgress,
            &cancel,
        )?;

        let stem = video_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        let out_dir = Path::new(&config.video.output_dir).join(stem);
        for capture in &captures {
            let jpeg = imageops::encode_rgb_to_jpeg(&capture.frame, 90)?;
            store.write(&out_dir.join(format!("{}.jpg", capture.name)), &jpeg)?;
        }

        LogProgress.update(100, &format!("Saved {} wagon frame(s)", captures.len()));
        info!(
            "✓ {}: {} wagon(s) captured -> {}",
            video_path.display(),
            captures.len(),
            out_dir.display()
        );
    }

    Ok(())
}

fn compare_mode(config: &Config, entry_dir: &str, exit_dir: &str) -> Result<(), JobError> {
    let entry = load_captures(entry_dir)?;
    let exit = load_captures(exit_dir)?;

    let threads = config.model.num_threads;
    let mut wagon_detector = YoloDetector::new(&config.model.wagon_model_path, ModelKind::Wagon, threads)
        .map_err(|e| JobError::ModelUnavailable(e.to_string()))?;
    let mut defect_detector =
        YoloDetector::new(&config.model.defect_model_path, ModelKind::Defect, threads)
            .map_err(|e| JobError::ModelUnavailable(e.to_string()))?;
    let mut embedder = OnnxFeatureExtractor::new(&config.model.embed_model_path, threads)
        .map_err(|e| JobError::ModelUnavailable(e.to_string()))?;
    let mut store = FsImageStore;

    let mut orchestrator = ComparisonOrchestrator::new(
        &mut wagon_detector,
        &mut defect_detector,
        &mut embedder,
        &mut store,
        &config.matching,
        0.25,
    );

    let out_dir = Path::new(&config.video.output_dir).join("comparison_results");
    let results = orchestrator.run_comparison(
        entry,
        exit,
        &out_dir,
        &LogProgress,
        &CancelToken::new(),
    )?;

    for result in &results {
        info!(
            "{} vs {}: {} OLD, {} NEW, {} RESOLVED",
            result.entry_image,
            result.exit_image,
            result.old.len(),
            result.new.len(),
            result.resolved.len()
        );
    }
    info!("✓ Results saved to {}", out_dir.display());
    Ok(())
}

fn topcount_mode(config: &Config, dir: &str) -> Result<(), JobError> {
    let paths = video::list_image_files(dir)?;
    let mut images = Vec::with_capacity(paths.len());
    for path in &paths {
        let name = file_name(path);
        images.push((name, video::decode_image(path)?));
    }

    let mut detector = YoloDetector::new(
        &config.model.defect_model_path,
        ModelKind::Defect,
        config.model.num_threads,
    )
    .map_err(|e| JobError::ModelUnavailable(e.to_string()))?;
    let mut store = FsImageStore;

    let out_dir = Path::new(&config.video.output_dir).join("top_view_results");
    let records = top_count::run_top_count(
        images,
        &mut detector,
        &mut store,
        &out_dir,
        0.25,
        &LogProgress,
        &CancelToken::new(),
    )?;

    for record in &records {
        let total: u32 = record.counts.values().sum();
        info!("{}: {} defect(s)", record.image_name, total);
    }
    info!("✓ Results saved to {}", out_dir.display());
    Ok(())
}

/// Decode a folder of still images into captures, sequence-numbered from the
/// trailing number in each filename. A name without one fails the job; a
/// guessed sequence could silently scramble the pairing order.
fn load_captures(dir: &str) -> Result<Vec<Capture>, JobError> {
    let paths = video::list_image_files(dir)?;
    if paths.is_empty() {
        return Err(JobError::InputNotFound(dir.to_string()));
    }

    let mut captures = Vec::with_capacity(paths.len());
    for path in &paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let sequence = comparison::sequence_for(&stem)?;
        let frame = video::decode_image(path)?;
        captures.push(Capture::named(sequence, stem, frame));
    }
    Ok(captures)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
