// src/comparison.rs
//
// Entry/exit comparison job: pair captures positionally, run two-stage
// detection (wagon crop, then defects within it), classify via the matcher,
// and persist one annotated image plus one JSON record per pair.

use crate::annotate;
use crate::error::{JobError, JobResult};
use crate::imageops;
use crate::interfaces::{CancelToken, FeatureExtractor, ImageStore, ObjectDetector, ProgressSink};
use crate::matching::DefectMatcher;
use crate::types::{
    Capture, ComparisonResult, DefectClass, DefectRecord, Detection, Frame, MatchingConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Pull the trailing number out of names like `frame_12` or `wagon_007.jpg`.
pub fn sequence_from_filename(name: &str) -> Option<u32> {
    let stem = name.trim().rsplit('/').next()?;
    let stem = stem.split('.').next()?;
    stem.rsplit('_').next()?.parse().ok()
}

/// Strict form for disk-loaded captures: a name without a sequence number
/// cannot be ordered against the other side, so it fails the job.
pub fn sequence_for(name: &str) -> JobResult<u32> {
    sequence_from_filename(name).ok_or_else(|| {
        JobError::Other(anyhow::anyhow!("no trailing sequence number in '{name}'"))
    })
}

/// Pair the two sides positionally: entry ascending by sequence against exit
/// descending. The two camera vantage points see the rake in opposite order,
/// so reversing one side re-aligns corresponding physical wagons.
pub fn pair_captures(
    mut entry: Vec<Capture>,
    mut exit: Vec<Capture>,
) -> JobResult<Vec<(Capture, Capture)>> {
    if entry.is_empty() {
        return Err(JobError::InputNotFound("entry captures".to_string()));
    }
    if exit.is_empty() {
        return Err(JobError::InputNotFound("exit captures".to_string()));
    }
    if entry.len() != exit.len() {
        return Err(JobError::CountMismatch {
            entry: entry.len(),
            exit: exit.len(),
        });
    }

    entry.sort_by_key(|c| c.sequence);
    exit.sort_by_key(|c| std::cmp::Reverse(c.sequence));
    Ok(entry.into_iter().zip(exit).collect())
}

pub struct ComparisonOrchestrator<'a> {
    wagon_detector: &'a mut dyn ObjectDetector,
    defect_detector: &'a mut dyn ObjectDetector,
    embedder: &'a mut dyn FeatureExtractor,
    store: &'a mut dyn ImageStore,
    matcher: DefectMatcher,
    min_confidence: f32,
}

impl<'a> ComparisonOrchestrator<'a> {
    pub fn new(
        wagon_detector: &'a mut dyn ObjectDetector,
        defect_detector: &'a mut dyn ObjectDetector,
        embedder: &'a mut dyn FeatureExtractor,
        store: &'a mut dyn ImageStore,
        matching: &MatchingConfig,
        min_confidence: f32,
    ) -> Self {
        Self {
            wagon_detector,
            defect_detector,
            embedder,
            store,
            matcher: DefectMatcher::new(matching),
            min_confidence,
        }
    }

    /// Run the whole job. Any failure aborts it; outputs already written for
    /// earlier pairs stay in place (keys are deterministic, so a rerun
    /// overwrites them).
    pub fn run_comparison(
        &mut self,
        entry: Vec<Capture>,
        exit: Vec<Capture>,
        output_prefix: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> JobResult<Vec<ComparisonResult>> {
        let pairs = pair_captures(entry, exit)?;
        let total = pairs.len();
        info!("Comparing {} entry/exit pair(s)", total);

        let mut results = Vec::with_capacity(total);
        for (i, (entry_cap, exit_cap)) in pairs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let result = self.process_pair(&entry_cap, &exit_cap, output_prefix)?;
            results.push(result);

            progress.update(
                ((i + 1) * 100 / total) as u8,
                &format!("Processed pair {}/{}", i + 1, total),
            );
        }

        info!("✓ Comparison complete: {} result(s)", results.len());
        Ok(results)
    }

    fn process_pair(
        &mut self,
        entry_cap: &Capture,
        exit_cap: &Capture,
        output_prefix: &Path,
    ) -> JobResult<ComparisonResult> {
        let entry_crop = self.crop_wagon(&entry_cap.frame)?;
        let exit_crop = self.crop_wagon(&exit_cap.frame)?;

        let entry_defects = self
            .defect_detector
            .detect(&entry_crop, self.min_confidence)?;
        let exit_defects = self
            .defect_detector
            .detect(&exit_crop, self.min_confidence)?;
        debug!(
            "Pair {}&{}: {} entry / {} exit defect(s)",
            entry_cap.name,
            exit_cap.name,
            entry_defects.len(),
            exit_defects.len()
        );

        let outcome = self.matcher.match_defects(
            entry_defects,
            exit_defects,
            &entry_crop,
            &exit_crop,
            self.embedder,
        )?;

        // Entry side shows what was there (gone or persisting); exit side
        // shows what is there now.
        let mut entry_mat = annotate::frame_to_bgr_mat(&entry_crop)?;
        annotate::draw_defects(&mut entry_mat, &outcome.resolved, DefectClass::Resolved)?;
        annotate::draw_defects(&mut entry_mat, &outcome.old, DefectClass::Old)?;

        let mut exit_mat = annotate::frame_to_bgr_mat(&exit_crop)?;
        annotate::draw_defects(&mut exit_mat, &outcome.old, DefectClass::Old)?;
        annotate::draw_defects(&mut exit_mat, &outcome.new, DefectClass::New)?;

        let combined = annotate::compose_side_by_side(&entry_mat, &exit_mat)?;
        let jpeg = annotate::encode_jpg(&combined)?;

        let result = ComparisonResult {
            entry_image: entry_cap.name.clone(),
            exit_image: exit_cap.name.clone(),
            old: outcome.old.iter().map(DefectRecord::from).collect(),
            new: outcome.new.iter().map(DefectRecord::from).collect(),
            resolved: outcome.resolved.iter().map(DefectRecord::from).collect(),
            generated_on: chrono::Local::now().format("%d-%m-%Y %H:%M:%S").to_string(),
        };

        let key = format!("{}&{}", entry_cap.name, exit_cap.name);
        let jpg_path: PathBuf = output_prefix.join(format!("{key}.jpg"));
        let json_path: PathBuf = output_prefix.join(format!("{key}.json"));
        let json = serde_json::to_vec_pretty(&result).map_err(anyhow::Error::from)?;
        self.store.write(&jpg_path, &jpeg)?;
        self.store.write(&json_path, &json)?;

        Ok(result)
    }

    /// Two-stage detection, stage one: localize the wagon and crop to it.
    /// No wagon found means the frame is used as-is.
    fn crop_wagon(&mut self, frame: &Frame) -> JobResult<Frame> {
        let wagons = self.wagon_detector.detect(frame, self.min_confidence)?;
        match wagons.first() {
            Some(det) => Ok(imageops::crop_rgb(frame, &det.bbox)),
            None => Ok(frame.clone()),
        }
    }
}
