// src/top_count.rs
//
// Top-view damage counting: no cross-time matching, just one detector pass
// per image, a per-class tally, and an annotated copy of each input.

use crate::annotate;
use crate::error::{JobError, JobResult};
use crate::interfaces::{CancelToken, ImageStore, ObjectDetector, ProgressSink};
use crate::types::{DamageCount, DefectClass, Frame};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub fn run_top_count(
    images: Vec<(String, Frame)>,
    detector: &mut dyn ObjectDetector,
    store: &mut dyn ImageStore,
    output_prefix: &Path,
    min_confidence: f32,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> JobResult<Vec<DamageCount>> {
    if images.is_empty() {
        return Err(JobError::InputNotFound("top-view images".to_string()));
    }

    let total = images.len();
    info!("Counting damage across {} image(s)", total);

    let mut records = Vec::with_capacity(total);
    for (i, (name, frame)) in images.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let detections = detector.detect(&frame, min_confidence)?;

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for det in &detections {
            *counts.entry(det.label.clone()).or_insert(0) += 1;
        }

        let mut mat = annotate::frame_to_bgr_mat(&frame)?;
        // Single-vantage counting has no persisting/gone distinction; every
        // detection is rendered as newly observed damage.
        annotate::draw_defects(&mut mat, &detections, DefectClass::New)?;
        let jpeg = annotate::encode_jpg(&mat)?;

        let stem = name.split('.').next().unwrap_or(&name);
        let record = DamageCount {
            image_name: name.clone(),
            counts,
        };
        let json = serde_json::to_vec_pretty(&record).map_err(anyhow::Error::from)?;
        store.write(&output_prefix.join(format!("{stem}_annotated.jpg")), &jpeg)?;
        store.write(&output_prefix.join(format!("{stem}_counts.json")), &json)?;

        records.push(record);
        progress.update(
            ((i + 1) * 100 / total) as u8,
            &format!("Counted {}/{} image(s)", i + 1, total),
        );
    }

    Ok(records)
}
