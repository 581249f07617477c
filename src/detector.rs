// src/detector.rs

use crate::interfaces::ObjectDetector;
use crate::types::{BBox, Detection, Frame};
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const YOLO_INPUT_SIZE: usize = 640;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Which detection head a session was trained for. Determines the class
/// count and label names of the raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Side-view wagon localizer (engine=0, wagon=1).
    Wagon,
    /// Top-view wagon localizer (single class).
    TopWagon,
    /// Defect detector over a cropped wagon region.
    Defect,
}

impl ModelKind {
    pub fn num_classes(&self) -> usize {
        match self {
            Self::Wagon => 2,
            Self::TopWagon => 1,
            Self::Defect => 7,
        }
    }

    pub fn class_name(&self, class_id: usize) -> &'static str {
        match self {
            Self::Wagon => match class_id {
                0 => "engine",
                1 => "wagon",
                _ => "unknown",
            },
            Self::TopWagon => "wagon",
            Self::Defect => match class_id {
                0 => "Dent",
                1 => "gunny_bag",
                2 => "hole",
                3 => "missing_door",
                4 => "open_door",
                5 => "scratch",
                6 => "wire",
                _ => "unknown",
            },
        }
    }
}

pub struct YoloDetector {
    session: Session,
    kind: ModelKind,
}

impl YoloDetector {
    pub fn new(model_path: &str, kind: ModelKind, num_threads: usize) -> Result<Self> {
        info!("Loading {:?} detector: {}", kind, model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load detector model {model_path}"))?;

        info!("✓ {:?} detector initialized", kind);
        Ok(Self { session, kind })
    }

    fn preprocess(&self, src: &[u8], src_w: usize, src_h: usize) -> (Vec<f32>, f32, f32, f32) {
        let target_size = YOLO_INPUT_SIZE;

        // Fit inside 640x640 preserving aspect ratio, then pad to center
        let scale = (target_size as f32 / src_w as f32).min(target_size as f32 / src_h as f32);
        let scaled_w = (src_w as f32 * scale) as usize;
        let scaled_h = (src_h as f32 * scale) as usize;

        let pad_x = (target_size - scaled_w) as f32 / 2.0;
        let pad_y = (target_size - scaled_h) as f32 / 2.0;

        let resized = crate::imageops::resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

        let mut canvas = vec![114u8; target_size * target_size * 3];
        for y in 0..scaled_h {
            for x in 0..scaled_w {
                let src_idx = (y * scaled_w + x) * 3;
                let dst_x = x + pad_x as usize;
                let dst_y = y + pad_y as usize;
                let dst_idx = (dst_y * target_size + dst_x) * 3;
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
            }
        }

        // [0, 255] -> [0, 1], HWC -> CHW
        let mut input = vec![0.0f32; 3 * target_size * target_size];
        for c in 0..3 {
            for h in 0..target_size {
                for w in 0..target_size {
                    let hwc_idx = (h * target_size + w) * 3 + c;
                    let chw_idx = c * target_size * target_size + h * target_size + w;
                    input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
                }
            }
        }

        (input, scale, pad_x, pad_y)
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }

    fn postprocess(
        &self,
        output: &[f32],
        scale: f32,
        pad_x: f32,
        pad_y: f32,
        conf_thresh: f32,
    ) -> Vec<Detection> {
        let num_classes = self.kind.num_classes();
        // Output layout: [1, 4 + C, N] with center-format boxes first
        let num_anchors = output.len() / (4 + num_classes);
        let mut detections = Vec::new();

        for i in 0..num_anchors {
            let cx = output[i];
            let cy = output[num_anchors + i];
            let w = output[num_anchors * 2 + i];
            let h = output[num_anchors * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..num_classes {
                let conf = output[num_anchors * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < conf_thresh {
                continue;
            }

            // Center format -> corners, then undo the letterbox transform
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: max_conf,
                class_id: best_class,
                label: self.kind.class_name(best_class).to_string(),
            });
        }

        nms(detections, NMS_IOU_THRESHOLD)
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = self.preprocess(&frame.data, frame.width, frame.height);
        let output = self.infer(&input)?;
        let detections = self.postprocess(&output, scale, pad_x, pad_y, min_confidence);
        debug!(
            "Frame {}: {} detection(s) from {:?} model",
            frame.index,
            detections.len(),
            self.kind
        );
        Ok(detections)
    }
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }

    keep
}

pub fn calculate_iou(box1: &BBox, box2: &BBox) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: BBox, conf: f32) -> Detection {
        Detection {
            bbox,
            confidence: conf,
            class_id: 0,
            label: "Dent".to_string(),
        }
    }

    #[test]
    fn test_iou_identical_boxes() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((calculate_iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping_lower_confidence() {
        let dets = vec![
            det([0.0, 0.0, 10.0, 10.0], 0.9),
            det([1.0, 1.0, 11.0, 11.0], 0.7),
            det([50.0, 50.0, 60.0, 60.0], 0.8),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_defect_labels() {
        assert_eq!(ModelKind::Defect.class_name(5), "scratch");
        assert_eq!(ModelKind::Defect.class_name(2), "hole");
        assert_eq!(ModelKind::Wagon.class_name(1), "wagon");
    }
}
