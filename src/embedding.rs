// src/embedding.rs
//
// Visual descriptors for defect matching: a ResNet-style ONNX head over the
// cropped bbox region, reduced to a unit-normalized 512-d vector.

use crate::interfaces::FeatureExtractor;
use crate::types::{BBox, Frame};
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::info;

const EMBED_INPUT_SIZE: usize = 224;
pub const DESCRIPTOR_LEN: usize = 512;

pub struct OnnxFeatureExtractor {
    session: Session,
}

impl OnnxFeatureExtractor {
    pub fn new(model_path: &str, num_threads: usize) -> Result<Self> {
        info!("Loading feature extractor: {}", model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load embedding model {model_path}"))?;

        info!("✓ Feature extractor initialized");
        Ok(Self { session })
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<Vec<f32>> {
        let shape = [1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["input" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn embed(&mut self, frame: &Frame, bbox: &BBox) -> Result<Vec<f32>> {
        let patch = crate::imageops::crop_rgb(frame, bbox);
        if patch.width == 0 || patch.height == 0 {
            // Degenerate boxes get a zero descriptor; they never match anything.
            return Ok(vec![0.0; DESCRIPTOR_LEN]);
        }

        let resized = crate::imageops::resize_bilinear(
            &patch.data,
            patch.width,
            patch.height,
            EMBED_INPUT_SIZE,
            EMBED_INPUT_SIZE,
        );

        // [0, 255] -> [0, 1], HWC -> CHW
        let mut input = vec![0.0f32; 3 * EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        for c in 0..3 {
            for h in 0..EMBED_INPUT_SIZE {
                for w in 0..EMBED_INPUT_SIZE {
                    let hwc_idx = (h * EMBED_INPUT_SIZE + w) * 3 + c;
                    let chw_idx = c * EMBED_INPUT_SIZE * EMBED_INPUT_SIZE + h * EMBED_INPUT_SIZE + w;
                    input[chw_idx] = resized[hwc_idx] as f32 / 255.0;
                }
            }
        }

        let descriptor = self.infer(input)?;
        Ok(unit_normalize(descriptor))
    }
}

pub fn unit_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}
