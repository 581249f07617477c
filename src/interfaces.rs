// src/interfaces.rs
//
// Capability seams consumed by the capture and comparison cores. One
// instance per worker, reused across jobs, never swapped mid-job.

use crate::types::{BBox, Detection, Frame, TrackObservation};
use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered frame supply for one capture run. Exhausted when `next_frame`
/// returns `None`; never rewinds.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
    /// Total frame count when the container reports one, else 0.
    fn total_frames(&self) -> u64;
}

/// Runs object detection on a full frame.
pub trait ObjectDetector {
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>>;
}

/// Produces a unit-normalized descriptor for the region `bbox` of `frame`.
pub trait FeatureExtractor {
    fn embed(&mut self, frame: &Frame, bbox: &BBox) -> Result<Vec<f32>>;
}

/// Associates per-frame detections with stable identities. Confirmation
/// policy (min hits, max age, matching distance) lives in the implementor.
pub trait ObjectTracker {
    fn update(&mut self, detections: &[Detection], frame_index: u64) -> Vec<TrackObservation>;
}

/// Byte-level persistence for frames, annotated images, and result records.
pub trait ImageStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()>;
}

pub struct FsImageStore;

impl ImageStore for FsImageStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Observability-only progress reporting; carries no correctness weight.
pub trait ProgressSink {
    fn update(&self, percent: u8, status: &str);
}

/// Default sink for callers that don't care.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _percent: u8, _status: &str) {}
}

/// Cooperative cancellation flag, checked between frame or pair boundaries.
/// Output produced before the check stays where it was written.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
