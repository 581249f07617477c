// src/capture.rs
//
// Frame capture: turn a noisy per-frame detection signal into exactly one
// representative frame per physical wagon pass. Two alternative strategies,
// sharing no state:
//   - WagonCaptureStateMachine: assumes at most one wagon visible at a time
//     and works off the per-frame wagon count alone.
//   - TrackedCaptureSelector: rides an external tracker's confirmed
//     identities, tolerating several simultaneously visible wagons.
//
// Both lag their decision point by a small delay buffer so the chosen frame
// sits clear of edge-of-run detection noise.

use crate::error::{JobError, JobResult};
use crate::interfaces::{CancelToken, FrameSource, ObjectDetector, ObjectTracker, ProgressSink};
use crate::types::{Capture, CaptureConfig, CaptureStrategy, Frame, TrackObservation};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    SearchingForWagon,
    SingleWagonPassing,
}

/// Sequential single-wagon frame selector.
///
/// Holds the most recent `delay + 1` frames with their wagon counts. While a
/// clean single-wagon pass is underway, the buffer's oldest clean frame is
/// kept as the pending candidate; the candidate is emitted when the pass
/// ends (count leaves 1) or the stream does.
pub struct WagonCaptureStateMachine {
    delay: usize,
    buffer: VecDeque<(Frame, usize)>,
    state: CaptureState,
    pending: Option<Frame>,
    emitted: u32,
}

impl WagonCaptureStateMachine {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            buffer: VecDeque::with_capacity(delay + 1),
            state: CaptureState::SearchingForWagon,
            pending: None,
            emitted: 0,
        }
    }

    /// Feed the next frame and its wagon count; returns a capture when a
    /// single-wagon pass just ended with a stable candidate.
    pub fn push(&mut self, frame: Frame, wagon_count: usize) -> Option<Capture> {
        self.buffer.push_back((frame, wagon_count));
        if self.buffer.len() > self.delay + 1 {
            self.buffer.pop_front();
        }

        match self.state {
            CaptureState::SearchingForWagon => {
                if wagon_count == 1 {
                    self.state = CaptureState::SingleWagonPassing;
                    self.pending = None;
                }
                None
            }
            CaptureState::SingleWagonPassing => {
                if wagon_count == 1 {
                    // Refresh the candidate as long as the lagged frame was
                    // also a clean single-wagon frame.
                    if let Some((oldest, 1)) = self.buffer.front().map(|(f, c)| (f, *c)) {
                        self.pending = Some(oldest.clone());
                    }
                    None
                } else {
                    self.state = CaptureState::SearchingForWagon;
                    self.take_pending()
                }
            }
        }
    }

    /// End of stream: a pass still in flight emits its candidate.
    pub fn finish(&mut self) -> Option<Capture> {
        let capture = if self.state == CaptureState::SingleWagonPassing {
            self.take_pending()
        } else {
            None
        };
        self.state = CaptureState::SearchingForWagon;
        self.pending = None;
        capture
    }

    pub fn captured(&self) -> u32 {
        self.emitted
    }

    fn take_pending(&mut self) -> Option<Capture> {
        self.pending.take().map(|frame| {
            self.emitted += 1;
            debug!("Captured wagon {} at frame {}", self.emitted, frame.index);
            Capture::new(self.emitted, frame)
        })
    }
}

/// Multi-wagon selector keyed on confirmed tracker identities.
///
/// Each identity is captured exactly once, from the rolling buffer's oldest
/// frame, as soon as it is confirmed and the buffer has filled.
pub struct TrackedCaptureSelector {
    delay: usize,
    buffer: VecDeque<Frame>,
    captured_ids: HashSet<u32>,
}

impl TrackedCaptureSelector {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            buffer: VecDeque::with_capacity(delay + 1),
            captured_ids: HashSet::new(),
        }
    }

    pub fn push(&mut self, frame: Frame, tracks: &[TrackObservation]) -> Vec<Capture> {
        self.buffer.push_back(frame);
        if self.buffer.len() > self.delay + 1 {
            self.buffer.pop_front();
        }

        let mut captures = Vec::new();
        for track in tracks {
            if !track.confirmed || self.captured_ids.contains(&track.id) {
                continue;
            }
            // Identities confirmed before the buffer fills stay eligible and
            // are captured on a later frame.
            if self.buffer.len() == self.delay + 1 {
                let rep = self.buffer.front().expect("buffer is full").clone();
                debug!("Captured wagon track {} at frame {}", track.id, rep.index);
                self.captured_ids.insert(track.id);
                captures.push(Capture::new(track.id, rep));
            }
        }
        captures
    }

    pub fn captured(&self) -> usize {
        self.captured_ids.len()
    }
}

/// Drive one capture run over a frame source, strictly in frame order.
///
/// All capability calls are blocking; cancellation is checked once per frame
/// and keeps whatever was already emitted to the caller's sink unusable only
/// in the sense that the run reports `Cancelled`.
pub fn run_capture(
    source: &mut dyn FrameSource,
    detector: &mut dyn ObjectDetector,
    mut tracker: Option<&mut dyn ObjectTracker>,
    config: &CaptureConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> JobResult<Vec<Capture>> {
    // Post-processing keeps the tail of the progress range
    let progress_cap: f32 = match config.strategy {
        CaptureStrategy::Sequential => 90.0,
        CaptureStrategy::Tracked => 95.0,
    };

    let mut machine = WagonCaptureStateMachine::new(config.capture_delay);
    let mut selector = TrackedCaptureSelector::new(config.capture_delay);
    let mut captures = Vec::new();

    while let Some(frame) = source.next_frame().map_err(JobError::Other)? {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let total_frames = source.total_frames();
        if frame.index % 20 == 0 && total_frames > 0 {
            let pct = (frame.index as f32 / total_frames as f32) * progress_cap;
            progress.update(
                pct as u8,
                &format!(
                    "Scanned {} of {} frames. Found {} wagons.",
                    frame.index,
                    total_frames,
                    captures.len()
                ),
            );
        }

        let detections = detector
            .detect(&frame, config.confidence_threshold)
            .map_err(JobError::Other)?;
        let wagons: Vec<_> = detections
            .into_iter()
            .filter(|d| d.class_id == config.wagon_class_id)
            .collect();

        match config.strategy {
            CaptureStrategy::Sequential => {
                if let Some(capture) = machine.push(frame, wagons.len()) {
                    captures.push(capture);
                }
            }
            CaptureStrategy::Tracked => {
                let tracker = tracker
                    .as_deref_mut()
                    .ok_or_else(|| JobError::ModelUnavailable("object tracker".to_string()))?;
                let tracks = tracker.update(&wagons, frame.index);
                captures.extend(selector.push(frame, &tracks));
            }
        }
    }

    if let Some(capture) = machine.finish() {
        captures.push(capture);
    }

    info!("Capture run complete: {} wagon frame(s)", captures.len());
    Ok(captures)
}
