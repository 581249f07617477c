// src/tracker.rs
//
// Greedy IoU tracker standing in for the external multi-object tracker
// capability. A track confirms after `min_confirmations` consecutive
// associations and is dropped after `max_age` frames without one.

use crate::detector::calculate_iou;
use crate::interfaces::ObjectTracker;
use crate::types::{BBox, Detection, TrackObservation, TrackerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    /// Newly created, not yet confirmed.
    Tentative,
    /// Met the confirmation streak.
    Confirmed,
}

#[derive(Debug)]
struct Track {
    id: u32,
    bbox: BBox,
    state: TrackState,
    hits: u32,
    misses: u32,
}

pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }
}

impl ObjectTracker for IouTracker {
    fn update(&mut self, detections: &[Detection], _frame_index: u64) -> Vec<TrackObservation> {
        let mut det_used = vec![false; detections.len()];

        // Associate each track with its best unmatched detection by IoU
        for track in self.tracks.iter_mut() {
            let mut best_iou = self.config.iou_threshold;
            let mut best_idx: Option<usize> = None;

            for (i, det) in detections.iter().enumerate() {
                if det_used[i] {
                    continue;
                }
                let iou = calculate_iou(&track.bbox, &det.bbox);
                if iou > best_iou {
                    best_iou = iou;
                    best_idx = Some(i);
                }
            }

            match best_idx {
                Some(i) => {
                    det_used[i] = true;
                    track.bbox = detections[i].bbox;
                    track.hits += 1;
                    track.misses = 0;
                    if track.state == TrackState::Tentative
                        && track.hits >= self.config.min_confirmations
                    {
                        track.state = TrackState::Confirmed;
                    }
                }
                None => {
                    track.misses += 1;
                    // A broken streak restarts confirmation from scratch
                    if track.state == TrackState::Tentative {
                        track.hits = 0;
                    }
                }
            }
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|t| t.misses <= max_age);

        for (i, det) in detections.iter().enumerate() {
            if !det_used[i] {
                self.tracks.push(Track {
                    id: self.next_id,
                    bbox: det.bbox,
                    state: TrackState::Tentative,
                    hits: 1,
                    misses: 0,
                });
                self.next_id += 1;
            }
        }

        self.tracks
            .iter()
            .map(|t| TrackObservation {
                id: t.id,
                confirmed: t.state == TrackState::Confirmed,
                bbox: t.bbox,
            })
            .collect()
    }
}
