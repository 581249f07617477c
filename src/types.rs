use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub capture: CaptureConfig,
    pub tracker: TrackerConfig,
    pub matching: MatchingConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub wagon_model_path: String,
    pub defect_model_path: String,
    pub top_model_path: String,
    pub embed_model_path: String,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStrategy {
    /// One wagon visible at a time; delay-buffer state machine.
    Sequential,
    /// Multiple wagons may be visible; one capture per confirmed track.
    Tracked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub strategy: CaptureStrategy,
    pub confidence_threshold: f32,
    pub wagon_class_id: usize,
    pub top_wagon_class_id: usize,
    pub capture_delay: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Frames a lost track is kept before removal.
    pub max_age: u32,
    /// Consecutive associations before a track counts as confirmed.
    pub min_confirmations: u32,
    /// Minimum IoU for a detection to associate with a track.
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            min_confirmations: 3,
            iou_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub similarity_threshold: f32,
    pub centroid_distance_px: f32,
    /// Labels stripped from both sides before matching (straps, wires, ...).
    pub ignore_labels: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            centroid_distance_px: 30.0,
            ignore_labels: vec!["wire".to_string(), "gunny_bag".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// `[x1, y1, x2, y2]` in source-image pixel coordinates.
pub type BBox = [f32; 4];

/// A decoded RGB8 image with its position in the source stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Monotonically increasing within one video/source.
    pub index: u64,
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

/// One selected frame representing a single physical wagon pass.
/// Immutable once emitted; `sequence` pairs entry/exit sides later, `name`
/// keys persisted outputs.
#[derive(Debug, Clone)]
pub struct Capture {
    pub sequence: u32,
    pub name: String,
    pub frame: Frame,
}

impl Capture {
    /// Freshly selected from a video stream, named after its sequence.
    pub fn new(sequence: u32, frame: Frame) -> Self {
        Self {
            sequence,
            name: format!("frame_{sequence}"),
            frame,
        }
    }

    /// Loaded from disk; keeps the source file's stem as its name.
    pub fn named(sequence: u32, name: impl Into<String>, frame: Frame) -> Self {
        Self {
            sequence,
            name: name.into(),
            frame,
        }
    }
}

/// What a tracker reports for one identity on one frame.
#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub id: u32,
    pub confirmed: bool,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectClass {
    Old,
    New,
    Resolved,
}

impl DefectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Old => "OLD",
            Self::New => "NEW",
            Self::Resolved => "RESOLVED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectRecord {
    pub label: String,
    pub bbox: BBox,
    #[serde(rename = "conf")]
    pub confidence: f32,
}

impl From<&Detection> for DefectRecord {
    fn from(det: &Detection) -> Self {
        Self {
            label: det.label.clone(),
            bbox: det.bbox,
            confidence: det.confidence,
        }
    }
}

/// Per-pair outcome of an entry/exit comparison. The three lists partition
/// the input detection sets: every exit detection lands in OLD or NEW,
/// every entry detection in OLD or RESOLVED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub entry_image: String,
    pub exit_image: String,
    #[serde(rename = "OLD")]
    pub old: Vec<DefectRecord>,
    #[serde(rename = "NEW")]
    pub new: Vec<DefectRecord>,
    #[serde(rename = "RESOLVED")]
    pub resolved: Vec<DefectRecord>,
    pub generated_on: String,
}

/// Per-image damage tally for the top-view path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageCount {
    pub image_name: String,
    #[serde(flatten)]
    pub counts: BTreeMap<String, u32>,
}
