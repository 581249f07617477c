// src/video.rs

use crate::error::{JobError, JobResult};
use crate::interfaces::FrameSource;
use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::Mat,
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst},
};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mov", "mkv", "MP4", "AVI", "MOV", "MKV"];
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

pub fn find_video_files(input_dir: &str) -> JobResult<Vec<PathBuf>> {
    if !Path::new(input_dir).is_dir() {
        return Err(JobError::InputNotFound(input_dir.to_string()));
    }

    let mut videos = Vec::new();
    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if VIDEO_EXTENSIONS.contains(&ext.to_str().unwrap_or("")) {
                videos.push(path.to_path_buf());
            }
        }
    }

    info!("Found {} video files in {}", videos.len(), input_dir);
    Ok(videos)
}

/// Non-recursive listing of image files, sorted by filename.
pub fn list_image_files(dir: &str) -> JobResult<Vec<PathBuf>> {
    if !Path::new(dir).is_dir() {
        return Err(JobError::InputNotFound(dir.to_string()));
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| JobError::Other(e.into()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_str().unwrap_or("")))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Ok(images)
}

pub fn open_video(path: &Path) -> Result<VideoReader> {
    info!("Opening video: {}", path.display());

    let cap = VideoCapture::from_file(path.to_str().unwrap_or_default(), videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        anyhow::bail!("Failed to open video file {}", path.display());
    }

    let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
    let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i64;
    let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

    info!(
        "Video properties: {}x{} @ {:.1} FPS, {} frames",
        width, height, fps, total_frames
    );

    Ok(VideoReader {
        cap,
        total_frames: total_frames.max(0) as u64,
        current_frame: 0,
    })
}

pub struct VideoReader {
    cap: VideoCapture,
    pub total_frames: u64,
    pub current_frame: u64,
}

impl VideoReader {
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        Ok(Some(mat_to_frame(&mat, self.current_frame)?))
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.read_frame()
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

/// Convert a decoded BGR mat into an RGB frame. Dimensions come from the mat
/// itself; container headers are allowed to lie about them.
fn mat_to_frame(mat: &Mat, index: u64) -> Result<Frame> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

    Ok(Frame {
        data: rgb_mat.data_bytes()?.to_vec(),
        width: rgb_mat.cols() as usize,
        height: rgb_mat.rows() as usize,
        index,
    })
}

/// Decode a still image into an RGB frame. A missing or unreadable file is
/// a `DecodeFailure`, which aborts the whole job by policy.
pub fn decode_image(path: &Path) -> JobResult<Frame> {
    let mat = imgcodecs::imread(
        path.to_str().unwrap_or_default(),
        imgcodecs::IMREAD_COLOR,
    )
    .map_err(|e| JobError::DecodeFailure(format!("{}: {}", path.display(), e)))?;

    if mat.empty() {
        return Err(JobError::DecodeFailure(path.display().to_string()));
    }

    mat_to_frame(&mat, 0).map_err(JobError::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_mat_to_frame_uses_decoded_dimensions() {
        // Solid blue in BGR; dimensions must come from the mat, not metadata.
        let mat = Mat::new_rows_cols_with_default(6, 5, CV_8UC3, Scalar::new(255.0, 0.0, 0.0, 0.0))
            .unwrap();

        let frame = mat_to_frame(&mat, 3).unwrap();
        assert_eq!(frame.width, 5);
        assert_eq!(frame.height, 6);
        assert_eq!(frame.index, 3);
        assert_eq!(frame.data.len(), 5 * 6 * 3);
        assert_eq!(&frame.data[..3], &[0, 0, 255]);
    }
}
