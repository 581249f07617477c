// src/imageops.rs

use crate::types::{BBox, Frame};
use anyhow::{anyhow, Result};

/// Crop the bbox region out of an RGB frame. Coordinates are clamped to the
/// image; an empty region yields an empty frame rather than an error.
pub fn crop_rgb(frame: &Frame, bbox: &BBox) -> Frame {
    let x1 = (bbox[0].max(0.0) as usize).min(frame.width);
    let y1 = (bbox[1].max(0.0) as usize).min(frame.height);
    let x2 = (bbox[2].max(0.0) as usize).min(frame.width);
    let y2 = (bbox[3].max(0.0) as usize).min(frame.height);

    let (w, h) = (x2.saturating_sub(x1), y2.saturating_sub(y1));
    let mut data = Vec::with_capacity(w * h * 3);
    for y in y1..y1 + h {
        let row_start = (y * frame.width + x1) * 3;
        data.extend_from_slice(&frame.data[row_start..row_start + w * 3]);
    }

    Frame {
        data,
        width: w,
        height: h,
        index: frame.index,
    }
}

pub fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    if src_w == 0 || src_h == 0 {
        return dst;
    }
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

/// Encode RGB frame data to JPEG bytes using the `image` crate.
pub fn encode_rgb_to_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};
    use std::io::Cursor;

    let expected_len = frame.width * frame.height * 3;
    if frame.data.len() < expected_len {
        return Err(anyhow!(
            "frame buffer too short: {} < {}",
            frame.data.len(),
            expected_len
        ));
    }

    let img: RgbImage = ImageBuffer::from_raw(
        frame.width as u32,
        frame.height as u32,
        frame.data[..expected_len].to_vec(),
    )
    .ok_or_else(|| anyhow!("invalid frame dimensions {}x{}", frame.width, frame.height))?;

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}
