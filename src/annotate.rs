// src/annotate.rs

use crate::types::{DefectClass, Detection, Frame};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};

fn class_color(class: DefectClass) -> core::Scalar {
    match class {
        // BGR: persisting defects green, everything that changed red
        DefectClass::Old => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        DefectClass::New => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
        DefectClass::Resolved => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
    }
}

/// Convert an RGB frame into a drawable BGR Mat.
pub fn frame_to_bgr_mat(frame: &Frame) -> Result<Mat> {
    let mat = Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, frame.height as i32)?;

    let mut bgr = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Draw one classification's boxes with a `label [CLASS]` tag above each.
pub fn draw_defects(image: &mut Mat, defects: &[Detection], class: DefectClass) -> Result<()> {
    let color = class_color(class);

    for det in defects {
        let [x1, y1, x2, y2] = det.bbox;
        let rect = core::Rect::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1).max(0.0) as i32,
            (y2 - y1).max(0.0) as i32,
        );
        imgproc::rectangle(image, rect, color, 2, imgproc::LINE_8, 0)?;

        let text = format!("{} [{}]", det.label, class.as_str());
        imgproc::put_text(
            image,
            &text,
            core::Point::new(x1 as i32, (y1 as i32 - 10).max(10)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Scale both images to the smaller of the two heights, preserving aspect.
pub fn resize_to_same_height(img1: &Mat, img2: &Mat) -> Result<(Mat, Mat)> {
    let (h1, w1) = (img1.rows(), img1.cols());
    let (h2, w2) = (img2.rows(), img2.cols());
    let target = h1.min(h2).max(1);

    let mut out1 = Mat::default();
    let mut out2 = Mat::default();
    imgproc::resize(
        img1,
        &mut out1,
        Size::new((w1 as f64 * target as f64 / h1.max(1) as f64) as i32, target),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    imgproc::resize(
        img2,
        &mut out2,
        Size::new((w2 as f64 * target as f64 / h2.max(1) as f64) as i32, target),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok((out1, out2))
}

/// Entry and exit annotations composed side by side at a common height.
pub fn compose_side_by_side(entry: &Mat, exit: &Mat) -> Result<Mat> {
    let (entry, exit) = resize_to_same_height(entry, exit)?;
    let mut combined = Mat::default();
    core::hconcat2(&entry, &exit, &mut combined)?;
    Ok(combined)
}

pub fn encode_jpg(image: &Mat) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", image, &mut buf, &Vector::new())?;
    Ok(buf.to_vec())
}
