//! Box overlay for annotated frames.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::result::FrameResult;

const LINE_WIDTH: u32 = 2;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draw every detection of `frame` onto `image`.
pub fn draw_detections(image: &mut RgbImage, frame: &FrameResult) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for det in frame.iter() {
        let left = (det.bbox.x.clamp(0.0, 1.0) * width as f32) as i32;
        let top = (det.bbox.y.clamp(0.0, 1.0) * height as f32) as i32;
        let box_w = (det.bbox.w.clamp(0.0, 1.0) * width as f32) as u32;
        let box_h = (det.bbox.h.clamp(0.0, 1.0) * height as f32) as u32;
        if box_w == 0 || box_h == 0 {
            continue;
        }
        let color = class_color(det.class_id);
        for inset in 0..LINE_WIDTH {
            let (w, h) = (box_w.saturating_sub(2 * inset), box_h.saturating_sub(2 * inset));
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(left + inset as i32, top + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

/// Encode an annotated frame as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("failed to encode annotated frame as JPEG")?;
    Ok(buf.into_inner())
}
