//! Frame annotation: colour-coded boxes and label overlays.
//!
//! Each classified region gets a hollow box and a filled strip in the class
//! colour, with the label and confidence written into the strip using the
//! built-in 8x8 bitmap font.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageFormat, Rgb};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Serialize;

use crate::detector::Frame;
use crate::error::Result;
use crate::model::{BoundingBox, FaceLabel};

const BOX_THICKNESS: u32 = 2;
const GLYPH_SIZE: u32 = 8;
const TEXT_PADDING: u32 = 1;
const LABEL_STRIP_HEIGHT: u32 = GLYPH_SIZE + 2 * TEXT_PADDING;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Overlay colour for a label.
pub fn label_color(label: FaceLabel) -> Rgb<u8> {
    match label {
        FaceLabel::Mask => Rgb([255, 0, 0]),
        FaceLabel::Helmet => Rgb([255, 165, 0]),
        FaceLabel::Normal => Rgb([0, 255, 0]),
    }
}

/// Overlay text for a label, e.g. `with mask 92.0%`.
pub fn label_text(label: FaceLabel, confidence: f32) -> String {
    format!("{} {:.1}%", label, confidence * 100.0)
}

/// One drawn annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub bounding_box: BoundingBox,
    pub label: FaceLabel,
    pub confidence: f32,
    pub text: String,
    pub color: [u8; 3],
}

/// A frame with the annotations drawn onto it.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub camera_id: String,
    pub captured_at: DateTime<Utc>,
    pub image: Frame,
    pub overlays: Vec<Overlay>,
}

impl AnnotatedFrame {
    pub fn new(camera_id: &str, captured_at: DateTime<Utc>, image: Frame) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            captured_at,
            image,
            overlays: Vec::new(),
        }
    }

    /// Draw a box and a labelled strip for one classified region.
    ///
    /// Text that does not fit the box width is cut off.
    pub fn annotate(&mut self, bounding_box: BoundingBox, label: FaceLabel, confidence: f32) {
        let color = label_color(label);
        let text = label_text(label, confidence);
        draw_box(&mut self.image, bounding_box, color);
        if let Some(strip) = draw_label_strip(&mut self.image, bounding_box, color) {
            draw_text(&mut self.image, strip, &text);
        }
        self.overlays.push(Overlay {
            bounding_box,
            label,
            confidence,
            text,
            color: color.0,
        });
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        encode_jpeg(&self.image)
    }
}

pub fn encode_jpeg(image: &Frame) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}

fn rect(x: u32, y: u32, w: u32, h: u32) -> Rect {
    Rect::at(x as i32, y as i32).of_size(w, h)
}

fn draw_box(image: &mut Frame, bounding_box: BoundingBox, color: Rgb<u8>) {
    let Some(b) = bounding_box.clip_to(image.width(), image.height()) else {
        return;
    };
    for inset in 0..BOX_THICKNESS {
        let (w, h) = (b.w.saturating_sub(2 * inset), b.h.saturating_sub(2 * inset));
        if w == 0 || h == 0 {
            break;
        }
        draw_hollow_rect_mut(image, rect(b.x + inset, b.y + inset, w, h), color);
    }
}

/// Filled strip above the box, or inside its top edge when there is no
/// room above it. Returns the strip area.
fn draw_label_strip(
    image: &mut Frame,
    bounding_box: BoundingBox,
    color: Rgb<u8>,
) -> Option<BoundingBox> {
    let b = bounding_box.clip_to(image.width(), image.height())?;
    let height = LABEL_STRIP_HEIGHT.min(b.h);
    let top = if b.y >= height { b.y - height } else { b.y };
    draw_filled_rect_mut(image, rect(b.x, top, b.w, height), color);
    Some(BoundingBox::new(b.x, top, b.w, height))
}

/// Write `text` into `strip` with the 8x8 bitmap font, clipped to the strip.
fn draw_text(image: &mut Frame, strip: BoundingBox, text: &str) {
    let left = strip.x + TEXT_PADDING;
    let top = strip.y + TEXT_PADDING;
    let right = (strip.x + strip.w).min(image.width());
    let bottom = (strip.y + strip.h).min(image.height());

    for (index, ch) in text.chars().enumerate() {
        let origin = left + index as u32 * GLYPH_SIZE;
        if origin >= right {
            break;
        }
        let Some(glyph) = BASIC_FONTS.get(ch) else {
            continue;
        };
        for (row, bits) in glyph.iter().enumerate() {
            let y = top + row as u32;
            if y >= bottom {
                break;
            }
            for col in 0..GLYPH_SIZE {
                let x = origin + col;
                if x < right && bits & (1 << col) != 0 {
                    image.put_pixel(x, y, TEXT_COLOR);
                }
            }
        }
    }
}
