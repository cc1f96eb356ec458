//! Annotation helpers shared by the built-in plugins. All coordinates are pixels.

use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use crate::plugin::{BoundingBox, LandmarkPoint};

pub const GREEN: (f64, f64, f64) = (0.0, 255.0, 0.0);
pub const RED: (f64, f64, f64) = (0.0, 0.0, 255.0);
pub const YELLOW: (f64, f64, f64) = (0.0, 255.0, 255.0);
pub const WHITE: (f64, f64, f64) = (255.0, 255.0, 255.0);

fn bgr(color: (f64, f64, f64)) -> Scalar {
    Scalar::new(color.0, color.1, color.2, 0.0)
}

pub fn draw_box(
    img: &mut Mat,
    bbox: &BoundingBox,
    color: (f64, f64, f64),
) -> opencv::Result<()> {
    let rect = Rect::new(
        bbox.origin_x.round() as i32,
        bbox.origin_y.round() as i32,
        bbox.width.round().max(1.0) as i32,
        bbox.height.round().max(1.0) as i32,
    );
    imgproc::rectangle(img, rect, bgr(color), 2, imgproc::LINE_8, 0)
}

/// Writes `text` just above `anchor`, clamped inside the image.
pub fn draw_label(
    img: &mut Mat,
    text: &str,
    anchor: Point,
    color: (f64, f64, f64),
) -> opencv::Result<()> {
    let origin = Point::new(anchor.x.max(0), (anchor.y - 6).max(14));
    imgproc::put_text(
        img,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        bgr(color),
        1,
        imgproc::LINE_AA,
        false,
    )
}

/// Draws normalized landmarks and the given index connections.
pub fn draw_landmarks(
    img: &mut Mat,
    points: &[LandmarkPoint],
    connections: &[(usize, usize)],
    color: (f64, f64, f64),
) -> opencv::Result<()> {
    let (w, h) = (img.cols() as f32, img.rows() as f32);
    let to_pixel = |p: &LandmarkPoint| Point::new((p.x * w).round() as i32, (p.y * h).round() as i32);

    for &(a, b) in connections {
        if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
            imgproc::line(img, to_pixel(pa), to_pixel(pb), bgr(WHITE), 1, imgproc::LINE_AA, 0)?;
        }
    }

    let radius = if points.len() > 100 { 1 } else { 3 };
    for p in points {
        imgproc::circle(img, to_pixel(p), radius, bgr(color), -1, imgproc::LINE_AA, 0)?;
    }
    Ok(())
}
