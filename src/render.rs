use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_polygon_mut, draw_text_mut, text_size,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::fs;

pub const SPEECH_WRAP_WIDTH: f32 = 280.0;
pub const NARRATION_WRAP_WIDTH: f32 = 600.0;
pub const SPEECH_CORNER_RADIUS: i32 = 15;
pub const NARRATION_CORNER_RADIUS: i32 = 8;
pub const SPEECH_BORDER_PX: i32 = 4;
pub const NARRATION_BORDER_PX: i32 = 3;
pub const TAIL_BASE_WIDTH: f32 = 20.0;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const PARCHMENT: Rgba<u8> = Rgba([240, 230, 200, 255]);

/// Load the first readable font from the candidate list.
pub fn load_font(paths: &[String]) -> Result<FontVec> {
    for path in paths {
        if let Ok(bytes) = fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(bytes) {
                log::debug!("Loaded font {}", path);
                return Ok(font);
            }
        }
    }
    Err(anyhow!(
        "No usable font found; set COMIC_FONT_PATH to a TTF file"
    ))
}

pub fn measure_text(font: &FontVec, scale: f32, text: &str) -> f32 {
    let (w, _) = text_size(PxScale::from(scale), font, text);
    w as f32
}

/// Greedy word wrap against a pixel width, measured by `measure`. A
/// single overlong word occupies its own line rather than being split.
pub fn wrap_text(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if measure(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(current);
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

/// Side of the bubble rectangle closest to the tail target point.
pub fn nearest_side(x: f32, y: f32, w: f32, h: f32, px: f32, py: f32) -> Side {
    let top = (py - y).abs();
    let bottom = (py - (y + h)).abs();
    let left = (px - x).abs();
    let right = (px - (x + w)).abs();

    let mut side = Side::Top;
    let mut best = top;
    for (candidate, dist) in [
        (Side::Bottom, bottom),
        (Side::Left, left),
        (Side::Right, right),
    ] {
        if dist < best {
            best = dist;
            side = candidate;
        }
    }
    side
}

/// Endpoints of the tail triangle's base on the given bubble side,
/// centered on the tail target's projection and clamped inside the
/// rounded corners.
pub fn tail_base_points(
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    side: Side,
    tail_x: f32,
    tail_y: f32,
    base_width: f32,
    corner_radius: f32,
) -> ((f32, f32), (f32, f32)) {
    let half = base_width / 2.0;
    match side {
        Side::Top | Side::Bottom => {
            let edge_y = if side == Side::Top { y } else { y + h };
            let center = tail_x.clamp(x + corner_radius + half, x + w - corner_radius - half);
            ((center - half, edge_y), (center + half, edge_y))
        }
        Side::Left | Side::Right => {
            let edge_x = if side == Side::Left { x } else { x + w };
            let center = tail_y.clamp(y + corner_radius + half, y + h - corner_radius - half);
            ((edge_x, center - half), (edge_x, center + half))
        }
    }
}

/// Filled rounded rectangle: a cross of two rects plus corner discs.
pub fn draw_rounded_rect(img: &mut RgbaImage, x: i32, y: i32, w: i32, h: i32, radius: i32, fill: Rgba<u8>) {
    let r = radius.min(w / 2).min(h / 2).max(0);
    if w <= 0 || h <= 0 {
        return;
    }
    if h - 2 * r > 0 {
        draw_filled_rect_mut(
            img,
            Rect::at(x, y + r).of_size(w as u32, (h - 2 * r) as u32),
            fill,
        );
    }
    if w - 2 * r > 0 {
        draw_filled_rect_mut(
            img,
            Rect::at(x + r, y).of_size((w - 2 * r) as u32, h as u32),
            fill,
        );
    }
    if r > 0 {
        for (cx, cy) in [
            (x + r, y + r),
            (x + w - r - 1, y + r),
            (x + r, y + h - r - 1),
            (x + w - r - 1, y + h - r - 1),
        ] {
            draw_filled_circle_mut(img, (cx, cy), r, fill);
        }
    }
}

/// Rounded rectangle with a border: border-color shape, then the fill
/// shape inset by the border width.
pub fn draw_rounded_rect_with_border(
    img: &mut RgbaImage,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    radius: i32,
    border_px: i32,
    fill: Rgba<u8>,
    border: Rgba<u8>,
) {
    draw_rounded_rect(img, x, y, w, h, radius, border);
    draw_rounded_rect(
        img,
        x + border_px,
        y + border_px,
        w - 2 * border_px,
        h - 2 * border_px,
        (radius - border_px).max(0),
        fill,
    );
}

/// Speech-bubble tail: a border-color triangle from the nearest bubble
/// side to the apex, with a slightly inset fill triangle on top.
pub fn draw_tail(
    img: &mut RgbaImage,
    bubble: (f32, f32, f32, f32),
    tail: (f32, f32),
    fill: Rgba<u8>,
    border: Rgba<u8>,
    corner_radius: f32,
) {
    let (bx, by, bw, bh) = bubble;
    let (tx, ty) = tail;
    let side = nearest_side(bx, by, bw, bh, tx, ty);
    let (a, b) = tail_base_points(bx, by, bw, bh, side, tx, ty, TAIL_BASE_WIDTH, corner_radius);

    let tri = |p0: (f32, f32), p1: (f32, f32), p2: (f32, f32)| {
        let points = vec![
            Point::new(p0.0 as i32, p0.1 as i32),
            Point::new(p1.0 as i32, p1.1 as i32),
            Point::new(p2.0 as i32, p2.1 as i32),
        ];
        points
    };

    draw_polygon_mut(img, &tri(a, b, (tx, ty)), border);

    // Inset fill triangle: shrink the base and pull the apex toward it.
    let inset = 3.0;
    let (a_fill, b_fill) = match side {
        Side::Top | Side::Bottom => ((a.0 + inset, a.1), (b.0 - inset, b.1)),
        Side::Left | Side::Right => ((a.0, a.1 + inset), (b.0, b.1 - inset)),
    };
    let mid = ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0);
    let apex_fill = (
        tx + (mid.0 - tx) * 0.25,
        ty + (mid.1 - ty) * 0.25,
    );
    draw_polygon_mut(img, &tri(a_fill, b_fill, apex_fill), fill);
}

pub fn draw_text_line(
    img: &mut RgbaImage,
    font: &FontVec,
    scale: f32,
    x: i32,
    y: i32,
    color: Rgba<u8>,
    text: &str,
) {
    draw_text_mut(img, color, x, y, PxScale::from(scale), font, text);
}

/// Title text: fill color with a stroke approximated by offset passes.
pub fn draw_outlined_text_centered(
    img: &mut RgbaImage,
    font: &FontVec,
    scale: f32,
    center_x: i32,
    y: i32,
    fill: Rgba<u8>,
    stroke: Rgba<u8>,
    text: &str,
) {
    let width = measure_text(font, scale, text) as i32;
    let x = center_x - width / 2;
    for dx in -2i32..=2 {
        for dy in -2i32..=2 {
            if dx != 0 || dy != 0 {
                draw_text_mut(img, stroke, x + dx, y + dy, PxScale::from(scale), font, text);
            }
        }
    }
    draw_text_mut(img, fill, x, y, PxScale::from(scale), font, text);
}

/// Wrapped block of centered lines starting at (x, y); returns the block
/// height in pixels.
pub fn draw_wrapped_centered(
    img: &mut RgbaImage,
    font: &FontVec,
    scale: f32,
    x: i32,
    y: i32,
    block_width: i32,
    color: Rgba<u8>,
    lines: &[String],
) -> i32 {
    let line_height = (scale * 1.25) as i32;
    for (i, line) in lines.iter().enumerate() {
        let line_width = measure_text(font, scale, line) as i32;
        let line_x = x + (block_width - line_width) / 2;
        draw_text_line(img, font, scale, line_x, y + i as i32 * line_height, color, line);
    }
    lines.len() as i32 * line_height
}
