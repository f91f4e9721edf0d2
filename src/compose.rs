use crate::layouts::{LayoutSlot, SlotAlign};
use crate::render;
use ab_glyph::FontVec;
use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

/// A4 at 150 dpi.
pub const PAGE_WIDTH: u32 = 1240;
pub const PAGE_HEIGHT: u32 = 1754;
pub const PAGE_MARGIN: u32 = 40;

pub const PANEL_BORDER_PX: i32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct PageConfig {
    pub width: u32,
    pub height: u32,
    pub margin: u32,
}

impl Default for PageConfig {
    fn default() -> Self {
        PageConfig {
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
            margin: PAGE_MARGIN,
        }
    }
}

impl PageConfig {
    pub fn usable_width(&self) -> f64 {
        (self.width - 2 * self.margin) as f64
    }

    pub fn usable_height(&self) -> f64 {
        (self.height - 2 * self.margin) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Parse a "W:H" aspect ratio into its two components.
pub fn parse_size(size: &str) -> Result<(f64, f64)> {
    let (w, h) = size
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid panel size '{}', expected W:H", size))?;
    let w: f64 = w.trim().parse().context("Invalid width in panel size")?;
    let h: f64 = h.trim().parse().context("Invalid height in panel size")?;
    if w <= 0.0 || h <= 0.0 {
        return Err(anyhow!("Panel size components must be positive: '{}'", size));
    }
    Ok((w, h))
}

/// Absolute pixel rectangle for a layout slot. Height comes from the
/// slot's fraction of the usable page height, width from the aspect
/// ratio, and x from the alignment plus any fractional offset.
pub fn calculate_panel_position(cfg: &PageConfig, slot: &LayoutSlot) -> Result<PanelPosition> {
    let usable_w = cfg.usable_width();
    let usable_h = cfg.usable_height();
    let (aspect_w, aspect_h) = parse_size(&slot.size)?;

    let height = slot.h * usable_h;
    let width = height * (aspect_w / aspect_h);
    let y = cfg.margin as f64 + slot.y * usable_h;
    let mut x = match slot.align {
        SlotAlign::Left => cfg.margin as f64,
        SlotAlign::Center => cfg.margin as f64 + (usable_w - width) / 2.0,
        SlotAlign::Right => cfg.margin as f64 + usable_w - width,
    };
    if let Some(offset) = slot.offset_x {
        x += offset * usable_w;
    }

    Ok(PanelPosition {
        x,
        y,
        width,
        height,
    })
}

/// Compose one page: white background, page border, each panel image
/// resized into its slot with a black border, missing images drawn as
/// gray placeholders. The footer needs a font and is skipped without one.
pub fn paint_page(
    cfg: &PageConfig,
    slots: &[LayoutSlot],
    images: &[Option<DynamicImage>],
    page_number: u32,
    font: Option<&FontVec>,
) -> Result<RgbaImage> {
    let mut page = RgbaImage::from_pixel(cfg.width, cfg.height, render::WHITE);

    draw_border(
        &mut page,
        0,
        0,
        cfg.width as i32,
        cfg.height as i32,
        PANEL_BORDER_PX,
        render::BLACK,
    );

    for (slot, image) in slots.iter().zip(images) {
        let pos = calculate_panel_position(cfg, slot)?;
        let (x, y) = (pos.x.round() as i32, pos.y.round() as i32);
        let (w, h) = (pos.width.round() as u32, pos.height.round() as u32);

        match image {
            Some(img) => {
                let resized = img.resize_exact(w, h, FilterType::Lanczos3).to_rgba8();
                imageops::overlay(&mut page, &resized, x as i64, y as i64);
            }
            None => {
                draw_filled_rect_mut(
                    &mut page,
                    Rect::at(x, y).of_size(w, h),
                    Rgba([220, 220, 220, 255]),
                );
            }
        }
        draw_border(&mut page, x, y, w as i32, h as i32, PANEL_BORDER_PX, render::BLACK);
    }

    if let Some(font) = font {
        let label = format!("Page {}", page_number);
        let scale = 24.0;
        let width = render::measure_text(font, scale, &label) as i32;
        render::draw_text_line(
            &mut page,
            font,
            scale,
            (cfg.width as i32 - width) / 2,
            cfg.height as i32 - cfg.margin as i32 + 6,
            render::BLACK,
            &label,
        );
    }

    Ok(page)
}

fn draw_border(img: &mut RgbaImage, x: i32, y: i32, w: i32, h: i32, px: i32, color: Rgba<u8>) {
    if w <= 0 || h <= 0 {
        return;
    }
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(w as u32, px as u32), color);
    draw_filled_rect_mut(
        img,
        Rect::at(x, y + h - px).of_size(w as u32, px as u32),
        color,
    );
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(px as u32, h as u32), color);
    draw_filled_rect_mut(
        img,
        Rect::at(x + w - px, y).of_size(px as u32, h as u32),
        color,
    );
}
