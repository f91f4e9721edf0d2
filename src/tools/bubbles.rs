use crate::model::{Panel, PlacementKind, TextPlacement};
use crate::render::{
    self, draw_outlined_text_centered, draw_rounded_rect_with_border, draw_tail,
    draw_wrapped_centered, load_font, measure_text, wrap_text, NARRATION_BORDER_PX,
    NARRATION_CORNER_RADIUS, NARRATION_WRAP_WIDTH, SPEECH_BORDER_PX, SPEECH_CORNER_RADIUS,
    SPEECH_WRAP_WIDTH,
};
use crate::tools::{Tool, ToolContext};
use crate::util::fetch_bytes;
use ab_glyph::FontVec;
use anyhow::Result;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use serde_json::{json, Value};
use std::collections::HashMap;

const TITLE_SCALE: f32 = 48.0;
const NARRATION_SCALE: f32 = 22.0;
const SPEECH_SCALE: f32 = 24.0;
const BOX_PADDING: f32 = 16.0;

/// Draws titles, narration boxes and speech bubbles onto panel images
/// and uploads the result as `<panelId>_text`.
pub struct RenderBubbles;

#[async_trait]
impl Tool for RenderBubbles {
    fn name(&self) -> &'static str {
        "render_bubbles"
    }

    fn description(&self) -> &'static str {
        "Render the placed text (title, narration, speech bubbles) onto panel images"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["panelId", "sourceMap"]
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> Result<Value> {
        let comic_id = match ctx.current_comic_id().await {
            Some(id) => id,
            None => {
                return Ok(json!({
                    "success": false,
                    "error": "Comic not found. Generate panels first.",
                }));
            }
        };
        let comic = ctx.store.get_comic(&comic_id)?;

        let source_map: HashMap<String, String> = {
            let explicit: Option<HashMap<String, String>> = params
                .get("sourceMap")
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            match explicit {
                Some(map) => map,
                None => ctx.session.lock().await.last_source_map.clone(),
            }
        };

        let targets: Vec<Panel> = match params.get("panelId").and_then(|v| v.as_str()) {
            Some(id) => match comic.panel(id) {
                Some(p) => vec![p.clone()],
                None => {
                    return Ok(json!({
                        "success": false,
                        "error": format!("Panel not found: {}", id),
                    }));
                }
            },
            None => comic
                .panels
                .iter()
                .filter(|p| !p.text_placements.is_empty())
                .cloned()
                .collect(),
        };

        // Text needs a font; boxes and tails do not. Degrade rather
        // than fail when none of the candidates load.
        let font = match load_font(&ctx.config.font_paths) {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("{:#}; rendering bubbles without text", e);
                None
            }
        };

        let mut rendered = serde_json::Map::new();
        let mut skipped: Vec<Value> = Vec::new();

        for panel in &targets {
            let url = source_map
                .get(&panel.panel_id)
                .cloned()
                .or_else(|| panel.generated_image_url.clone());
            let Some(url) = url else {
                skipped.push(json!({"id": panel.panel_id, "reason": "no image available"}));
                continue;
            };
            let bytes = match fetch_bytes(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    skipped.push(json!({"id": panel.panel_id, "reason": format!("{:#}", e)}));
                    continue;
                }
            };

            // Placements are expressed in panel pixel space; normalize
            // the bitmap to it before drawing.
            let mut canvas = image::load_from_memory(&bytes)?
                .resize_exact(panel.image_width, panel.image_height, FilterType::Lanczos3)
                .to_rgba8();

            let mut placements = panel.text_placements.clone();
            placements.sort_by_key(|p| p.reading_order);
            for placement in &placements {
                draw_placement(&mut canvas, font.as_ref(), placement);
            }

            let mut encoded = Vec::new();
            DynamicImage::ImageRgba8(canvas)
                .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)?;

            let asset = ctx
                .uploader
                .upload(
                    &encoded,
                    &format!("{}_text", panel.panel_id),
                    &format!("{}/rendered", comic_id),
                    "png",
                )
                .await?;
            ctx.store.update_panel_field(
                &comic_id,
                &panel.panel_id,
                "renderedImageUrl",
                json!(asset.url),
            )?;
            rendered.insert(panel.panel_id.clone(), json!(asset.url));
        }

        // Downstream composition should pick up the rendered variants.
        {
            let mut session = ctx.session.lock().await;
            for (id, url) in &rendered {
                if let Some(url) = url.as_str() {
                    session.last_source_map.insert(id.clone(), url.to_string());
                }
            }
        }

        log::info!(
            "Rendered text onto {} panels of {} ({} skipped)",
            rendered.len(),
            comic_id,
            skipped.len()
        );

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "rendered": Value::Object(rendered),
            "skipped": skipped,
        }))
    }
}

fn draw_placement(canvas: &mut RgbaImage, font: Option<&FontVec>, placement: &TextPlacement) {
    let measure = |s: &str| match font {
        Some(f) => measure_text(f, scale_for(placement.kind), s),
        // Rough advance width so boxes still size sensibly fontless.
        None => s.len() as f32 * scale_for(placement.kind) * 0.5,
    };

    match placement.kind {
        PlacementKind::Title => {
            if let Some(font) = font {
                draw_outlined_text_centered(
                    canvas,
                    font,
                    TITLE_SCALE,
                    placement.position.x as i32,
                    placement.position.y as i32,
                    render::BLACK,
                    render::WHITE,
                    &placement.text,
                );
            }
        }
        PlacementKind::Narration => {
            let lines = wrap_text(&placement.text, NARRATION_WRAP_WIDTH, measure);
            let (w, h) = block_size(&lines, NARRATION_SCALE, &measure);
            let (x, y) = (placement.position.x as i32, placement.position.y as i32);
            draw_rounded_rect_with_border(
                canvas,
                x,
                y,
                w,
                h,
                NARRATION_CORNER_RADIUS,
                NARRATION_BORDER_PX,
                render::PARCHMENT,
                render::BLACK,
            );
            if let Some(font) = font {
                draw_wrapped_centered(
                    canvas,
                    font,
                    NARRATION_SCALE,
                    x + BOX_PADDING as i32,
                    y + BOX_PADDING as i32,
                    w - 2 * BOX_PADDING as i32,
                    render::BLACK,
                    &lines,
                );
            }
        }
        PlacementKind::Speech => {
            let lines = wrap_text(&placement.text, SPEECH_WRAP_WIDTH, measure);
            let (w, h) = block_size(&lines, SPEECH_SCALE, &measure);
            let (x, y) = (placement.position.x as i32, placement.position.y as i32);
            draw_rounded_rect_with_border(
                canvas,
                x,
                y,
                w,
                h,
                SPEECH_CORNER_RADIUS,
                SPEECH_BORDER_PX,
                render::WHITE,
                render::BLACK,
            );
            if let Some(tail) = &placement.tail {
                draw_tail(
                    canvas,
                    (x as f32, y as f32, w as f32, h as f32),
                    (tail.x as f32, tail.y as f32),
                    render::WHITE,
                    render::BLACK,
                    SPEECH_CORNER_RADIUS as f32,
                );
            }
            if let Some(font) = font {
                draw_wrapped_centered(
                    canvas,
                    font,
                    SPEECH_SCALE,
                    x + BOX_PADDING as i32,
                    y + BOX_PADDING as i32,
                    w - 2 * BOX_PADDING as i32,
                    render::BLACK,
                    &lines,
                );
            }
        }
    }
}

fn scale_for(kind: PlacementKind) -> f32 {
    match kind {
        PlacementKind::Title => TITLE_SCALE,
        PlacementKind::Narration => NARRATION_SCALE,
        PlacementKind::Speech => SPEECH_SCALE,
    }
}

fn block_size(lines: &[String], scale: f32, measure: &dyn Fn(&str) -> f32) -> (i32, i32) {
    let widest = lines.iter().map(|l| measure(l)).fold(0.0f32, f32::max);
    let line_height = scale * 1.25;
    let w = widest + 2.0 * BOX_PADDING;
    let h = lines.len().max(1) as f32 * line_height + 2.0 * BOX_PADDING;
    (w.ceil() as i32, h.ceil() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layouts::{DEFAULT_PANEL_HEIGHT, DEFAULT_PANEL_WIDTH};
    use crate::model::{CameraAngle, Point};
    use crate::store::NewComic;
    use crate::tools::testutil;

    fn panel_with_placements(id: &str, url: Option<String>) -> Panel {
        Panel {
            panel_id: id.to_string(),
            page_number: 1,
            panel_number_on_page: 1,
            description: "d".to_string(),
            camera_angle: CameraAngle::CloseUp,
            image_width: DEFAULT_PANEL_WIDTH,
            image_height: DEFAULT_PANEL_HEIGHT,
            context_image_refs: vec![],
            prompt: "p".to_string(),
            generated_image_url: url,
            external_image_id: None,
            title: None,
            narration: None,
            sound_effects: vec![],
            dialogue: vec![],
            text_placements: vec![
                TextPlacement {
                    kind: PlacementKind::Speech,
                    text: "Hold the pass tonight, whatever it costs us.".to_string(),
                    position: Point { x: 400.0, y: 80.0 },
                    tail: Some(Point { x: 520.0, y: 400.0 }),
                    speaker: Some("char_1".to_string()),
                    reading_order: 2,
                },
                TextPlacement {
                    kind: PlacementKind::Narration,
                    text: "Night service begins.".to_string(),
                    position: Point { x: 20.0, y: 20.0 },
                    tail: None,
                    speaker: None,
                    reading_order: 1,
                },
            ],
            rendered_image_url: None,
        }
    }

    async fn seed(h: &testutil::TestHarness, panels: Vec<Panel>) -> String {
        let comic = h
            .ctx
            .store
            .create_comic(NewComic {
                title: "T".to_string(),
                genre: None,
                tone: None,
                story_context: "s".to_string(),
                target_page_count: 3,
            })
            .unwrap();
        h.ctx.store.replace_panels(&comic.comic_id, panels).unwrap();
        h.ctx.session.lock().await.comic_id = Some(comic.comic_id.clone());
        comic.comic_id
    }

    #[tokio::test]
    async fn test_renders_and_uploads_text_image() {
        let (dir, h) = testutil::harness();
        let src = dir.path().join("src.png");
        testutil::tiny_png(&src);
        let comic_id = seed(
            &h,
            vec![panel_with_placements(
                "panel2",
                Some(src.to_string_lossy().to_string()),
            )],
        )
        .await;

        let out = RenderBubbles.execute(&json!({}), &h.ctx).await.unwrap();
        assert_eq!(out["success"], true);
        let rendered_url = out["rendered"]["panel2"].as_str().unwrap().to_string();
        assert!(rendered_url.ends_with("panel2_text.png"));

        let comic = h.ctx.store.get_comic(&comic_id).unwrap();
        assert_eq!(
            comic.panel("panel2").unwrap().rendered_image_url.as_deref(),
            Some(rendered_url.as_str())
        );

        // The uploaded file is a decodable PNG at panel dimensions with
        // the speech bubble drawn in.
        let bytes = std::fs::read(&rendered_url).unwrap();
        let img = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (DEFAULT_PANEL_WIDTH, DEFAULT_PANEL_HEIGHT));
        assert_eq!(*img.get_pixel(450, 120), render::WHITE);
        // Narration box interior is parchment.
        assert_eq!(*img.get_pixel(60, 50), render::PARCHMENT);

        // The session source map now points at the rendered variant.
        let session = h.ctx.session.lock().await;
        assert_eq!(session.last_source_map.get("panel2"), Some(&rendered_url));
    }

    #[tokio::test]
    async fn test_panels_without_image_are_skipped() {
        let (_dir, h) = testutil::harness();
        seed(&h, vec![panel_with_placements("panel1", None)]).await;

        let out = RenderBubbles.execute(&json!({}), &h.ctx).await.unwrap();
        assert_eq!(out["success"], true);
        assert!(out["rendered"].as_object().unwrap().is_empty());
        assert_eq!(out["skipped"][0]["id"], "panel1");
    }

    #[tokio::test]
    async fn test_unknown_panel_id() {
        let (_dir, h) = testutil::harness();
        seed(&h, vec![]).await;
        let out = RenderBubbles
            .execute(&json!({"panelId": "panel9"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "Panel not found: panel9");
    }
}
