use crate::compose::{paint_page, PageConfig};
use crate::layouts::{auto_detect_layout, resolve_layout, Layout};
use crate::model::{ComicStatus, Panel};
use crate::render::load_font;
use crate::tools::{Tool, ToolContext};
use crate::util::fetch_bytes;
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Composes the finished panels onto A4 pages and uploads `page_N`.
pub struct ComposePages;

#[async_trait]
impl Tool for ComposePages {
    fn name(&self) -> &'static str {
        "compose_pages"
    }

    fn description(&self) -> &'static str {
        "Arrange the rendered panels onto A4 pages and upload the page images"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["sourceMap", "pageCount", "useTextImages"]
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
        if comic.panels.is_empty() {
            return Ok(json!({
                "success": false,
                "error": "Panels not found. Generate panels first.",
            }));
        }

        let source_map: HashMap<String, String> = {
            let explicit: Option<HashMap<String, String>> = params
                .get("sourceMap")
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            match explicit {
                Some(map) => map,
                None => ctx.session.lock().await.last_source_map.clone(),
            }
        };
        let use_text_images = params
            .get("useTextImages")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let layout: Layout = match params.get("pageCount").and_then(|v| v.as_u64()) {
            Some(pc) => resolve_layout(pc as u32),
            None => auto_detect_layout(comic.panels.len() as u32),
        };

        let font = match load_font(&ctx.config.font_paths) {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("{:#}; composing pages without footer text", e);
                None
            }
        };

        let cfg = PageConfig::default();
        let mut pages = Vec::new();
        let mut panel_cursor = 0usize;

        for (page_idx, slots) in layout.pages.iter().enumerate() {
            let page_number = page_idx as u32 + 1;
            let page_panels: Vec<&Panel> = comic
                .panels
                .iter()
                .skip(panel_cursor)
                .take(slots.len())
                .collect();
            panel_cursor += page_panels.len();

            let mut images: Vec<Option<DynamicImage>> = Vec::with_capacity(page_panels.len());
            for panel in &page_panels {
                let url = panel_url(panel, &source_map, use_text_images);
                let image = match url {
                    Some(url) => match fetch_bytes(&url).await {
                        Ok(bytes) => image::load_from_memory(&bytes).ok(),
                        Err(e) => {
                            log::warn!("Could not fetch {} for page {}: {:#}", panel.panel_id, page_number, e);
                            None
                        }
                    },
                    None => None,
                };
                images.push(image);
            }

            let page = paint_page(&cfg, slots, &images, page_number, font.as_ref())?;
            let mut encoded = Vec::new();
            DynamicImage::ImageRgba8(page)
                .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)?;

            let asset = ctx
                .uploader
                .upload(
                    &encoded,
                    &format!("page_{}", page_number),
                    &format!("{}/pages", comic_id),
                    "png",
                )
                .await?;
            pages.push(json!({"page": page_number, "url": asset.url}));
        }

        ctx.store.set_status(&comic_id, ComicStatus::Completed)?;
        log::info!(
            "Composed {} pages for comic {} using layout {}",
            pages.len(),
            comic_id,
            layout.name
        );

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "layout": layout.name,
            "pages": pages,
        }))
    }
}

/// URL preference: explicit sourceMap, then the bubble-rendered image
/// when requested, then the raw generated image.
fn panel_url(
    panel: &Panel,
    source_map: &HashMap<String, String>,
    use_text_images: bool,
) -> Option<String> {
    if let Some(url) = source_map.get(&panel.panel_id) {
        return Some(url.clone());
    }
    if use_text_images {
        if let Some(url) = &panel.rendered_image_url {
            return Some(url.clone());
        }
    }
    panel.generated_image_url.clone()
}
