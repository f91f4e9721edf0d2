use crate::json_extract::truncate_response;
use crate::layouts::{camera_angle_for, resolve_layout, DEFAULT_PANEL_HEIGHT, DEFAULT_PANEL_WIDTH};
use crate::llm::complete_json;
use crate::model::{ComicStatus, Panel, PANEL_STYLE_SUFFIX};
use crate::store::NewComic;
use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_CONTEXT_REFS: usize = 4;

/// Generates panel descriptions for the whole comic and creates the
/// comic document on first use.
pub struct GeneratePanels;

#[async_trait]
impl Tool for GeneratePanels {
    fn name(&self) -> &'static str {
        "generate_panels"
    }

    fn description(&self) -> &'static str {
        "Generate panel-by-panel scene descriptions for the story"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["storyContext"]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["genre", "tone", "pageCount", "title"]
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> Result<Value> {
        let story_context = params
            .get("storyContext")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let genre = params.get("genre").and_then(|v| v.as_str());
        let page_count = params
            .get("pageCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as u32;

        let layout = resolve_layout(page_count);
        let total = layout.total_panels() as usize;

        let angles: Vec<&str> = (0..total)
            .map(|i| camera_angle_for(layout.page_count, i).as_str())
            .collect();
        let user_prompt = panel_prompt(story_context, genre, total, &angles);

        let (extracted, raw) = complete_json(
            ctx.llm.as_ref(),
            "You are a comic book writer. Respond with JSON only.",
            &user_prompt,
        )
        .await?;

        let items = match extracted.as_ref().and_then(|v| v.as_array()) {
            Some(items) if items.len() >= total => items.clone(),
            _ => {
                return Ok(json!({
                    "success": false,
                    "error": "Failed to generate valid panel descriptions",
                    "rawResponse": truncate_response(&raw, 500),
                }));
            }
        };

        let mut panels = Vec::with_capacity(total);
        let mut slot_iter = layout
            .panels_per_page
            .iter()
            .enumerate()
            .flat_map(|(page_idx, count)| {
                (1..=*count).map(move |n| (page_idx as u32 + 1, n))
            });

        for (i, item) in items.iter().take(total).enumerate() {
            let panel_id = format!("panel{}", i + 1);
            let description = item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if description.is_empty() {
                return Ok(json!({
                    "success": false,
                    "error": "Failed to generate valid panel descriptions",
                    "rawResponse": truncate_response(&raw, 500),
                }));
            }

            // The suggested camera angle is always overwritten with the
            // positional table entry.
            let camera_angle = camera_angle_for(layout.page_count, i);

            let mut refs: Vec<String> = item
                .get("contextImageRefs")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|r| r.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            if i == 0 {
                for required in ["char_2", "char_1"] {
                    if !refs.iter().any(|r| r == required) {
                        refs.insert(0, required.to_string());
                    }
                }
            } else {
                let previous: Vec<String> =
                    (1..=i).map(|j| format!("panel{}", j)).collect();
                if !refs.iter().any(|r| previous.contains(r)) {
                    refs.insert(0, format!("panel{}", i));
                }
            }
            refs.truncate(MAX_CONTEXT_REFS);

            let prompt = format!(
                "{}, {} camera angle, {}",
                description,
                camera_angle.as_str(),
                PANEL_STYLE_SUFFIX
            );

            let (page_number, panel_number_on_page) = slot_iter
                .next()
                .unwrap_or((layout.page_count, 1));

            panels.push(Panel {
                panel_id,
                page_number,
                panel_number_on_page,
                description,
                camera_angle,
                image_width: DEFAULT_PANEL_WIDTH,
                image_height: DEFAULT_PANEL_HEIGHT,
                context_image_refs: refs,
                prompt,
                generated_image_url: None,
                external_image_id: None,
                title: None,
                narration: None,
                sound_effects: vec![],
                dialogue: vec![],
                text_placements: vec![],
                rendered_image_url: None,
            });
        }

        let comic_id = {
            let mut session = ctx.session.lock().await;
            match &session.comic_id {
                Some(id) => id.clone(),
                None => {
                    let comic = ctx.store.create_comic(NewComic {
                        title: params
                            .get("title")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Untitled Comic")
                            .to_string(),
                        genre: genre.map(|g| g.to_string()),
                        tone: params
                            .get("tone")
                            .and_then(|v| v.as_str())
                            .map(|t| t.to_string()),
                        story_context: story_context.to_string(),
                        target_page_count: layout.page_count,
                    })?;
                    session.comic_id = Some(comic.comic_id.clone());
                    comic.comic_id
                }
            }
        };

        ctx.store.replace_panels(&comic_id, panels.clone())?;
        ctx.store.set_status(&comic_id, ComicStatus::Generating)?;
        log::info!("Generated {} panels for comic {}", panels.len(), comic_id);

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "pageCount": layout.page_count,
            "panelCount": panels.len(),
            "panels": panels
                .iter()
                .map(|p| json!({
                    "panelId": p.panel_id,
                    "description": p.description,
                    "cameraAngle": p.camera_angle,
                    "contextImageRefs": p.context_image_refs,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

fn panel_prompt(story_context: &str, genre: Option<&str>, total: usize, angles: &[&str]) -> String {
    let genre_line = genre
        .map(|g| format!("Genre: {}.\n", g))
        .unwrap_or_default();
    format!(
        "Break the following story into exactly {total} comic panels.\n\
         {genre_line}Story: {story_context}\n\n\
         Return a JSON array of {total} objects, one per panel in order, each with:\n\
         - \"panelId\": \"panel1\" through \"panel{total}\"\n\
         - \"description\": 3-5 sentences describing the scene, characters present, \
         action and mood\n\
         - \"cameraAngle\": the angle for that position, in order: [{angles}]\n\
         - \"contextImageRefs\": ids of characters (char_1, char_2, ...) or earlier \
         panels (panel1, ...) that should visually anchor this panel; at most 4. \
         panel1 must reference char_1 and char_2; every later panel must reference \
         at least one earlier panel.\n\n\
         Respond with the JSON array only.",
        total = total,
        genre_line = genre_line,
        story_context = story_context,
        angles = angles.join(", "),
    )
}
