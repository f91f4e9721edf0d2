use crate::json_extract::extract_json;
use crate::llm::CompletionOptions;
use crate::model::{Panel, PlacementKind, Point, TextPlacement};
use crate::tools::{Tool, ToolContext};
use crate::util::{fetch_bytes, guess_mime};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Asks the vision model where each text element should sit on the
/// rendered panel image.
pub struct PlaceDialogue;

#[async_trait]
impl Tool for PlaceDialogue {
    fn name(&self) -> &'static str {
        "place_dialogue"
    }

    fn description(&self) -> &'static str {
        "Use the vision model to position titles, narration and speech bubbles on panel images"
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
            None => comic.panels.iter().filter(|p| p.has_text()).cloned().collect(),
        };

        let mut placed = Vec::new();
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
                    log::warn!("Could not fetch image for {}: {:#}", panel.panel_id, e);
                    skipped.push(json!({"id": panel.panel_id, "reason": format!("{:#}", e)}));
                    continue;
                }
            };

            let user_prompt = placement_prompt(&comic.characters, panel);
            let raw = ctx
                .llm
                .complete_vision(
                    "You are a comic lettering assistant. Respond with JSON only.",
                    &user_prompt,
                    &bytes,
                    guess_mime(&url),
                    CompletionOptions::default(),
                )
                .await;

            let parsed = match raw {
                Ok(text) => extract_json(&text),
                Err(e) => {
                    log::warn!("Vision call failed for {}: {:#}", panel.panel_id, e);
                    None
                }
            };

            let placements = normalize_placements(panel, parsed.as_ref());
            if placements.is_empty() {
                skipped.push(json!({"id": panel.panel_id, "reason": "no usable placements"}));
                continue;
            }

            ctx.store.update_panel_field(
                &comic_id,
                &panel.panel_id,
                "textPlacements",
                serde_json::to_value(&placements)?,
            )?;
            placed.push(panel.panel_id.clone());
        }

        log::info!(
            "Placed text on {} panels of {} ({} skipped)",
            placed.len(),
            comic_id,
            skipped.len()
        );

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "panelsPlaced": placed,
            "skipped": skipped,
        }))
    }
}

/// Convert the vision model's output into validated placements:
/// the title is pinned to (width/2, 30), narration loses any tail, and
/// readingOrder is rewritten dense from 1.
fn normalize_placements(panel: &Panel, parsed: Option<&Value>) -> Vec<TextPlacement> {
    let mut placements: Vec<TextPlacement> = parsed
        .and_then(|v| v.get("placements"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let kind: PlacementKind =
                        serde_json::from_value(item.get("type")?.clone()).ok()?;
                    let text = item.get("text")?.as_str()?.to_string();
                    let position = read_point(item.get("position"))?;
                    let tail = if kind == PlacementKind::Speech {
                        read_point(item.get("tail"))
                    } else {
                        None
                    };
                    Some(TextPlacement {
                        kind,
                        text,
                        position,
                        tail,
                        speaker: item
                            .get("speaker")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        reading_order: 0,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(title) = &panel.title {
        let forced = Point {
            x: (panel.image_width as f64 / 2.0).round(),
            y: 30.0,
        };
        match placements.iter_mut().find(|p| p.kind == PlacementKind::Title) {
            Some(existing) => {
                existing.position = forced;
                existing.tail = None;
            }
            None => placements.insert(
                0,
                TextPlacement {
                    kind: PlacementKind::Title,
                    text: title.clone(),
                    position: forced,
                    tail: None,
                    speaker: None,
                    reading_order: 0,
                },
            ),
        }
    }

    for (i, p) in placements.iter_mut().enumerate() {
        p.reading_order = i as u32 + 1;
    }
    placements
}

fn read_point(value: Option<&Value>) -> Option<Point> {
    let value = value?;
    Some(Point {
        x: value.get("x")?.as_f64()?,
        y: value.get("y")?.as_f64()?,
    })
}

fn placement_prompt(characters: &[crate::model::Character], panel: &Panel) -> String {
    let mut elements = Vec::new();
    if let Some(title) = &panel.title {
        elements.push(format!("- title: \"{}\"", title));
    }
    if let Some(narration) = &panel.narration {
        elements.push(format!("- narration: \"{}\"", narration));
    }
    for line in &panel.dialogue {
        let speaker = characters
            .iter()
            .find(|c| c.char_id == line.speaker_char_id)
            .map(|c| c.name.as_str())
            .unwrap_or(line.speaker_char_id.as_str());
        elements.push(format!(
            "- speech ({} as {}): \"{}\"",
            line.speaker_char_id, speaker, line.text
        ));
    }

    format!(
        "This comic panel image is {w}x{h} pixels.\nScene: {desc}\n\n\
         Place these text elements:\n{elements}\n\n\
         Return JSON: {{\"panelId\": \"{id}\", \"panelWidth\": {w}, \
         \"panelHeight\": {h}, \"placements\": [...]}}.\n\
         Each placement: {{\"type\": \"title\"|\"narration\"|\"speech\", \"text\", \
         \"position\": {{\"x\", \"y\"}} (top-left corner), \"tail\": {{\"x\", \"y\"}} \
         (speech only, at the speaker's mouth), \"speaker\", \"readingOrder\" \
         (sequential from 1)}}.\n\
         Rules: the title is centered horizontally near the top. Narration goes in \
         a corner or edge over a low-detail area and has no tail. Speech bubbles \
         must not cover faces; position is the bubble's top-left corner.",
        w = panel.image_width,
        h = panel.image_height,
        desc = panel.description,
        elements = elements.join("\n"),
        id = panel.panel_id,
    )
}
