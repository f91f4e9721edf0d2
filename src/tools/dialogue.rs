use crate::json_extract::truncate_response;
use crate::llm::complete_json;
use crate::model::{BubbleType, Comic, Dialogue};
use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Writes title, per-panel dialogue, narration and sound effects.
pub struct GenerateDialogue;

#[async_trait]
impl Tool for GenerateDialogue {
    fn name(&self) -> &'static str {
        "generate_dialogue"
    }

    fn description(&self) -> &'static str {
        "Write the title, dialogue, narration and sound effects for each panel"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["genre", "tone", "storyContext"]
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
        if comic.panels.is_empty() || comic.characters.is_empty() {
            return Ok(json!({
                "success": false,
                "error": "Panels or characters not found. Generate them first.",
            }));
        }

        let genre = params.get("genre").and_then(|v| v.as_str());
        let tone = params.get("tone").and_then(|v| v.as_str());
        let user_prompt = dialogue_prompt(&comic, genre, tone);

        let (extracted, raw) = complete_json(
            ctx.llm.as_ref(),
            "You are a comic book dialogue writer. Respond with JSON only.",
            &user_prompt,
        )
        .await?;

        let items = match extracted.as_ref().and_then(|v| v.as_array()) {
            Some(items) if !items.is_empty() => items.clone(),
            _ => {
                return Ok(json!({
                    "success": false,
                    "error": "Failed to generate valid dialogue",
                    "rawResponse": truncate_response(&raw, 500),
                }));
            }
        };

        let mut updated = Vec::new();
        let mut comic_title: Option<String> = None;

        for item in &items {
            let panel_id = match item.get("panelId").and_then(|v| v.as_str()) {
                Some(id) if comic.panel(id).is_some() => id.to_string(),
                _ => continue,
            };
            let is_cover = panel_id == "panel1";

            if let Some(title) = item.get("title").and_then(|v| v.as_str()) {
                if is_cover && !title.trim().is_empty() {
                    ctx.store
                        .update_panel_field(&comic_id, &panel_id, "title", json!(title.trim()))?;
                    comic_title = Some(title.trim().to_string());
                }
            }

            // Cover convention: panel1 carries the title and no speech.
            let dialogue: Vec<Dialogue> = if is_cover {
                vec![]
            } else {
                item.get("dialogue")
                    .and_then(|v| v.as_array())
                    .map(|lines| {
                        lines
                            .iter()
                            .filter_map(|line| {
                                let text = line.get("text").and_then(|v| v.as_str())?.trim();
                                if text.is_empty() {
                                    return None;
                                }
                                let speaker = line
                                    .get("speaker")
                                    .or_else(|| line.get("speakerCharId"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("char_1");
                                let bubble_type = line
                                    .get("bubbleType")
                                    .and_then(|v| {
                                        serde_json::from_value::<BubbleType>(v.clone()).ok()
                                    })
                                    .unwrap_or_default();
                                Some((speaker.to_string(), text.to_string(), bubble_type))
                            })
                            .enumerate()
                            .map(|(i, (speaker, text, bubble_type))| Dialogue {
                                order_index: i as u32,
                                speaker_char_id: resolve_speaker(&comic, &speaker),
                                text,
                                bubble_type,
                                position: None,
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };
            ctx.store.update_panel_field(
                &comic_id,
                &panel_id,
                "dialogue",
                serde_json::to_value(&dialogue)?,
            )?;

            if let Some(narration) = item.get("narration").and_then(|v| v.as_str()) {
                if !narration.trim().is_empty() {
                    ctx.store.update_panel_field(
                        &comic_id,
                        &panel_id,
                        "narration",
                        json!(narration.trim()),
                    )?;
                }
            }

            if let Some(effects) = item.get("soundEffects").and_then(|v| v.as_array()) {
                let effects: Vec<String> = effects
                    .iter()
                    .filter_map(|e| e.as_str().map(|s| s.to_string()))
                    .collect();
                if !effects.is_empty() {
                    ctx.store.update_panel_field(
                        &comic_id,
                        &panel_id,
                        "soundEffects",
                        json!(effects),
                    )?;
                }
            }

            updated.push(panel_id);
        }

        log::info!("Wrote dialogue for {} panels of {}", updated.len(), comic_id);

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "panelsUpdated": updated,
            "title": comic_title,
        }))
    }
}

/// Map a speaker name or id from the model to a stable charId.
fn resolve_speaker(comic: &Comic, speaker: &str) -> String {
    if comic.character(speaker).is_some() {
        return speaker.to_string();
    }
    comic
        .characters
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(speaker))
        .map(|c| c.char_id.clone())
        .unwrap_or_else(|| speaker.to_string())
}

fn dialogue_prompt(comic: &Comic, genre: Option<&str>, tone: Option<&str>) -> String {
    let cast: String = comic
        .characters
        .iter()
        .map(|c| format!("{} ({}): {}", c.char_id, c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let scenes: String = comic
        .panels
        .iter()
        .map(|p| format!("{}: {}", p.panel_id, p.description))
        .collect::<Vec<_>>()
        .join("\n");
    let mut tone_line = String::new();
    if let Some(g) = genre.or(comic.genre.as_deref()) {
        tone_line.push_str(&format!("Genre: {}.\n", g));
    }
    if let Some(t) = tone.or(comic.tone.as_deref()) {
        tone_line.push_str(&format!("Tone: {}.\n", t));
    }

    format!(
        "Write the text for this comic.\n{tone_line}Story: {story}\n\n\
         Characters:\n{cast}\n\nPanels:\n{scenes}\n\n\
         Return a JSON array with one object per panel:\n\
         - \"panelId\"\n\
         - \"title\": panel1 only; it is the cover and gets the comic's title \
         and no dialogue\n\
         - \"dialogue\": array of {{\"speaker\": charId, \"text\", \
         \"bubbleType\": one of speech|thought|shout|whisper}}; 0-3 short lines \
         per panel\n\
         - \"narration\": optional caption, used sparingly\n\
         - \"soundEffects\": optional array of onomatopoeia\n\n\
         Respond with the JSON array only.",
        tone_line = tone_line,
        story = comic.story_context,
        cast = cast,
        scenes = scenes,
    )
}
