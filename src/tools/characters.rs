use crate::json_extract::truncate_response;
use crate::llm::complete_json;
use crate::model::{
    Character, CHARACTER_STYLE_SUFFIX, DEFAULT_CHARACTER_HEIGHT, DEFAULT_CHARACTER_WIDTH,
};
use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_CHARACTER_COUNT: usize = 2;

/// Designs the comic's cast from the existing panel descriptions.
pub struct GenerateCharacters;

#[async_trait]
impl Tool for GenerateCharacters {
    fn name(&self) -> &'static str {
        "generate_characters"
    }

    fn description(&self) -> &'static str {
        "Design the main characters based on the generated panels"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["characterCount", "genre", "tone"]
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

        let count = params
            .get("characterCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CHARACTER_COUNT as u64) as usize;

        let scene_summary: String = comic
            .panels
            .iter()
            .map(|p| format!("{}: {}", p.panel_id, p.description))
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = character_prompt(&comic.story_context, &scene_summary, count);

        let (extracted, raw) = complete_json(
            ctx.llm.as_ref(),
            "You are a comic book character designer. Respond with JSON only.",
            &user_prompt,
        )
        .await?;

        let items = match extracted.as_ref().and_then(|v| v.as_array()) {
            Some(items) if items.len() >= count => items.clone(),
            _ => {
                return Ok(json!({
                    "success": false,
                    "error": "Failed to generate valid character descriptions",
                    "rawResponse": truncate_response(&raw, 500),
                }));
            }
        };

        let mut characters = Vec::with_capacity(count);
        for (i, item) in items.iter().take(count).enumerate() {
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            let description = item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if name.is_empty() || description.is_empty() {
                return Ok(json!({
                    "success": false,
                    "error": "Failed to generate valid character descriptions",
                    "rawResponse": truncate_response(&raw, 500),
                }));
            }

            // Ids are assigned positionally regardless of the model's
            // output; downstream refs assume char_1..char_N.
            characters.push(Character {
                char_id: format!("char_{}", i + 1),
                name,
                prompt: format!("{}, {}", description, CHARACTER_STYLE_SUFFIX),
                description,
                image_width: DEFAULT_CHARACTER_WIDTH,
                image_height: DEFAULT_CHARACTER_HEIGHT,
                context_image_refs: vec![],
                generated_image_url: None,
                external_image_id: None,
            });
        }

        ctx.store.replace_characters(&comic_id, characters.clone())?;
        log::info!(
            "Generated {} characters for comic {}",
            characters.len(),
            comic_id
        );

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "characterCount": characters.len(),
            "characters": characters
                .iter()
                .map(|c| json!({
                    "charId": c.char_id,
                    "name": c.name,
                    "description": c.description,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

fn character_prompt(story_context: &str, scene_summary: &str, count: usize) -> String {
    format!(
        "Design exactly {count} main characters for this comic.\n\
         Story: {story}\n\nPanels:\n{scenes}\n\n\
         Return a JSON array of {count} objects, each with:\n\
         - \"id\": \"char_1\" through \"char_{count}\"\n\
         - \"name\": the character's name\n\
         - \"description\": a detailed visual description (appearance, clothing, \
         build, distinguishing features) suitable for an image generator\n\n\
         Respond with the JSON array only.",
        count = count,
        story = story_context,
        scenes = scene_summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil;

    async fn seed_comic(h: &testutil::TestHarness) -> String {
        let items: Vec<Value> = (1..=8)
            .map(|i| {
                json!({
                    "panelId": format!("panel{}", i),
                    "description": format!("Scene {} of the chef rivalry, plated under pressure.", i),
                })
            })
            .collect();
        h.llm.push_text(&serde_json::to_string(&items).unwrap());
        let out = crate::tools::panels::GeneratePanels
            .execute(&json!({"storyContext": "two rival chefs", "pageCount": 3}), &h.ctx)
            .await
            .unwrap();
        out["comicId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_generates_two_characters_with_stable_ids() {
        let (_dir, h) = testutil::harness();
        let comic_id = seed_comic(&h).await;
        h.llm.push_text(
            &json!([
                {"id": "char_1", "name": "Mara Voss", "description": "Tall chef with silver-streaked hair and a scarred forearm"},
                {"id": "char_2", "name": "Dorian Pike", "description": "Stocky chef with round glasses and an immaculate apron"}
            ])
            .to_string(),
        );

        let out = GenerateCharacters.execute(&json!({}), &h.ctx).await.unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["characterCount"], 2);

        let comic = h.ctx.store.get_comic(&comic_id).unwrap();
        assert_eq!(comic.characters.len(), 2);
        assert_eq!(comic.characters[0].char_id, "char_1");
        assert_eq!(comic.characters[1].char_id, "char_2");
        assert_eq!(comic.characters[0].image_width, 832);
        assert_eq!(comic.characters[0].image_height, 1248);
        assert!(comic.characters[0].prompt.ends_with(CHARACTER_STYLE_SUFFIX));
    }

    #[tokio::test]
    async fn test_requires_panels_first() {
        let (_dir, h) = testutil::harness();
        let out = GenerateCharacters.execute(&json!({}), &h.ctx).await.unwrap();
        assert_eq!(out["success"], false);
        assert!(out["error"].as_str().unwrap().contains("Generate panels first"));
    }

    #[tokio::test]
    async fn test_blank_name_is_a_validation_failure() {
        let (_dir, h) = testutil::harness();
        seed_comic(&h).await;
        h.llm.push_text(
            &json!([
                {"id": "char_1", "name": "  ", "description": "A chef"},
                {"id": "char_2", "name": "Dorian", "description": "Another chef"}
            ])
            .to_string(),
        );

        let out = GenerateCharacters.execute(&json!({}), &h.ctx).await.unwrap();
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "Failed to generate valid character descriptions");
    }
}
