use crate::decision::simplify_prompt;
use crate::imagegen::{generate_and_wait, ContextImage, ContextKind, GenerationJob};
use crate::model::{Character, Panel};
use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::time::Duration;

const CHARACTER_SEED_BASE: i64 = 17000;
const CHARACTER_SEED_STEP: i64 = 17;
const PANEL_SEED_BASE: i64 = 18000;
const PANEL_SEED_STEP: i64 = 23;

const CHARACTER_DELAY: Duration = Duration::from_secs(2);
const PANEL_DELAY: Duration = Duration::from_secs(8);
const IN_TOOL_RETRY_DELAY: Duration = Duration::from_secs(5);

const MAX_CONTEXT_IMAGES: usize = 4;

/// Generates character sheets and panel images sequentially, chaining
/// provider-side image ids as context references for continuity.
pub struct GenerateImages;

#[async_trait]
impl Tool for GenerateImages {
    fn name(&self) -> &'static str {
        "generate_leonardo_images"
    }

    fn description(&self) -> &'static str {
        "Generate the actual images for characters and panels"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["generateType", "specificPanel"]
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

        let generate_type = params
            .get("generateType")
            .and_then(|v| v.as_str())
            .unwrap_or("both");
        let specific_panel = params.get("specificPanel").and_then(|v| v.as_str());
        let hints = RetryHints::from_params(params);

        let characters: Vec<Character> = if specific_panel.is_none()
            && matches!(generate_type, "characters" | "both")
        {
            comic.characters.clone()
        } else {
            vec![]
        };
        let panels: Vec<(usize, Panel)> = if matches!(generate_type, "panels" | "both") {
            match specific_panel {
                Some(id) => {
                    let Some(pos) = comic.panels.iter().position(|p| p.panel_id == id) else {
                        return Ok(json!({
                            "success": false,
                            "error": format!("Panel not found: {}", id),
                        }));
                    };
                    vec![(pos, comic.panels[pos].clone())]
                }
                None => comic.panels.clone().into_iter().enumerate().collect(),
            }
        } else {
            vec![]
        };

        let total = characters.len() + panels.len();
        if total == 0 {
            return Ok(json!({
                "success": false,
                "error": "Nothing to generate; run generate_panels and generate_characters first.",
            }));
        }

        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut generated = Map::new();
        let mut errors: Vec<Value> = Vec::new();

        for (i, character) in characters.iter().enumerate() {
            bar.set_message(format!("character {}", character.char_id));
            let seed = CHARACTER_SEED_BASE + CHARACTER_SEED_STEP * i as i64 + hints.seed_offset;
            let job = GenerationJob {
                prompt: hints.apply_prompt(&character.prompt),
                width: character.image_width,
                height: character.image_height,
                seed,
                context_images: vec![],
                style_id: ctx.config.image.style_id.clone(),
                model_id: ctx.config.image.model_id.clone(),
            };

            match generate_and_wait(ctx.imagegen.as_ref(), &job).await {
                Ok(image) => {
                    ctx.store.update_character_field(
                        &comic_id,
                        &character.char_id,
                        "generatedImageUrl",
                        json!(image.image_url),
                    )?;
                    ctx.store.update_character_field(
                        &comic_id,
                        &character.char_id,
                        "externalImageId",
                        json!(image.external_image_id),
                    )?;
                    let mut session = ctx.session.lock().await;
                    session
                        .context_map
                        .insert(character.char_id.clone(), image.external_image_id.clone());
                    generated.insert(character.char_id.clone(), json!(image.image_url));
                }
                Err(e) => {
                    log::warn!("Character {} failed: {:#}", character.char_id, e);
                    errors.push(json!({"id": character.char_id, "error": format!("{:#}", e)}));
                }
            }
            bar.inc(1);
            if i + 1 < characters.len() {
                tokio::time::sleep(CHARACTER_DELAY).await;
            }
        }

        let mut previous_external: Option<String> = None;
        for (loop_idx, (panel_index, panel)) in panels.iter().enumerate() {
            bar.set_message(format!("panel {}", panel.panel_id));
            let context_images = {
                let session = ctx.session.lock().await;
                build_context(
                    &panel.context_image_refs,
                    previous_external.as_deref(),
                    &session.context_map,
                    &hints,
                )
            };
            let seed =
                PANEL_SEED_BASE + PANEL_SEED_STEP * *panel_index as i64 + hints.seed_offset;
            let job = GenerationJob {
                prompt: hints.apply_prompt(&panel.prompt),
                width: panel.image_width,
                height: panel.image_height,
                seed,
                context_images,
                style_id: ctx.config.image.style_id.clone(),
                model_id: ctx.config.image.model_id.clone(),
            };

            let result = match generate_and_wait(ctx.imagegen.as_ref(), &job).await {
                Ok(image) => Ok(image),
                Err(first_error) => {
                    // One in-tool retry: new seed, context cut to one ref.
                    log::info!(
                        "Panel {} failed ({:#}); retrying once with reduced context",
                        panel.panel_id,
                        first_error
                    );
                    tokio::time::sleep(IN_TOOL_RETRY_DELAY).await;
                    let mut retry_job = job;
                    retry_job.seed += rand::rng().random_range(1..1000);
                    retry_job.context_images.truncate(1);
                    generate_and_wait(ctx.imagegen.as_ref(), &retry_job).await
                }
            };

            match result {
                Ok(image) => {
                    ctx.store.update_panel_field(
                        &comic_id,
                        &panel.panel_id,
                        "generatedImageUrl",
                        json!(image.image_url),
                    )?;
                    ctx.store.update_panel_field(
                        &comic_id,
                        &panel.panel_id,
                        "externalImageId",
                        json!(image.external_image_id),
                    )?;
                    let mut session = ctx.session.lock().await;
                    session
                        .context_map
                        .insert(panel.panel_id.clone(), image.external_image_id.clone());
                    generated.insert(panel.panel_id.clone(), json!(image.image_url));
                    previous_external = Some(image.external_image_id);

                    if loop_idx + 1 < panels.len() {
                        tokio::time::sleep(PANEL_DELAY).await;
                    }
                }
                Err(e) => {
                    log::warn!("Panel {} failed after in-tool retry: {:#}", panel.panel_id, e);
                    errors.push(json!({"id": panel.panel_id, "error": format!("{:#}", e)}));
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        {
            let mut session = ctx.session.lock().await;
            for (id, url) in &generated {
                if let Some(url) = url.as_str() {
                    session.last_source_map.insert(id.clone(), url.to_string());
                }
            }
        }

        let failed = errors.len();
        Ok(json!({
            "success": failed == 0,
            "comicId": comic_id,
            "generated": Value::Object(generated),
            "errors": errors,
            "summary": {
                "total": total,
                "succeeded": total - failed,
                "failed": failed,
            },
        }))
    }
}

/// Modifications injected by the registry's retry strategies.
struct RetryHints {
    seed_offset: i64,
    reduce_context: bool,
    clear_context: bool,
    simplify: bool,
}

impl RetryHints {
    fn from_params(params: &Value) -> Self {
        Self {
            seed_offset: params.get("seedOffset").and_then(|v| v.as_i64()).unwrap_or(0),
            reduce_context: params
                .get("reduceContext")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            clear_context: params
                .get("clearContext")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            simplify: params
                .get("simplifyPrompt")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }

    fn apply_prompt(&self, prompt: &str) -> String {
        if self.simplify {
            simplify_prompt(prompt)
        } else {
            prompt.to_string()
        }
    }
}

/// Resolve a panel's context references against the session map, always
/// prepending the previous panel's external id, capped at 4.
fn build_context(
    refs: &[String],
    previous_external: Option<&str>,
    context_map: &std::collections::HashMap<String, String>,
    hints: &RetryHints,
) -> Vec<ContextImage> {
    if hints.clear_context {
        return vec![];
    }

    let mut ids: Vec<String> = Vec::new();
    if let Some(prev) = previous_external {
        ids.push(prev.to_string());
    }
    for r in refs {
        if let Some(ext) = context_map.get(r) {
            if !ids.contains(ext) {
                ids.push(ext.clone());
            }
        }
    }
    ids.truncate(MAX_CONTEXT_IMAGES);
    if hints.reduce_context {
        ids.truncate(2);
    }

    ids.into_iter()
        .map(|id| ContextImage {
            kind: ContextKind::Generated,
            id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layouts::{DEFAULT_PANEL_HEIGHT, DEFAULT_PANEL_WIDTH};
    use crate::model::CameraAngle;
    use crate::store::NewComic;
    use crate::tools::testutil;

    fn panel(i: usize) -> Panel {
        Panel {
            panel_id: format!("panel{}", i),
            page_number: 1,
            panel_number_on_page: i as u32,
            description: format!("Scene {}", i),
            camera_angle: CameraAngle::EstablishingShot,
            image_width: DEFAULT_PANEL_WIDTH,
            image_height: DEFAULT_PANEL_HEIGHT,
            context_image_refs: if i == 1 {
                vec!["char_1".to_string(), "char_2".to_string()]
            } else {
                vec![format!("panel{}", i - 1)]
            },
            prompt: format!("Scene {} prompt", i),
            generated_image_url: None,
            external_image_id: None,
            title: None,
            narration: None,
            sound_effects: vec![],
            dialogue: vec![],
            text_placements: vec![],
            rendered_image_url: None,
        }
    }

    fn character(i: usize) -> Character {
        Character {
            char_id: format!("char_{}", i),
            name: format!("Char {}", i),
            description: "a chef".to_string(),
            image_width: 832,
            image_height: 1248,
            context_image_refs: vec![],
            prompt: format!("Character {} prompt", i),
            generated_image_url: None,
            external_image_id: None,
        }
    }

    async fn seed(h: &testutil::TestHarness, panel_count: usize) -> String {
        let comic = h
            .ctx
            .store
            .create_comic(NewComic {
                title: "T".to_string(),
                genre: None,
                tone: None,
                story_context: "chefs".to_string(),
                target_page_count: 3,
            })
            .unwrap();
        h.ctx
            .store
            .replace_characters(&comic.comic_id, vec![character(1), character(2)])
            .unwrap();
        h.ctx
            .store
            .replace_panels(&comic.comic_id, (1..=panel_count).map(panel).collect())
            .unwrap();
        h.ctx.session.lock().await.comic_id = Some(comic.comic_id.clone());
        comic.comic_id
    }

    #[tokio::test(start_paused = true)]
    async fn test_generates_characters_then_panels_with_context_chain() {
        let (_dir, h) = testutil::harness();
        let comic_id = seed(&h, 4).await;

        let out = GenerateImages
            .execute(&json!({"generateType": "both"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["summary"]["total"], 6);
        assert_eq!(out["summary"]["failed"], 0);

        let comic = h.ctx.store.get_comic(&comic_id).unwrap();
        assert!(comic.characters.iter().all(|c| c.generated_image_url.is_some()));
        assert!(comic.panels.iter().all(|p| p.external_image_id.is_some()));

        // Characters are submitted before panels.
        let prompts = h.imagegen.submitted_prompts.lock().unwrap().clone();
        assert_eq!(prompts[0], "Character 1 prompt");
        assert_eq!(prompts[1], "Character 2 prompt");
        assert_eq!(prompts[2], "Scene 1 prompt");

        // panel1 resolves char_1/char_2; panel2 gets the previous panel
        // prepended plus its own resolved ref (deduplicated).
        let counts = h.imagegen.submitted_context_counts.lock().unwrap().clone();
        assert_eq!(counts[0], 0);
        assert_eq!(counts[2], 2);
        assert!(counts[3] >= 1);

        // The source map feeds downstream tools.
        let session = h.ctx.session.lock().await;
        assert_eq!(session.last_source_map.len(), 6);
        assert!(session.context_map.contains_key("panel4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_continues_and_reports() {
        let (_dir, h) = testutil::harness();
        seed(&h, 5).await;
        // Fail both the first try and the in-tool retry for two panels.
        h.imagegen.fail_while("Scene 3 prompt", 2);
        h.imagegen.fail_while("Scene 5 prompt", 2);

        let out = GenerateImages
            .execute(&json!({"generateType": "panels"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert_eq!(out["summary"]["total"], 5);
        assert_eq!(out["summary"]["failed"], 2);
        let failed_ids: Vec<&str> = out["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(failed_ids, vec!["panel3", "panel5"]);
        // 5 panels + 2 in-tool retries = 7 submissions.
        assert_eq!(h.imagegen.submitted_prompts.lock().unwrap().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_tool_retry_recovers_single_blip() {
        let (_dir, h) = testutil::harness();
        seed(&h, 3).await;
        h.imagegen.fail_while("Scene 2 prompt", 1);

        let out = GenerateImages
            .execute(&json!({"generateType": "panels"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["summary"]["failed"], 0);
        assert_eq!(h.imagegen.submitted_prompts.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_specific_panel_regenerates_only_that_panel() {
        let (_dir, h) = testutil::harness();
        let comic_id = seed(&h, 4).await;
        GenerateImages
            .execute(&json!({"generateType": "panels"}), &h.ctx)
            .await
            .unwrap();
        let before = h.ctx.store.get_comic(&comic_id).unwrap();
        let old_url = before.panel("panel3").unwrap().generated_image_url.clone();

        let out = GenerateImages
            .execute(&json!({"generateType": "panels", "specificPanel": "panel3"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["summary"]["total"], 1);

        let after = h.ctx.store.get_comic(&comic_id).unwrap();
        let new_url = after.panel("panel3").unwrap().generated_image_url.clone();
        assert!(new_url.is_some());
        assert_ne!(new_url, old_url);
        // Other panels untouched.
        assert_eq!(
            after.panel("panel2").unwrap().generated_image_url,
            before.panel("panel2").unwrap().generated_image_url
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_specific_panel() {
        let (_dir, h) = testutil::harness();
        seed(&h, 2).await;
        let out = GenerateImages
            .execute(&json!({"specificPanel": "panel99"}), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "Panel not found: panel99");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_context_hint_drops_references() {
        let (_dir, h) = testutil::harness();
        seed(&h, 2).await;
        GenerateImages
            .execute(
                &json!({"generateType": "panels", "clearContext": true, "simplifyPrompt": true}),
                &h.ctx,
            )
            .await
            .unwrap();
        let counts = h.imagegen.submitted_context_counts.lock().unwrap().clone();
        assert!(counts.iter().all(|c| *c == 0));
    }
}
