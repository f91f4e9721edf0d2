use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Direct field edits on a panel or character, returning old and new
/// values so the agent can describe the change.
pub struct EditContent;

#[async_trait]
impl Tool for EditContent {
    fn name(&self) -> &'static str {
        "edit_content"
    }

    fn description(&self) -> &'static str {
        "Edit a single field of a panel or character"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["targetType", "targetId", "field", "value"]
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

        let target_type = params["targetType"].as_str().unwrap_or_default();
        let target_id = params["targetId"].as_str().unwrap_or_default();
        let field = params["field"].as_str().unwrap_or_default();
        let value = params["value"].clone();

        let comic = ctx.store.get_comic(&comic_id)?;
        let old_value = match target_type {
            "panel" => match comic.panel(target_id) {
                Some(panel) => serde_json::to_value(panel)?
                    .get(field)
                    .cloned()
                    .unwrap_or(Value::Null),
                None => {
                    return Ok(json!({
                        "success": false,
                        "error": format!("Panel not found: {}", target_id),
                    }));
                }
            },
            "character" => match comic.character(target_id) {
                Some(character) => serde_json::to_value(character)?
                    .get(field)
                    .cloned()
                    .unwrap_or(Value::Null),
                None => {
                    return Ok(json!({
                        "success": false,
                        "error": format!("Character not found: {}", target_id),
                    }));
                }
            },
            other => {
                return Ok(json!({
                    "success": false,
                    "error": format!(
                        "Validation error: targetType must be 'panel' or 'character', got '{}'",
                        other
                    ),
                }));
            }
        };

        let update = match target_type {
            "panel" => ctx
                .store
                .update_panel_field(&comic_id, target_id, field, value.clone()),
            _ => ctx
                .store
                .update_character_field(&comic_id, target_id, field, value.clone()),
        };
        if let Err(e) = update {
            return Ok(json!({"success": false, "error": format!("{:#}", e)}));
        }

        log::info!("Edited {} {} field {}", target_type, target_id, field);

        Ok(json!({
            "success": true,
            "comicId": comic_id,
            "targetType": target_type,
            "targetId": target_id,
            "field": field,
            "oldValue": old_value,
            "newValue": value,
        }))
    }
}
