use crate::model::{
    Character, Comic, ComicStatus, Dialogue, Panel, TextPlacement, MUTABLE_CHARACTER_FIELDS,
    MUTABLE_PANEL_FIELDS,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct NewComic {
    pub title: String,
    pub genre: Option<String>,
    pub tone: Option<String>,
    pub story_context: String,
    pub target_page_count: u32,
}

/// Single source of truth for comic documents. One JSON file per comic
/// under `<dir>/<comicId>.json`; every mutation is write-through, there
/// is no cache beyond the current operation.
#[derive(Debug)]
pub struct ComicStore {
    dir: PathBuf,
}

impl ComicStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = data_dir.into().join("comics");
        fs::create_dir_all(&dir).context("Failed to create comic store directory")?;
        Ok(Self { dir })
    }

    fn path(&self, comic_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", comic_id))
    }

    pub fn create_comic(&self, input: NewComic) -> Result<Comic> {
        let now = Utc::now();
        let comic = Comic {
            comic_id: format!("comic_{}", uuid::Uuid::new_v4().simple()),
            title: input.title,
            genre: input.genre,
            tone: input.tone,
            story_context: input.story_context,
            target_page_count: input.target_page_count,
            status: ComicStatus::Draft,
            created_at: now,
            updated_at: now,
            characters: vec![],
            panels: vec![],
        };
        self.save(&comic)?;
        Ok(comic)
    }

    pub fn get_comic(&self, comic_id: &str) -> Result<Comic> {
        let path = self.path(comic_id);
        if !path.exists() {
            bail!("Comic not found: {}", comic_id);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read comic document {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse comic document {:?}", path))
    }

    fn save(&self, comic: &Comic) -> Result<()> {
        let content = serde_json::to_string_pretty(comic)?;
        fs::write(self.path(&comic.comic_id), content)
            .with_context(|| format!("Failed to write comic {}", comic.comic_id))
    }

    fn mutate(&self, comic_id: &str, f: impl FnOnce(&mut Comic) -> Result<()>) -> Result<()> {
        let mut comic = self.get_comic(comic_id)?;
        f(&mut comic)?;
        comic.updated_at = Utc::now();
        self.save(&comic)
    }

    /// Bulk upsert by stable character id, preserving list order of the
    /// incoming batch.
    pub fn replace_characters(&self, comic_id: &str, characters: Vec<Character>) -> Result<()> {
        self.mutate(comic_id, |comic| {
            comic.characters = characters;
            Ok(())
        })
    }

    /// Bulk upsert by stable panel id.
    pub fn replace_panels(&self, comic_id: &str, panels: Vec<Panel>) -> Result<()> {
        self.mutate(comic_id, |comic| {
            comic.panels = panels;
            Ok(())
        })
    }

    pub fn set_status(&self, comic_id: &str, status: ComicStatus) -> Result<()> {
        self.mutate(comic_id, |comic| {
            comic.status = status;
            Ok(())
        })
    }

    pub fn update_panel_field(
        &self,
        comic_id: &str,
        panel_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        if !MUTABLE_PANEL_FIELDS.contains(&field) {
            bail!("Validation error: '{}' is not a mutable panel field", field);
        }
        self.mutate(comic_id, |comic| {
            let panel = comic
                .panels
                .iter_mut()
                .find(|p| p.panel_id == panel_id)
                .ok_or_else(|| anyhow!("Panel not found: {}", panel_id))?;
            apply_panel_field(panel, field, value)
        })
    }

    pub fn update_character_field(
        &self,
        comic_id: &str,
        char_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        if !MUTABLE_CHARACTER_FIELDS.contains(&field) {
            bail!("Validation error: '{}' is not a mutable character field", field);
        }
        self.mutate(comic_id, |comic| {
            let character = comic
                .characters
                .iter_mut()
                .find(|c| c.char_id == char_id)
                .ok_or_else(|| anyhow!("Character not found: {}", char_id))?;
            apply_character_field(character, field, value)
        })
    }

    /// The only deletion: whole-comic, cascading everything in the
    /// document.
    pub fn delete_comic(&self, comic_id: &str) -> Result<()> {
        let path = self.path(comic_id);
        if !path.exists() {
            bail!("Comic not found: {}", comic_id);
        }
        fs::remove_file(path).with_context(|| format!("Failed to delete comic {}", comic_id))
    }
}

fn parse<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .with_context(|| format!("Validation error: bad value for field '{}'", field))
}

fn apply_panel_field(panel: &mut Panel, field: &str, value: Value) -> Result<()> {
    match field {
        "description" => panel.description = parse(field, value)?,
        "prompt" => panel.prompt = parse(field, value)?,
        "cameraAngle" => panel.camera_angle = parse(field, value)?,
        "contextImageRefs" => {
            let refs: Vec<String> = parse(field, value)?;
            if refs.len() > 4 {
                bail!("Validation error: contextImageRefs is capped at 4 entries");
            }
            panel.context_image_refs = refs;
        }
        "generatedImageUrl" => panel.generated_image_url = parse(field, value)?,
        "externalImageId" => panel.external_image_id = parse(field, value)?,
        "dialogue" => {
            let dialogue: Vec<Dialogue> = parse(field, value)?;
            validate_dialogue_order(&dialogue)?;
            panel.dialogue = dialogue;
        }
        "title" => panel.title = parse(field, value)?,
        "narration" => panel.narration = parse(field, value)?,
        "soundEffects" => panel.sound_effects = parse(field, value)?,
        "textPlacements" => {
            let placements: Vec<TextPlacement> = parse(field, value)?;
            panel.text_placements = placements;
        }
        "renderedImageUrl" => panel.rendered_image_url = parse(field, value)?,
        _ => unreachable!("field checked against MUTABLE_PANEL_FIELDS"),
    }
    Ok(())
}

fn apply_character_field(character: &mut Character, field: &str, value: Value) -> Result<()> {
    match field {
        "name" => character.name = parse(field, value)?,
        "description" => character.description = parse(field, value)?,
        "prompt" => character.prompt = parse(field, value)?,
        "contextImageRefs" => character.context_image_refs = parse(field, value)?,
        "generatedImageUrl" => character.generated_image_url = parse(field, value)?,
        "externalImageId" => character.external_image_id = parse(field, value)?,
        _ => unreachable!("field checked against MUTABLE_CHARACTER_FIELDS"),
    }
    Ok(())
}

/// order_index must be unique, dense and start at 0.
fn validate_dialogue_order(dialogue: &[Dialogue]) -> Result<()> {
    let mut indexes: Vec<u32> = dialogue.iter().map(|d| d.order_index).collect();
    indexes.sort_unstable();
    for (expected, actual) in indexes.iter().enumerate() {
        if *actual != expected as u32 {
            bail!("Validation error: dialogue orderIndex must be dense starting at 0");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BubbleType, CameraAngle};
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ComicStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ComicStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn sample_panel(id: &str) -> Panel {
        Panel {
            panel_id: id.to_string(),
            page_number: 1,
            panel_number_on_page: 1,
            description: "A quiet rooftop at dawn".to_string(),
            camera_angle: CameraAngle::EstablishingShot,
            image_width: 1456,
            image_height: 720,
            context_image_refs: vec![],
            prompt: "A quiet rooftop at dawn, establishing-shot camera angle".to_string(),
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

    fn create(store: &ComicStore) -> Comic {
        store
            .create_comic(NewComic {
                title: "Test Comic".to_string(),
                genre: Some("drama".to_string()),
                tone: None,
                story_context: "two rival chefs".to_string(),
                target_page_count: 3,
            })
            .unwrap()
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let (_dir, store) = store();
        let comic = create(&store);
        let loaded = store.get_comic(&comic.comic_id).unwrap();
        assert_eq!(loaded.title, "Test Comic");
        assert_eq!(loaded.status, ComicStatus::Draft);
        assert!(loaded.panels.is_empty());
    }

    #[test]
    fn test_get_unknown_comic_is_not_found() {
        let (_dir, store) = store();
        let err = store.get_comic("comic_missing").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_update_panel_field_roundtrip() {
        let (_dir, store) = store();
        let comic = create(&store);
        store
            .replace_panels(&comic.comic_id, vec![sample_panel("panel1")])
            .unwrap();

        store
            .update_panel_field(
                &comic.comic_id,
                "panel1",
                "generatedImageUrl",
                json!("https://cdn/p1.png"),
            )
            .unwrap();

        let loaded = store.get_comic(&comic.comic_id).unwrap();
        assert_eq!(
            loaded.panel("panel1").unwrap().generated_image_url.as_deref(),
            Some("https://cdn/p1.png")
        );
    }

    #[test]
    fn test_update_unknown_field_is_validation_error() {
        let (_dir, store) = store();
        let comic = create(&store);
        store
            .replace_panels(&comic.comic_id, vec![sample_panel("panel1")])
            .unwrap();
        let err = store
            .update_panel_field(&comic.comic_id, "panel1", "panelId", json!("panel9"))
            .unwrap_err();
        assert!(err.to_string().contains("not a mutable panel field"));
    }

    #[test]
    fn test_update_unknown_panel_is_not_found() {
        let (_dir, store) = store();
        let comic = create(&store);
        let err = store
            .update_panel_field(&comic.comic_id, "panel9", "description", json!("x"))
            .unwrap_err();
        assert!(err.to_string().contains("Panel not found"));
    }

    #[test]
    fn test_context_refs_cap_enforced() {
        let (_dir, store) = store();
        let comic = create(&store);
        store
            .replace_panels(&comic.comic_id, vec![sample_panel("panel1")])
            .unwrap();
        let err = store
            .update_panel_field(
                &comic.comic_id,
                "panel1",
                "contextImageRefs",
                json!(["a", "b", "c", "d", "e"]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("capped at 4"));
    }

    #[test]
    fn test_dialogue_order_must_be_dense() {
        let (_dir, store) = store();
        let comic = create(&store);
        store
            .replace_panels(&comic.comic_id, vec![sample_panel("panel2")])
            .unwrap();

        let sparse = json!([
            {"orderIndex": 0, "speakerCharId": "char_1", "text": "Hi", "bubbleType": "speech"},
            {"orderIndex": 2, "speakerCharId": "char_2", "text": "Yo", "bubbleType": "speech"}
        ]);
        let err = store
            .update_panel_field(&comic.comic_id, "panel2", "dialogue", sparse)
            .unwrap_err();
        assert!(err.to_string().contains("dense"));

        let dense = json!([
            {"orderIndex": 0, "speakerCharId": "char_1", "text": "Hi", "bubbleType": "speech"},
            {"orderIndex": 1, "speakerCharId": "char_2", "text": "Yo", "bubbleType": "thought"}
        ]);
        store
            .update_panel_field(&comic.comic_id, "panel2", "dialogue", dense)
            .unwrap();
        let loaded = store.get_comic(&comic.comic_id).unwrap();
        let dialogue = &loaded.panel("panel2").unwrap().dialogue;
        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue[1].bubble_type, BubbleType::Thought);
    }

    #[test]
    fn test_replace_preserves_insertion_order() {
        let (_dir, store) = store();
        let comic = create(&store);
        let panels: Vec<Panel> = (1..=8).map(|i| sample_panel(&format!("panel{}", i))).collect();
        store.replace_panels(&comic.comic_id, panels).unwrap();
        let loaded = store.get_comic(&comic.comic_id).unwrap();
        let ids: Vec<&str> = loaded.panels.iter().map(|p| p.panel_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["panel1", "panel2", "panel3", "panel4", "panel5", "panel6", "panel7", "panel8"]
        );
    }

    #[test]
    fn test_delete_cascades() {
        let (_dir, store) = store();
        let comic = create(&store);
        store.delete_comic(&comic.comic_id).unwrap();
        assert!(store.get_comic(&comic.comic_id).is_err());
        assert!(store.delete_comic(&comic.comic_id).is_err());
    }
}
