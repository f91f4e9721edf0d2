use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Style suffix appended to every panel prompt so generated panels share
/// one visual identity regardless of what the text model produced.
pub const PANEL_STYLE_SUFFIX: &str =
    "vibrant comic book style, bold ink outlines, flat cel shading, dramatic lighting, high detail";

/// Style suffix for character sheets.
pub const CHARACTER_STYLE_SUFFIX: &str =
    "full body character sheet, neutral background, comic book style, bold ink outlines, flat cel shading";

pub const DEFAULT_CHARACTER_WIDTH: u32 = 832;
pub const DEFAULT_CHARACTER_HEIGHT: u32 = 1248;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComicStatus {
    Draft,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraAngle {
    EstablishingShot,
    MediumShot,
    CloseUp,
    TwoShot,
    OverShoulder,
    LowAngle,
    HighAngle,
    WideShot,
    ExtremeCloseUp,
    BirdsEyeView,
    DutchAngle,
    PointOfView,
    EyeLevel,
    AerialView,
}

impl CameraAngle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraAngle::EstablishingShot => "establishing-shot",
            CameraAngle::MediumShot => "medium-shot",
            CameraAngle::CloseUp => "close-up",
            CameraAngle::TwoShot => "two-shot",
            CameraAngle::OverShoulder => "over-shoulder",
            CameraAngle::LowAngle => "low-angle",
            CameraAngle::HighAngle => "high-angle",
            CameraAngle::WideShot => "wide-shot",
            CameraAngle::ExtremeCloseUp => "extreme-close-up",
            CameraAngle::BirdsEyeView => "birds-eye-view",
            CameraAngle::DutchAngle => "dutch-angle",
            CameraAngle::PointOfView => "point-of-view",
            CameraAngle::EyeLevel => "eye-level",
            CameraAngle::AerialView => "aerial-view",
        }
    }
}

impl fmt::Display for CameraAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BubbleType {
    #[default]
    Speech,
    Thought,
    Shout,
    Whisper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
    Title,
    Narration,
    Speech,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    pub order_index: u32,
    pub speaker_char_id: String,
    pub text: String,
    #[serde(default)]
    pub bubble_type: BubbleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPlacement {
    #[serde(rename = "type")]
    pub kind: PlacementKind,
    pub text: String,
    pub position: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub reading_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub char_id: String,
    pub name: String,
    pub description: String,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub context_image_refs: Vec<String>,
    pub prompt: String,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serde(default)]
    pub external_image_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub panel_id: String,
    pub page_number: u32,
    pub panel_number_on_page: u32,
    pub description: String,
    pub camera_angle: CameraAngle,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub context_image_refs: Vec<String>,
    pub prompt: String,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serde(default)]
    pub external_image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default)]
    pub sound_effects: Vec<String>,
    #[serde(default)]
    pub dialogue: Vec<Dialogue>,
    #[serde(default)]
    pub text_placements: Vec<TextPlacement>,
    #[serde(default)]
    pub rendered_image_url: Option<String>,
}

impl Panel {
    /// A panel carries text when it has a title, narration or at least
    /// one dialogue line. Sound effects alone are not placed by vision.
    pub fn has_text(&self) -> bool {
        self.title.is_some() || self.narration.is_some() || !self.dialogue.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comic {
    pub comic_id: String,
    pub title: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    pub story_context: String,
    pub target_page_count: u32,
    pub status: ComicStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

impl Comic {
    pub fn panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.panel_id == panel_id)
    }

    pub fn character(&self, char_id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.char_id == char_id)
    }
}

/// Panel fields that tools may mutate through the store.
pub const MUTABLE_PANEL_FIELDS: &[&str] = &[
    "description",
    "prompt",
    "cameraAngle",
    "contextImageRefs",
    "generatedImageUrl",
    "externalImageId",
    "dialogue",
    "title",
    "narration",
    "soundEffects",
    "textPlacements",
    "renderedImageUrl",
];

/// Character fields that tools may mutate through the store.
pub const MUTABLE_CHARACTER_FIELDS: &[&str] = &[
    "name",
    "description",
    "prompt",
    "contextImageRefs",
    "generatedImageUrl",
    "externalImageId",
];
