use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub image: ImageGenConfig,
    pub uploader: UploaderConfig,

    /// Directory for comic documents and the memory document.
    pub data_dir: String,
    /// Directory the uploader writes generated assets into; also served
    /// by the HTTP API under /outputs.
    pub output_dir: String,

    pub port: u16,
    pub frontend_url: Option<String>,

    /// Per-tool timeout enforced by the registry, in seconds.
    pub tool_timeout_secs: u64,

    /// Candidate font files for bubble rendering; the first readable one
    /// wins.
    pub font_paths: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai" or "gemini"
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageGenConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_id: Option<String>,
    pub style_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploaderConfig {
    /// Base URL prefixed to uploaded asset paths. Defaults to the output
    /// directory itself so local runs work without a web server.
    pub public_base_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider = env_or("TEXT_MODEL_PROVIDER", "openai");
        let api_key = env::var("TEXT_MODEL_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .context("TEXT_MODEL_API_KEY not set")?;
        let image_api_key = env::var("IMAGE_API_KEY").context("IMAGE_API_KEY not set")?;

        let output_dir = env_or("COMIC_OUTPUT_DIR", "outputs");
        let public_base_url = env_or("PUBLIC_BASE_URL", &output_dir);

        let font_paths = match env::var("COMIC_FONT_PATH") {
            Ok(p) => p.split(':').map(|s| s.to_string()).collect(),
            Err(_) => DEFAULT_FONT_PATHS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            llm: LlmConfig {
                provider,
                api_key,
                model: env_or("TEXT_MODEL_NAME", "gpt-4o"),
                base_url: env::var("TEXT_MODEL_BASE_URL").ok(),
            },
            image: ImageGenConfig {
                api_key: image_api_key,
                base_url: env_or(
                    "IMAGE_API_BASE_URL",
                    "https://cloud.leonardo.ai/api/rest/v1",
                ),
                model_id: env::var("IMAGE_MODEL_ID").ok(),
                style_id: env::var("IMAGE_STYLE_ID").ok(),
            },
            uploader: UploaderConfig { public_base_url },
            data_dir: env_or("COMIC_DATA_DIR", "data"),
            output_dir,
            port: env_or("PORT", "3001")
                .parse()
                .context("PORT must be a number")?,
            frontend_url: env::var("FRONTEND_URL").ok(),
            tool_timeout_secs: env_or("TOOL_TIMEOUT_SECS", "300")
                .parse()
                .context("TOOL_TIMEOUT_SECS must be a number")?,
            font_paths,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

#[cfg(test)]
impl Config {
    /// Offline config for tests: no keys, everything rooted in `dir`.
    pub fn for_tests(dir: &std::path::Path) -> Self {
        let root = dir.to_string_lossy().to_string();
        Self {
            llm: LlmConfig {
                provider: "mock".to_string(),
                api_key: String::new(),
                model: "mock".to_string(),
                base_url: None,
            },
            image: ImageGenConfig {
                api_key: String::new(),
                base_url: String::new(),
                model_id: None,
                style_id: None,
            },
            uploader: UploaderConfig {
                public_base_url: format!("{}/outputs", root),
            },
            data_dir: format!("{}/data", root),
            output_dir: format!("{}/outputs", root),
            port: 0,
            frontend_url: None,
            tool_timeout_secs: 300,
            font_paths: vec![],
        }
    }
}
