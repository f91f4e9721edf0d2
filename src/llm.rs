use crate::config::Config;
use crate::json_extract::extract_json;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Sampling options for a single completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[async_trait]
pub trait TextModelClient: Send + Sync + Debug {
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        opts: CompletionOptions,
    ) -> Result<String>;

    /// Multimodal completion with one inline image.
    async fn complete_vision(
        &self,
        system: &str,
        user: &str,
        image_bytes: &[u8],
        mime: &str,
        opts: CompletionOptions,
    ) -> Result<String>;
}

/// Completion plus the §4.D extraction ladder. `Ok(None)` means the model
/// answered but nothing parseable came back.
pub async fn complete_json(
    llm: &dyn TextModelClient,
    system: &str,
    user: &str,
) -> Result<(Option<Value>, String)> {
    let raw = llm
        .complete_text(system, user, CompletionOptions::default())
        .await?;
    let extracted = extract_json(&raw);
    Ok((extracted, raw))
}

pub fn create_text_model(config: &Config) -> Result<Box<dyn TextModelClient>> {
    match config.llm.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIClient::new(
            &config.llm.api_key,
            &config.llm.model,
            config.llm.base_url.as_deref(),
        ))),
        "gemini" => Ok(Box::new(GeminiClient::new(
            &config.llm.api_key,
            &config.llm.model,
        ))),
        other => Err(anyhow!("Unknown text model provider: {}", other)),
    }
}

// --- OpenAI ---

#[derive(Debug)]
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, messages: Vec<Value>, opts: CompletionOptions) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }
        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl TextModelClient for OpenAIClient {
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        opts: CompletionOptions,
    ) -> Result<String> {
        let messages = vec![
            serde_json::json!({"role": "system", "content": system}),
            serde_json::json!({"role": "user", "content": user}),
        ];
        self.chat(messages, opts).await
    }

    async fn complete_vision(
        &self,
        system: &str,
        user: &str,
        image_bytes: &[u8],
        mime: &str,
        opts: CompletionOptions,
    ) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let data_url = format!("data:{};base64,{}", mime, encoded);
        let messages = vec![
            serde_json::json!({"role": "system", "content": system}),
            serde_json::json!({"role": "user", "content": [
                {"type": "text", "text": user},
                {"type": "image_url", "image_url": {"url": data_url}},
            ]}),
        ];
        self.chat(messages, opts).await
    }
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn generate(
        &self,
        system: &str,
        parts: Vec<Value>,
        opts: CompletionOptions,
    ) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": parts}],
            "systemInstruction": {"parts": [{"text": system}]},
            "generationConfig": {
                "temperature": opts.temperature,
                "maxOutputTokens": opts.max_tokens,
            },
        });

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).with_context(|| {
            format!("Failed to parse Gemini response. Body: {}", response_text)
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        if let Some(candidates) = result.candidates {
            if let Some(first) = candidates.first() {
                if let Some(content) = &first.content {
                    if let Some(part) = content.parts.first() {
                        return Ok(part.text.clone());
                    }
                }
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
            }
        }

        Err(anyhow!(
            "Gemini response format unexpected or empty. Body: {}",
            response_text
        ))
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl TextModelClient for GeminiClient {
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        opts: CompletionOptions,
    ) -> Result<String> {
        let parts = vec![serde_json::json!({"text": user})];
        self.generate(system, parts, opts).await
    }

    async fn complete_vision(
        &self,
        system: &str,
        user: &str,
        image_bytes: &[u8],
        mime: &str,
        opts: CompletionOptions,
    ) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let parts = vec![
            serde_json::json!({"text": user}),
            serde_json::json!({"inlineData": {"mimeType": mime, "data": encoded}}),
        ];
        self.generate(system, parts, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_parsing_success() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "text": "Hello world" } ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];
        assert_eq!(candidate.content.as_ref().unwrap().parts[0].text, "Hello world");
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{ "candidates": [ { "finishReason": "SAFETY", "index": 0 } ] }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];
        assert!(candidate.content.is_none());
        assert_eq!(candidate.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hi there" },
                "finish_reason": "stop"
            }]
        }"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("Hi there"));
    }

    #[tokio::test]
    async fn test_complete_json_extracts_from_chatter() {
        #[derive(Debug)]
        struct FencedLlm;
        #[async_trait]
        impl TextModelClient for FencedLlm {
            async fn complete_text(
                &self,
                _system: &str,
                _user: &str,
                _opts: CompletionOptions,
            ) -> Result<String> {
                Ok("Here you go:\n```json\n{\"ok\": true}\n```".to_string())
            }
            async fn complete_vision(
                &self,
                _: &str,
                _: &str,
                _: &[u8],
                _: &str,
                _: CompletionOptions,
            ) -> Result<String> {
                unreachable!()
            }
        }

        let (value, raw) = complete_json(&FencedLlm, "sys", "user").await.unwrap();
        assert_eq!(value.unwrap()["ok"], true);
        assert!(raw.contains("Here you go"));
    }

    #[tokio::test]
    async fn test_complete_json_empty_response_is_none() {
        #[derive(Debug)]
        struct EmptyLlm;
        #[async_trait]
        impl TextModelClient for EmptyLlm {
            async fn complete_text(
                &self,
                _: &str,
                _: &str,
                _: CompletionOptions,
            ) -> Result<String> {
                Ok(String::new())
            }
            async fn complete_vision(
                &self,
                _: &str,
                _: &str,
                _: &[u8],
                _: &str,
                _: CompletionOptions,
            ) -> Result<String> {
                unreachable!()
            }
        }

        let (value, _) = complete_json(&EmptyLlm, "sys", "user").await.unwrap();
        assert!(value.is_none());
    }
}
