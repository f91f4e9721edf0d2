use crate::config::Config;
use crate::imagegen::create_imagegen;
use crate::json_extract::extract_json_as;
use serde::Deserialize;
use crate::llm::{create_text_model, CompletionOptions};
use crate::memory::Memory;
use crate::store::ComicStore;
use crate::tools::{ToolContext, ToolRegistry};
use crate::uploader::DiskUploader;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

const HISTORY_LIMIT: usize = 10;

/// Result of one user turn: the assistant's reply plus any image URLs
/// produced by tools during the turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub reply: String,
    pub page_urls: Vec<String>,
    pub panel_urls: Vec<String>,
    pub tool_results: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// The model's answer to the system prompt: either tool calls or a
/// direct reply.
#[derive(Debug, Default, Deserialize)]
struct TurnPlan {
    #[serde(default, alias = "tool_calls", rename = "toolCalls")]
    tool_calls: Vec<PlannedCall>,
    #[serde(default)]
    reply: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedCall {
    name: String,
    #[serde(default = "empty_params")]
    params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Conversational driver of the pipeline: asks the text model which
/// tools to run, dispatches them through the registry, and turns the
/// results back into a reply.
pub struct AgentController {
    registry: ToolRegistry,
    ctx: ToolContext,
    memory: Memory,
    history: Vec<ChatMessage>,
}

impl AgentController {
    pub fn new(config: Config) -> Result<Self> {
        config.ensure_directories()?;
        let store = Arc::new(ComicStore::new(&config.data_dir)?);
        let llm = Arc::from(create_text_model(&config)?);
        let imagegen = Arc::from(create_imagegen(&config));
        let uploader = Arc::new(DiskUploader::new(
            &config.output_dir,
            &config.uploader.public_base_url,
        ));
        let memory = Memory::load(&config.data_dir)?;
        let ctx = ToolContext::new(config, store, llm, imagegen, uploader);
        Ok(Self::with_parts(ToolRegistry::standard(), ctx, memory))
    }

    pub fn with_parts(registry: ToolRegistry, ctx: ToolContext, memory: Memory) -> Self {
        Self {
            registry,
            ctx,
            memory,
            history: Vec::new(),
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a comic-creation assistant driving a generation pipeline.\n\
             The pipeline order is: generate_panels -> generate_characters -> \
             generate_dialogue -> generate_leonardo_images -> place_dialogue -> \
             render_bubbles -> compose_pages. select_comic_layout previews a \
             layout and edit_content changes a single field at any point.\n\n\
             Tools:\n{}\n\n\
             To act, respond with JSON only: \
             {{\"toolCalls\": [{{\"name\": \"...\", \"params\": {{...}}}}]}}.\n\
             To answer the user without acting, respond with \
             {{\"reply\": \"...\"}}.",
            self.registry.describe()
        )
    }

    fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_history(&mut self, role: &'static str, content: &str) {
        self.history.push(ChatMessage {
            role,
            content: content.to_string(),
        });
        // FIFO trim; the system prompt lives outside the history.
        while self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
    }

    /// Run one conversational turn.
    pub async fn handle_turn(&mut self, user_message: &str) -> Result<TurnOutcome> {
        self.push_history("User", user_message);
        let system = self.system_prompt();

        let raw = self
            .ctx
            .llm
            .complete_text(&system, &self.transcript(), CompletionOptions::default())
            .await?;
        let plan: TurnPlan = extract_json_as(&raw).unwrap_or_default();

        if plan.tool_calls.is_empty() {
            let reply = plan.reply.unwrap_or(raw);
            self.push_history("Assistant", &reply);
            return Ok(TurnOutcome {
                reply,
                ..TurnOutcome::default()
            });
        }

        let mut outcome = TurnOutcome::default();
        for call in plan.tool_calls {
            log::info!("Dispatching tool {}", call.name);
            let result_str = self
                .registry
                .invoke(&call.name, call.params, &self.ctx, &mut self.memory)
                .await;
            let result: Value = serde_json::from_str(&result_str)
                .unwrap_or_else(|_| Value::String(result_str.clone()));
            collect_urls(&call.name, &result, &mut outcome);
            outcome.tool_results.push((call.name, result));
        }

        let reply = self.summarize(&outcome).await;
        self.push_history("Assistant", &reply);
        outcome.reply = reply;
        Ok(outcome)
    }

    /// Second model pass: turn raw tool payloads into a human reply.
    async fn summarize(&self, outcome: &TurnOutcome) -> String {
        let results: Vec<Value> = outcome
            .tool_results
            .iter()
            .map(|(name, result)| serde_json::json!({"tool": name, "result": result}))
            .collect();
        let prompt = format!(
            "These tools just ran:\n{}\n\n\
             Summarize the outcome for the user in a few sentences. Mention any \
             failures, their reason, and the suggested alternative if present.",
            serde_json::to_string_pretty(&results).unwrap_or_default()
        );

        match self
            .ctx
            .llm
            .complete_text(&self.system_prompt(), &prompt, CompletionOptions::default())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Summary completion failed: {:#}", e);
                // Fall back to a mechanical summary.
                outcome
                    .tool_results
                    .iter()
                    .map(|(name, result)| {
                        let ok = result
                            .get("success")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false);
                        format!("{}: {}", name, if ok { "ok" } else { "failed" })
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
    }
}

fn collect_urls(tool: &str, result: &Value, outcome: &mut TurnOutcome) {
    match tool {
        "generate_leonardo_images" => {
            if let Some(generated) = result.get("generated").and_then(|v| v.as_object()) {
                for (id, url) in generated {
                    if id.starts_with("panel") {
                        if let Some(url) = url.as_str() {
                            outcome.panel_urls.push(url.to_string());
                        }
                    }
                }
            }
        }
        "compose_pages" => {
            if let Some(pages) = result.get("pages").and_then(|v| v.as_array()) {
                for page in pages {
                    if let Some(url) = page.get("url").and_then(|v| v.as_str()) {
                        outcome.page_urls.push(url.to_string());
                    }
                }
            }
        }
        _ => {}
    }
}
