use crate::config::Config;
use crate::decision::{alternative_for, retry_budget, DecisionEngine, ResultEval, StrategyKind};
use crate::imagegen::ImageGenClient;
use crate::llm::TextModelClient;
use crate::memory::{Memory, Outcome};
use crate::store::ComicStore;
use crate::uploader::AssetUploader;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod bubbles;
pub mod characters;
pub mod dialogue;
pub mod edit;
pub mod images;
pub mod layout;
pub mod pages;
pub mod panels;
pub mod placement;

#[cfg(test)]
pub(crate) mod testutil;

/// Session-scoped pipeline state threaded between tools: the active
/// comic, the provider-side image id map used for context references,
/// and the last image-generation source map.
#[derive(Debug, Default)]
pub struct SessionState {
    pub comic_id: Option<String>,
    pub context_map: HashMap<String, String>,
    pub last_source_map: HashMap<String, String>,
}

/// Everything a tool needs to run one pipeline stage.
pub struct ToolContext {
    pub store: Arc<ComicStore>,
    pub llm: Arc<dyn TextModelClient>,
    pub imagegen: Arc<dyn ImageGenClient>,
    pub uploader: Arc<dyn AssetUploader>,
    pub config: Config,
    pub session: Mutex<SessionState>,
}

impl ToolContext {
    pub fn new(
        config: Config,
        store: Arc<ComicStore>,
        llm: Arc<dyn TextModelClient>,
        imagegen: Arc<dyn ImageGenClient>,
        uploader: Arc<dyn AssetUploader>,
    ) -> Self {
        Self {
            store,
            llm,
            imagegen,
            uploader,
            config,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub async fn current_comic_id(&self) -> Option<String> {
        self.session.lock().await.comic_id.clone()
    }
}

/// One pipeline stage. `execute` returns the tool's JSON payload; the
/// registry owns validation, timeout, retry and attempt recording.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn required_params(&self) -> &'static [&'static str];
    fn optional_params(&self) -> &'static [&'static str] {
        &[]
    }
    async fn execute(&self, params: &Value, ctx: &ToolContext) -> Result<Value>;
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
    engine: DecisionEngine,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name(), t)).collect(),
            engine: DecisionEngine,
        }
    }

    /// The full pipeline toolset.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(layout::SelectComicLayout),
            Box::new(panels::GeneratePanels),
            Box::new(characters::GenerateCharacters),
            Box::new(dialogue::GenerateDialogue),
            Box::new(images::GenerateImages),
            Box::new(placement::PlaceDialogue),
            Box::new(bubbles::RenderBubbles),
            Box::new(pages::ComposePages),
            Box::new(edit::EditContent),
        ])
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// One line per tool for the agent system prompt.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| {
                format!(
                    "- {}: {} (required: [{}], optional: [{}])",
                    t.name(),
                    t.description(),
                    t.required_params().join(", "),
                    t.optional_params().join(", ")
                )
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Dispatch one tool call: validate, execute under timeout, and run
    /// the decision-engine retry loop. Always returns a JSON string;
    /// errors never cross this boundary.
    pub async fn invoke(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
        memory: &mut Memory,
    ) -> String {
        let tool = match self.tools.get(name) {
            Some(tool) => tool,
            None => {
                return envelope_error(&format!("Unknown tool: {}", name), 0, None);
            }
        };

        if let Some(missing) = tool
            .required_params()
            .iter()
            .find(|p| params.get(**p).is_none())
        {
            let error = format!("Validation error: missing required parameter '{}'", missing);
            memory.record_attempt(name, &params, Outcome::Failure, Some(&error));
            return envelope_error(&error, 1, None);
        }

        let budget = retry_budget(name);
        let mut params = params;
        let mut timeout_multiplier = 1.0f64;

        for attempt in 0..budget {
            memory.push_context(&format!("{} attempt {}", name, attempt + 1));

            let timeout =
                Duration::from_secs_f64(ctx.config.tool_timeout_secs as f64 * timeout_multiplier);
            let outcome = tokio::time::timeout(timeout, tool.execute(&params, ctx)).await;

            let (error, recorded_outcome) = match outcome {
                Ok(Ok(payload)) => match self.engine.evaluate_result(name, &payload) {
                    ResultEval::Success => {
                        memory.record_attempt(name, &params, Outcome::Success, None);
                        if attempt > 0 {
                            memory.note_successful_strategy(&format!(
                                "{} succeeded on attempt {}",
                                name,
                                attempt + 1
                            ));
                        }
                        if let Err(e) = memory.learn_success(name, &params) {
                            log::warn!("Failed to persist memory: {:#}", e);
                        }
                        memory.pop_context();
                        return payload.to_string();
                    }
                    ResultEval::Partial { succeeded, failed } => {
                        memory.record_attempt(name, &params, Outcome::Success, None);
                        for (id, unit_error) in &failed {
                            let detail = format!("{}: {}", id, unit_error);
                            if let Err(e) = memory.learn_failure(name, &detail) {
                                log::warn!("Failed to persist memory: {:#}", e);
                            }
                        }
                        memory.pop_context();
                        let mut payload = payload;
                        if let Some(obj) = payload.as_object_mut() {
                            obj.insert("alternative".to_string(), json!(alternative_for(name)));
                            obj.insert(
                                "retryRecommendation".to_string(),
                                json!(failed
                                    .iter()
                                    .map(|(id, _)| json!({"specificPanel": id}))
                                    .collect::<Vec<_>>()),
                            );
                        }
                        log::info!(
                            "{}: partial success ({} ok, {} failed)",
                            name,
                            succeeded.len(),
                            failed.len()
                        );
                        return payload.to_string();
                    }
                    ResultEval::Failure(msg) => (msg, Outcome::Failure),
                },
                Ok(Err(e)) => (format!("{:#}", e), Outcome::Failure),
                Err(_) => (
                    format!(
                        "Tool {} timed out after {} seconds",
                        name,
                        timeout.as_secs()
                    ),
                    Outcome::Timeout,
                ),
            };

            memory.record_attempt(name, &params, recorded_outcome, Some(&error));
            if let Err(e) = memory.learn_failure(name, &error) {
                log::warn!("Failed to persist memory: {:#}", e);
            }

            let decision = self.engine.decide(name, &error, attempt, &params, memory);
            memory.pop_context();

            if !decision.should_retry {
                let alternative = if decision.reason.contains("exhausted") {
                    Some(alternative_for(name))
                } else {
                    None
                };
                log::warn!("{} failed definitively: {} ({})", name, error, decision.reason);
                let mut value: Value =
                    serde_json::from_str(&envelope_error(&error, attempt + 1, alternative))
                        .unwrap_or_else(|_| json!({"success": false, "error": error}));
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("reason".to_string(), json!(decision.reason));
                }
                return value.to_string();
            }

            if let Some(strategy) = decision.strategy {
                log::info!(
                    "{} attempt {} failed ({}); retrying with {:?} in {} ms",
                    name,
                    attempt + 1,
                    error,
                    strategy.kind,
                    strategy.wait_time_ms
                );
                if strategy.kind == StrategyKind::IncreaseTimeout {
                    timeout_multiplier *= strategy
                        .modifications
                        .get("timeoutMultiplier")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(1.5);
                }
                if let (Some(target), Some(mods)) =
                    (params.as_object_mut(), strategy.modifications.as_object())
                {
                    for (k, v) in mods {
                        target.insert(k.clone(), v.clone());
                    }
                }
                tokio::time::sleep(Duration::from_millis(strategy.wait_time_ms)).await;
            }
        }

        // The decide() budget check returns before this is reachable,
        // but the loop bound keeps it airtight.
        envelope_error(
            &format!("Retry budget exhausted for {}", name),
            budget,
            Some(alternative_for(name)),
        )
    }
}

fn envelope_error(error: &str, attempt_count: u32, alternative: Option<&str>) -> String {
    let mut payload = json!({
        "success": false,
        "error": error,
        "attemptCount": attempt_count,
    });
    if let Some(alt) = alternative {
        payload["alternative"] = json!(alt);
    }
    payload.to_string()
}
