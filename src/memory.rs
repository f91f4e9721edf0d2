use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const SUCCESS_HISTORY_LIMIT: usize = 10;
const CONTEXT_STACK_LIMIT: usize = 20;
const ERROR_PREFIX_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub input: Value,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRecord {
    pub timestamp: DateTime<Utc>,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolPreference {
    pub success_count: u32,
    #[serde(default)]
    pub successful_params: Vec<SuccessRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBucket {
    pub count: u32,
    pub representative: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailurePattern {
    pub failure_count: u32,
    #[serde(default)]
    pub bucketed_errors: HashMap<String, ErrorBucket>,
}

/// The single persistent learning document, written atomically on every
/// learning update.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersistentMemory {
    #[serde(default)]
    pub tool_preferences: HashMap<String, ToolPreference>,
    #[serde(default)]
    pub failure_patterns: HashMap<String, FailurePattern>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStrategy {
    Default,
    UseSuccessfulPattern,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub strategy: SuggestionStrategy,
    pub modifications: Value,
    pub confidence: f64,
}

/// Volatile per-session attempt tracking plus the persistent learning
/// document.
#[derive(Debug)]
pub struct Memory {
    path: PathBuf,
    pub session_id: String,
    attempts: HashMap<String, Vec<AttemptRecord>>,
    failed_operations: Vec<String>,
    successful_strategies: Vec<String>,
    context_stack: Vec<String>,
    persistent: PersistentMemory,
}

impl Memory {
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = data_dir.into().join("memory.json");
        let persistent = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read memory document {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse memory document {:?}", path))?
        } else {
            PersistentMemory::default()
        };

        Ok(Self {
            path,
            session_id: format!("session_{}", uuid::Uuid::new_v4().simple()),
            attempts: HashMap::new(),
            failed_operations: Vec::new(),
            successful_strategies: Vec::new(),
            context_stack: Vec::new(),
            persistent,
        })
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn persist(&mut self) -> Result<()> {
        self.persistent.last_updated = Some(Utc::now());
        let content = serde_json::to_string_pretty(&self.persistent)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, content).context("Failed to write memory temp file")?;
        fs::rename(&tmp, &self.path).context("Failed to replace memory document")?;
        Ok(())
    }

    pub fn push_context(&mut self, context: &str) {
        self.context_stack.push(context.to_string());
        if self.context_stack.len() > CONTEXT_STACK_LIMIT {
            self.context_stack.remove(0);
        }
    }

    pub fn pop_context(&mut self) {
        self.context_stack.pop();
    }

    pub fn record_attempt(
        &mut self,
        tool: &str,
        input: &Value,
        outcome: Outcome,
        error: Option<&str>,
    ) {
        let records = self.attempts.entry(tool.to_string()).or_default();
        let record = AttemptRecord {
            timestamp: Utc::now(),
            tool_name: tool.to_string(),
            input: input.clone(),
            outcome,
            error: error.map(|e| e.to_string()),
            attempt_number: records.len() as u32 + 1,
            context: self.context_stack.last().cloned(),
        };
        if outcome != Outcome::Success {
            self.failed_operations
                .push(format!("{}: {}", tool, error.unwrap_or("unknown error")));
        }
        records.push(record);
    }

    pub fn note_successful_strategy(&mut self, description: &str) {
        self.successful_strategies.push(description.to_string());
    }

    pub fn learn_success(&mut self, tool: &str, input: &Value) -> Result<()> {
        let pref = self
            .persistent
            .tool_preferences
            .entry(tool.to_string())
            .or_default();
        pref.success_count += 1;
        pref.successful_params.push(SuccessRecord {
            timestamp: Utc::now(),
            input: input.clone(),
        });
        if pref.successful_params.len() > SUCCESS_HISTORY_LIMIT {
            let overflow = pref.successful_params.len() - SUCCESS_HISTORY_LIMIT;
            pref.successful_params.drain(..overflow);
        }
        self.persist()
    }

    pub fn learn_failure(&mut self, tool: &str, error: &str) -> Result<()> {
        let pattern = self
            .persistent
            .failure_patterns
            .entry(tool.to_string())
            .or_default();
        pattern.failure_count += 1;
        let prefix: String = error.chars().take(ERROR_PREFIX_LEN).collect();
        let bucket = pattern.bucketed_errors.entry(prefix).or_default();
        bucket.count += 1;
        if bucket.representative.is_empty() {
            bucket.representative = error.to_string();
        }
        self.persist()
    }

    /// Session attempt count for a tool.
    pub fn attempt_count(&self, tool: &str) -> usize {
        self.attempts.get(tool).map(|v| v.len()).unwrap_or(0)
    }

    pub fn last_attempt(&self, tool: &str) -> Option<&AttemptRecord> {
        self.attempts.get(tool).and_then(|v| v.last())
    }

    pub fn failure_count(&self, tool: &str) -> u32 {
        self.persistent
            .failure_patterns
            .get(tool)
            .map(|p| p.failure_count)
            .unwrap_or(0)
    }

    pub fn success_count(&self, tool: &str) -> u32 {
        self.persistent
            .tool_preferences
            .get(tool)
            .map(|p| p.success_count)
            .unwrap_or(0)
    }

    /// Suggest parameter modifications from learned history. Confidence
    /// is successCount / (successCount + failureCount).
    pub fn suggest_from_history(&self, tool: &str, current_input: &Value) -> Suggestion {
        let successes = self.success_count(tool);
        let failures = self.failure_count(tool);
        let total = successes + failures;
        let confidence = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };

        let last_good = self
            .persistent
            .tool_preferences
            .get(tool)
            .and_then(|p| p.successful_params.last());

        match last_good {
            Some(record) if successes > 0 => {
                // Only propose keys that differ from the current input.
                let mut modifications = serde_json::Map::new();
                if let (Some(good), Some(current)) =
                    (record.input.as_object(), current_input.as_object())
                {
                    for (k, v) in good {
                        if current.get(k) != Some(v) {
                            modifications.insert(k.clone(), v.clone());
                        }
                    }
                }
                Suggestion {
                    strategy: SuggestionStrategy::UseSuccessfulPattern,
                    modifications: Value::Object(modifications),
                    confidence,
                }
            }
            _ => Suggestion {
                strategy: SuggestionStrategy::Default,
                modifications: Value::Object(serde_json::Map::new()),
                confidence,
            },
        }
    }
}
