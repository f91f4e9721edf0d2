use crate::memory::{Memory, SuggestionStrategy};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

/// Tool name of the image-generation stage; it gets a deeper retry budget
/// and its own modification ladder.
pub const IMAGE_TOOL: &str = "generate_leonardo_images";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_retry: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RetryStrategy>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub modifications: Value,
    pub wait_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    IncreaseTimeout,
    RateLimitBackoff,
    UseHistoricalSuccess,
    ModifyParameters,
    ReduceContext,
    ChangeSeed,
    SimplifyPrompt,
}

/// How a finished tool payload should be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEval {
    Success,
    Failure(String),
    /// Some units of a batch succeeded; the failed ones are retryable
    /// individually.
    Partial {
        succeeded: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

const UNRECOVERABLE_PATTERNS: &[&str] = &[
    "api key",
    "authentication",
    "unauthorized",
    "not found",
    "invalid model",
    "quota exceeded",
];

pub fn is_unrecoverable(error: &str) -> bool {
    let lower = error.to_lowercase();
    UNRECOVERABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Maximum total attempts per tool within one registry invocation.
pub fn retry_budget(tool: &str) -> u32 {
    match tool {
        IMAGE_TOOL => 3,
        "generate_panels" | "generate_characters" | "place_dialogue" | "compose_pages" => 2,
        _ => 2,
    }
}

/// Suggested follow-up once the budget is exhausted.
pub fn alternative_for(tool: &str) -> &'static str {
    if tool == IMAGE_TOOL {
        "generate_individually"
    } else {
        "manual_intervention"
    }
}

#[derive(Debug, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    /// Decide whether and how to retry after `error` on `attempt`
    /// (0-based) of `tool` with input `input`.
    pub fn decide(
        &self,
        tool: &str,
        error: &str,
        attempt: u32,
        input: &Value,
        memory: &Memory,
    ) -> Decision {
        if error.to_lowercase().contains("validation error") {
            return Decision {
                should_retry: false,
                reason: "Validation error; retrying cannot help".to_string(),
                strategy: None,
            };
        }

        if is_unrecoverable(error) {
            return Decision {
                should_retry: false,
                reason: "Unrecoverable error detected".to_string(),
                strategy: None,
            };
        }

        if attempt + 1 >= retry_budget(tool) {
            return Decision {
                should_retry: false,
                reason: format!("Retry budget exhausted for {}", tool),
                strategy: None,
            };
        }

        let strategy = if tool == IMAGE_TOOL {
            self.image_ladder(attempt, input)
        } else {
            self.generic_strategy(tool, error, attempt, input, memory)
        };

        Decision {
            should_retry: true,
            reason: format!("Retrying with strategy {:?}", strategy.kind),
            strategy: Some(strategy),
        }
    }

    fn generic_strategy(
        &self,
        tool: &str,
        error: &str,
        attempt: u32,
        input: &Value,
        memory: &Memory,
    ) -> RetryStrategy {
        let lower = error.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return RetryStrategy {
                kind: StrategyKind::IncreaseTimeout,
                modifications: json!({"timeoutMultiplier": 1.5}),
                wait_time_ms: 5000 * (attempt as u64 + 1),
                reason: Some("Operation timed out; retrying with a longer window".to_string()),
            };
        }

        if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
        {
            return RetryStrategy {
                kind: StrategyKind::RateLimitBackoff,
                modifications: json!({}),
                wait_time_ms: 10000 * 2u64.pow(attempt),
                reason: Some("Rate limited; backing off exponentially".to_string()),
            };
        }

        let suggestion = memory.suggest_from_history(tool, input);
        if suggestion.strategy == SuggestionStrategy::UseSuccessfulPattern {
            return RetryStrategy {
                kind: StrategyKind::UseHistoricalSuccess,
                modifications: suggestion.modifications,
                wait_time_ms: 2000 * (attempt as u64 + 1),
                reason: Some(format!(
                    "Applying last known good parameters (confidence {:.2})",
                    suggestion.confidence
                )),
            };
        }

        let mut rng = rand::rng();
        RetryStrategy {
            kind: StrategyKind::ModifyParameters,
            modifications: json!({"seedOffset": rng.random_range(0..1000)}),
            wait_time_ms: 3000 * (attempt as u64 + 1),
            reason: Some("Perturbing seed before retry".to_string()),
        }
    }

    /// Image-generation-specific modification ladder by attempt number.
    fn image_ladder(&self, attempt: u32, input: &Value) -> RetryStrategy {
        let context_refs = input
            .get("contextRefs")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| {
                input
                    .get("contextImageRefs")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len() as u64)
                    .unwrap_or(0)
            });

        match attempt {
            0 if context_refs > 2 => RetryStrategy {
                kind: StrategyKind::ReduceContext,
                modifications: json!({"reduceContext": true}),
                wait_time_ms: 5000,
                reason: Some("Truncating context references to the first 2".to_string()),
            },
            0 | 1 => {
                let mut rng = rand::rng();
                RetryStrategy {
                    kind: StrategyKind::ChangeSeed,
                    modifications: json!({"seedOffset": rng.random_range(0..1000)}),
                    wait_time_ms: 8000,
                    reason: Some("Regenerating with a different seed".to_string()),
                }
            }
            _ => RetryStrategy {
                kind: StrategyKind::SimplifyPrompt,
                modifications: json!({"simplifyPrompt": true, "clearContext": true}),
                wait_time_ms: 10000,
                reason: Some("Simplifying the prompt and dropping context".to_string()),
            },
        }
    }

    /// Interpret a tool's returned payload.
    pub fn evaluate_result(&self, tool: &str, payload: &Value) -> ResultEval {
        if tool == IMAGE_TOOL {
            if let Some(summary) = payload.get("summary") {
                let total = summary.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
                let failed = summary.get("failed").and_then(|v| v.as_u64()).unwrap_or(0);
                if total > 0 {
                    let succeeded = total - failed.min(total);
                    let failures: Vec<(String, String)> = payload
                        .get("errors")
                        .and_then(|v| v.as_array())
                        .map(|errs| {
                            errs.iter()
                                .map(|e| {
                                    (
                                        e.get("id")
                                            .and_then(|v| v.as_str())
                                            .unwrap_or("unknown")
                                            .to_string(),
                                        e.get("error")
                                            .and_then(|v| v.as_str())
                                            .unwrap_or("unknown error")
                                            .to_string(),
                                    )
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    let succeeded_ids: Vec<String> = payload
                        .get("generated")
                        .and_then(|v| v.as_object())
                        .map(|m| m.keys().cloned().collect())
                        .unwrap_or_default();

                    if succeeded == 0 || (succeeded as f64 / total as f64) < 0.5 {
                        return ResultEval::Failure(format!(
                            "Image generation succeeded for only {}/{} items",
                            succeeded, total
                        ));
                    }
                    if failed > 0 {
                        return ResultEval::Partial {
                            succeeded: succeeded_ids,
                            failed: failures,
                        };
                    }
                    return ResultEval::Success;
                }
            }
        }

        match payload.get("success").and_then(|v| v.as_bool()) {
            Some(true) | None => ResultEval::Success,
            Some(false) => ResultEval::Failure(
                payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Tool reported failure")
                    .to_string(),
            ),
        }
    }
}

/// Strip parenthetical detail and intensifier adverbs, then collapse
/// whitespace. Used by the simplify_prompt strategy.
pub fn simplify_prompt(prompt: &str) -> String {
    let no_parens = Regex::new(r"\([^)]*\)").unwrap().replace_all(prompt, "");
    let no_intensifiers = Regex::new(r"(?i)\b(very|extremely|incredibly|absolutely)\s+")
        .unwrap()
        .replace_all(&no_parens, "");
    let collapsed = Regex::new(r"\s+").unwrap().replace_all(&no_intensifiers, " ");
    let tidy = Regex::new(r"\s+,").unwrap().replace_all(&collapsed, ",");
    tidy.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use serde_json::json;

    fn memory() -> (tempfile::TempDir, Memory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = Memory::load(dir.path()).unwrap();
        (dir, memory)
    }

    #[test]
    fn test_unrecoverable_classifier() {
        assert!(is_unrecoverable("API key invalid"));
        assert!(is_unrecoverable("401 Unauthorized"));
        assert!(is_unrecoverable("Panel not found: panel9"));
        assert!(is_unrecoverable("quota exceeded for project"));
        assert!(!is_unrecoverable("connection reset by peer"));
        assert!(!is_unrecoverable("rate limit hit"));
    }

    #[test]
    fn test_unrecoverable_stops_immediately() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        let decision = engine.decide("generate_panels", "API key invalid", 0, &json!({}), &memory);
        assert!(!decision.should_retry);
        assert_eq!(decision.reason, "Unrecoverable error detected");
        assert!(decision.strategy.is_none());
    }

    #[test]
    fn test_validation_errors_never_retry() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        let decision = engine.decide(
            "edit_content",
            "Validation error: 'panelId' is not a mutable panel field",
            0,
            &json!({}),
            &memory,
        );
        assert!(!decision.should_retry);
        assert!(decision.reason.contains("Validation"));
    }

    #[test]
    fn test_budget_exhaustion() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        // generate_panels has budget 2: attempt index 1 is the last one.
        let decision = engine.decide("generate_panels", "weird error", 1, &json!({}), &memory);
        assert!(!decision.should_retry);
        assert!(decision.reason.contains("exhausted"));
        // Image tool has budget 3: attempt index 1 may still retry.
        let decision = engine.decide(IMAGE_TOOL, "weird error", 1, &json!({}), &memory);
        assert!(decision.should_retry);
    }

    #[test]
    fn test_timeout_strategy_waits_scale() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        let d = engine.decide("generate_dialogue", "request timed out", 0, &json!({}), &memory);
        let s = d.strategy.unwrap();
        assert_eq!(s.kind, StrategyKind::IncreaseTimeout);
        assert_eq!(s.wait_time_ms, 5000);
        assert_eq!(s.modifications["timeoutMultiplier"], 1.5);
    }

    #[test]
    fn test_rate_limit_backoff_doubles() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        let d = engine.decide("generate_dialogue", "rate limit exceeded", 0, &json!({}), &memory);
        assert_eq!(d.strategy.as_ref().unwrap().wait_time_ms, 10000);
        let d = engine.decide(IMAGE_TOOL, "429 too many requests", 1, &json!({}), &memory);
        assert_eq!(d.strategy.as_ref().unwrap().kind, StrategyKind::ChangeSeed);
    }

    #[test]
    fn test_historical_success_applied_when_available() {
        let (_dir, mut memory) = memory();
        memory
            .learn_success("generate_dialogue", &json!({"tone": "dry"}))
            .unwrap();
        let engine = DecisionEngine;
        let d = engine.decide("generate_dialogue", "odd failure", 0, &json!({}), &memory);
        let s = d.strategy.unwrap();
        assert_eq!(s.kind, StrategyKind::UseHistoricalSuccess);
        assert_eq!(s.modifications["tone"], "dry");
    }

    #[test]
    fn test_generic_fallback_perturbs_seed() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;
        let d = engine.decide("generate_dialogue", "odd failure", 0, &json!({}), &memory);
        let s = d.strategy.unwrap();
        assert_eq!(s.kind, StrategyKind::ModifyParameters);
        assert_eq!(s.wait_time_ms, 3000);
        assert!(s.modifications["seedOffset"].as_u64().unwrap() < 1000);
    }

    #[test]
    fn test_image_ladder_by_attempt() {
        let (_dir, memory) = memory();
        let engine = DecisionEngine;

        let d = engine.decide(
            IMAGE_TOOL,
            "generation failed",
            0,
            &json!({"contextRefs": 4}),
            &memory,
        );
        let s = d.strategy.unwrap();
        assert_eq!(s.kind, StrategyKind::ReduceContext);
        assert_eq!(s.wait_time_ms, 5000);

        let d = engine.decide(IMAGE_TOOL, "generation failed", 1, &json!({}), &memory);
        let s = d.strategy.unwrap();
        assert_eq!(s.kind, StrategyKind::ChangeSeed);
        assert_eq!(s.wait_time_ms, 8000);
    }

    #[test]
    fn test_image_ladder_simplifies_last() {
        // Budget is 3, so attempt 2 is terminal; probe the ladder directly.
        let engine = DecisionEngine;
        let s = engine.image_ladder(2, &json!({}));
        assert_eq!(s.kind, StrategyKind::SimplifyPrompt);
        assert_eq!(s.wait_time_ms, 10000);
        assert_eq!(s.modifications["clearContext"], true);
    }

    #[test]
    fn test_simplify_prompt() {
        let input = "A very tall chef (wearing a torn apron) glares, extremely   angry";
        assert_eq!(simplify_prompt(input), "A tall chef glares, angry");
    }

    #[test]
    fn test_evaluate_explicit_failure() {
        let engine = DecisionEngine;
        let eval = engine.evaluate_result(
            "generate_panels",
            &json!({"success": false, "error": "Failed to generate valid panel descriptions"}),
        );
        assert_eq!(
            eval,
            ResultEval::Failure("Failed to generate valid panel descriptions".to_string())
        );
        assert_eq!(
            engine.evaluate_result("generate_panels", &json!({"success": true})),
            ResultEval::Success
        );
    }

    #[test]
    fn test_evaluate_image_batch_outcomes() {
        let engine = DecisionEngine;

        // All failed: hard failure.
        let eval = engine.evaluate_result(
            IMAGE_TOOL,
            &json!({"success": false, "summary": {"total": 8, "failed": 8}, "errors": []}),
        );
        assert!(matches!(eval, ResultEval::Failure(_)));

        // Minority failed: partial, retryable per panel.
        let eval = engine.evaluate_result(
            IMAGE_TOOL,
            &json!({
                "success": true,
                "summary": {"total": 8, "failed": 2},
                "generated": {"panel1": "u1", "panel2": "u2"},
                "errors": [
                    {"id": "panel3", "error": "provider reported status FAILED"},
                    {"id": "panel5", "error": "provider reported status FAILED"}
                ]
            }),
        );
        match eval {
            ResultEval::Partial { failed, .. } => {
                assert_eq!(failed.len(), 2);
                assert_eq!(failed[0].0, "panel3");
            }
            other => panic!("expected partial, got {:?}", other),
        }

        // Majority failed: failure even though some succeeded.
        let eval = engine.evaluate_result(
            IMAGE_TOOL,
            &json!({"success": true, "summary": {"total": 8, "failed": 5}, "errors": []}),
        );
        assert!(matches!(eval, ResultEval::Failure(_)));
    }

    #[test]
    fn test_alternatives() {
        assert_eq!(alternative_for(IMAGE_TOOL), "generate_individually");
        assert_eq!(alternative_for("generate_panels"), "manual_intervention");
    }
}
