use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use flowdeck_core::config::ExecutionConfig;
use flowdeck_core::context::ExecutionContext;
use flowdeck_core::error::Result;
use flowdeck_core::traits::StepExecutor;
use flowdeck_core::types::{ElementType, StepResult, Variant, WorkflowElement};

const DEFAULT_LOOP_ITERATIONS: u64 = 3;
const PROMPT_PREVIEW_CHARS: usize = 50;

/// Executor that fakes each element's work: it sleeps for a random delay and
/// then synthesizes a result shaped by the element type.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    min_delay: Duration,
    max_delay: Duration,
    pass_rate: f64,
}

impl SimulatedExecutor {
    pub fn new(min_delay: Duration, max_delay: Duration, pass_rate: f64) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            pass_rate: pass_rate.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ExecutionConfig, variant: Variant) -> Self {
        let (min, max) = config.delay_range(variant);
        Self::new(
            Duration::from_millis(min),
            Duration::from_millis(max),
            config.pass_rate(),
        )
    }

    /// No delay at all. Outcomes stay randomized.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.7)
    }

    pub fn with_pass_rate(mut self, pass_rate: f64) -> Self {
        self.pass_rate = pass_rate.clamp(0.0, 1.0);
        self
    }

    fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Build the result for an element without waiting.
    pub fn simulate(&self, element: &WorkflowElement) -> StepResult {
        let mut rng = rand::thread_rng();
        match element.kind {
            ElementType::Action => StepResult::Action {
                status: "completed".to_string(),
                output: format!("Action \"{}\" executed", element.label),
                timestamp: Utc::now().to_rfc3339(),
            },
            ElementType::Condition => {
                let passed = rng.gen_bool(self.pass_rate);
                let condition = element.config_str("condition").unwrap_or("true").to_string();
                StepResult::Condition {
                    passed,
                    message: format!(
                        "Condition \"{}\" {}",
                        condition,
                        if passed { "passed" } else { "failed" }
                    ),
                    condition,
                }
            }
            ElementType::Loop => {
                let iterations = loop_iterations(element.config.get("iterations"));
                StepResult::Loop {
                    iterations,
                    completed: true,
                    message: format!("Loop completed {} iterations", iterations),
                }
            }
            ElementType::Api => StepResult::Api {
                endpoint: element
                    .config_str("endpoint")
                    .filter(|e| !e.is_empty())
                    .unwrap_or("/api/mock")
                    .to_string(),
                status: 200,
                data: json!({
                    "message": "Mock API response",
                    "timestamp": Utc::now().to_rfc3339(),
                }),
                response_time_ms: rng.gen_range(100..600),
            },
            ElementType::Llm => {
                let prompt = element.config_str("prompt").unwrap_or_default();
                StepResult::Agent(format!(
                    "LLM agent \"{}\" processed: \"{}\" → generated response with context analysis",
                    element.label,
                    preview(prompt)
                ))
            }
            ElementType::Tool => StepResult::Agent("Mock tool response".to_string()),
            ElementType::Memory => StepResult::Agent(format!(
                "Memory updated: stored context from \"{}\"",
                element.label
            )),
            ElementType::Unknown => StepResult::unknown(),
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default(), Variant::Generic)
    }
}

impl StepExecutor for SimulatedExecutor {
    fn execute(
        &self,
        element: WorkflowElement,
        context: ExecutionContext,
    ) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let delay = self.delay();
            debug!(
                element = %element.id,
                kind = %element.kind,
                delay_ms = delay.as_millis() as u64,
                prior_results = context.len(),
                "Simulating step"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self.simulate(&element))
        })
    }
}

/// Accept a positive integer or a numeric string; anything else means the default.
fn loop_iterations(value: Option<&Value>) -> u64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.filter(|n| *n > 0).unwrap_or(DEFAULT_LOOP_ITERATIONS)
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_result() {
        let el = WorkflowElement::with_id("action-1", ElementType::Action, "Fetch Data");
        match SimulatedExecutor::instant().simulate(&el) {
            StepResult::Action { status, output, .. } => {
                assert_eq!(status, "completed");
                assert_eq!(output, "Action \"Fetch Data\" executed");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_condition_follows_pass_rate() {
        let el = WorkflowElement::with_id("condition-1", ElementType::Condition, "Check")
            .with_config("condition", json!("x > 1"));

        let always = SimulatedExecutor::instant().with_pass_rate(1.0);
        let never = SimulatedExecutor::instant().with_pass_rate(0.0);
        for _ in 0..10 {
            assert!(matches!(always.simulate(&el), StepResult::Condition { passed: true, .. }));
            assert!(matches!(never.simulate(&el), StepResult::Condition { passed: false, .. }));
        }
        let value = always.simulate(&el).to_value();
        assert_eq!(value["condition"], "x > 1");
    }

    #[test]
    fn test_loop_iterations_parsing() {
        assert_eq!(loop_iterations(Some(&json!(5))), 5);
        assert_eq!(loop_iterations(Some(&json!("7"))), 7);
        assert_eq!(loop_iterations(Some(&json!(0))), 3);
        assert_eq!(loop_iterations(Some(&json!("many"))), 3);
        assert_eq!(loop_iterations(None), 3);
    }

    #[test]
    fn test_api_defaults() {
        let el = WorkflowElement::with_id("api-1", ElementType::Api, "Call");
        let value = SimulatedExecutor::instant().simulate(&el).to_value();
        assert_eq!(value["endpoint"], "/api/mock");
        assert_eq!(value["status"], 200);
        assert_eq!(value["data"]["message"], "Mock API response");
        let ms = value["responseTime"].as_u64().unwrap();
        assert!((100..600).contains(&ms));
    }

    #[test]
    fn test_llm_prompt_preview() {
        let long = "x".repeat(80);
        let el = WorkflowElement::with_id("llm-1", ElementType::Llm, "Writer")
            .with_config("prompt", json!(long));
        let text = SimulatedExecutor::instant().simulate(&el).summary();
        assert!(text.starts_with("LLM agent \"Writer\" processed: \""));
        assert!(text.contains(&format!("{}...", "x".repeat(50))));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_agent_tool_and_memory() {
        let exec = SimulatedExecutor::instant();
        let tool = WorkflowElement::with_id("tool-1", ElementType::Tool, "Search");
        let memory = WorkflowElement::with_id("memory-1", ElementType::Memory, "Notes");
        assert_eq!(exec.simulate(&tool), StepResult::Agent("Mock tool response".into()));
        assert_eq!(
            exec.simulate(&memory).summary(),
            "Memory updated: stored context from \"Notes\""
        );
    }

    #[test]
    fn test_unknown_type_fails_open() {
        let el = WorkflowElement::with_id("x-1", ElementType::Unknown, "Mystery");
        assert_eq!(SimulatedExecutor::instant().simulate(&el), StepResult::unknown());
    }

    #[test]
    fn test_delay_bounds() {
        let exec = SimulatedExecutor::new(Duration::from_millis(10), Duration::from_millis(5), 0.5);
        assert_eq!(exec.delay(), Duration::from_millis(10));

        let exec = SimulatedExecutor::from_config(&ExecutionConfig::default(), Variant::Agent);
        for _ in 0..20 {
            let d = exec.delay();
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_execute_resolves() {
        let el = WorkflowElement::with_id("tool-1", ElementType::Tool, "Search");
        let result = SimulatedExecutor::instant()
            .execute(el, ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(result.summary(), "Mock tool response");
    }
}
