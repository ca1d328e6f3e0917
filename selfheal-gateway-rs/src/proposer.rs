// selfheal-gateway-rs/src/proposer.rs
//
// RuleProposer capability: turn one failure (target, payload snapshot,
// error text) into a HealingPlan. Two implementations share the contract:
// - OpenAiProposer: asks an OpenAI-compatible chat-completions endpoint
// - InferenceProposer: deterministic engine, always available
// FallbackProposer composes them in order; the first non-empty plan wins.
//
// Proposers never fail. Anything unusable (provider outage, malformed
// JSON, unparseable payload) degrades to an empty plan, because healing
// must never be less reliable than passthrough.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::inference::InferenceEngine;
use crate::model::{FieldMappings, HealingPlan, Payload};

/// Uniform contract for both learning paths (synchronous convergence loop
/// and the background stream learner). An empty plan means "no suggestion".
#[async_trait]
pub trait RuleProposer: Send + Sync {
    async fn propose(&self, target: &str, payload_json: &str, error: &str) -> HealingPlan;
}

/// Deterministic proposer backed by the InferenceEngine. Unparseable
/// payload JSON degrades to an empty payload rather than an error.
pub struct InferenceProposer {
    engine: InferenceEngine,
}

impl InferenceProposer {
    pub fn new(engine: InferenceEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RuleProposer for InferenceProposer {
    async fn propose(&self, _target: &str, payload_json: &str, error: &str) -> HealingPlan {
        let payload = parse_payload(payload_json);
        self.engine.infer_plan(&payload, error)
    }
}

fn parse_payload(payload_json: &str) -> Payload {
    if payload_json.trim().is_empty() {
        return Payload::new();
    }
    serde_json::from_str::<serde_json::Value>(payload_json)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

// Chat-completions wire subset. The real response carries more fields;
// only "choices" matters here.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Shape the model is instructed to answer with. Unknown keys are
/// ignored; wrong types fail the parse and degrade to "no suggestion".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposalWire {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    field_mappings: FieldMappings,
}

const SYSTEM_PROMPT: &str = "You are an assistant that generates healing rules for failing API calls. \
Given the target integration name, the original payload and the error message, \
you must analyse the error and decide whether an endpoint rewrite or field renames are required. \
Respond with a JSON object containing an optional 'endpoint' field (string) and an optional \
'fieldMappings' object mapping original field names to new field names. If no changes are needed, return {}.";

/// LLM-backed proposer calling an OpenAI-compatible chat-completions API.
pub struct OpenAiProposer {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProposer {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn ask(&self, target: &str, payload_json: &str, error: &str) -> Option<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Target: {}\nPayload: {}\nError: {}\n\nAnalyse the error and propose endpoint and field mapping updates.",
                        target, payload_json, error
                    ),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        let parsed: ChatCompletionResponse = response.json().await.ok()?;
        parsed.choices.into_iter().next().map(|c| c.message.content)
    }
}

#[async_trait]
impl RuleProposer for OpenAiProposer {
    async fn propose(&self, target: &str, payload_json: &str, error: &str) -> HealingPlan {
        let Some(content) = self.ask(target, payload_json, error).await else {
            warn!(target, "LLM proposal call failed or returned no content");
            return HealingPlan::default();
        };
        debug!(target, content = %content, "LLM proposal response");
        parse_proposal(&content)
    }
}

/// Parse free-form model output into a plan. Tolerates surrounding prose
/// and code fences; anything unparseable means "no suggestion".
fn parse_proposal(content: &str) -> HealingPlan {
    let Some(json) = extract_json(content) else {
        return HealingPlan::default();
    };
    match serde_json::from_str::<ProposalWire>(&json) {
        Ok(wire) => HealingPlan::new(
            wire.endpoint.filter(|e| !e.trim().is_empty()),
            wire.field_mappings,
        ),
        Err(err) => {
            warn!(error = %err, "discarding unparseable LLM proposal");
            HealingPlan::default()
        }
    }
}

/// Locate the outermost `{...}` span in model output, stripping markdown
/// fences first.
fn extract_json(content: &str) -> Option<String> {
    let mut c = content.trim();

    if let Some(stripped) = c.strip_prefix("```json") {
        c = stripped;
    } else if let Some(stripped) = c.strip_prefix("```") {
        c = stripped;
    }
    c = c.trim_end_matches("```").trim();

    if c.starts_with('{') && c.ends_with('}') {
        return Some(c.to_string());
    }

    let first = c.find('{')?;
    let last = c.rfind('}')?;
    if last > first {
        return Some(c[first..=last].trim().to_string());
    }
    None
}

/// Ordered fallback composite: try each proposer in turn and return the
/// first non-empty plan.
pub struct FallbackProposer {
    chain: Vec<Arc<dyn RuleProposer>>,
}

impl FallbackProposer {
    pub fn new(chain: Vec<Arc<dyn RuleProposer>>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl RuleProposer for FallbackProposer {
    async fn propose(&self, target: &str, payload_json: &str, error: &str) -> HealingPlan {
        for (idx, proposer) in self.chain.iter().enumerate() {
            let plan = proposer.propose(target, payload_json, error).await;
            if !plan.is_empty() {
                return plan;
            }
            if idx + 1 < self.chain.len() {
                info!(target, "proposer returned nothing, falling back");
            }
        }
        HealingPlan::default()
    }
}

/// Build the proposer stack from configuration: LLM first when an API key
/// is present, deterministic engine always last.
pub fn build_proposer(
    openai_api_key: Option<&str>,
    openai_api_url: &str,
    openai_model: &str,
) -> Arc<dyn RuleProposer> {
    let deterministic: Arc<dyn RuleProposer> = Arc::new(InferenceProposer::new(InferenceEngine::new()));
    match openai_api_key {
        Some(key) => Arc::new(FallbackProposer::new(vec![
            Arc::new(OpenAiProposer::new(openai_api_url, key, openai_model)),
            deterministic,
        ])),
        None => deterministic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inference_proposer_degrades_on_bad_payload_json() {
        let proposer = InferenceProposer::new(InferenceEngine::new());
        let plan = proposer
            .propose("v1/orders", "{not json", "use /v2/createOrder")
            .await;
        // Endpoint extraction needs no payload; mappings do.
        assert_eq!(plan.endpoint.as_deref(), Some("/v2/createOrder"));
        assert!(plan.field_mappings.is_empty());
    }

    #[tokio::test]
    async fn inference_proposer_maps_fields_from_payload_json() {
        let proposer = InferenceProposer::new(InferenceEngine::new());
        let plan = proposer
            .propose(
                "v1/orders",
                r#"{"custName":"vikas","custAge":10}"#,
                "Use /v2/createOrder with fields { name, age }",
            )
            .await;
        assert_eq!(plan.field_mappings.get("custName").map(String::as_str), Some("name"));
        assert_eq!(plan.field_mappings.get("custAge").map(String::as_str), Some("age"));
    }

    #[test]
    fn extract_json_handles_fenced_output() {
        let content = "```json\n{\"endpoint\": \"/v2/x\"}\n```";
        assert_eq!(extract_json(content).as_deref(), Some("{\"endpoint\": \"/v2/x\"}"));
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let content = "Here is my suggestion: {\"endpoint\": \"/v2/x\"} hope it helps";
        assert_eq!(extract_json(content).as_deref(), Some("{\"endpoint\": \"/v2/x\"}"));
    }

    #[test]
    fn extract_json_returns_none_without_object() {
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn parse_proposal_reads_endpoint_and_mappings() {
        let plan = parse_proposal(r#"{"endpoint":"/v2/x","fieldMappings":{"custId":"customer_id"}}"#);
        assert_eq!(plan.endpoint.as_deref(), Some("/v2/x"));
        assert_eq!(plan.field_mappings.get("custId").map(String::as_str), Some("customer_id"));
    }

    #[test]
    fn parse_proposal_treats_garbage_as_no_suggestion() {
        assert!(parse_proposal("the model rambled with no json").is_empty());
        assert!(parse_proposal(r#"{"endpoint": 42}"#).is_empty());
        assert!(parse_proposal("{}").is_empty());
    }

    struct FixedProposer(HealingPlan);

    #[async_trait]
    impl RuleProposer for FixedProposer {
        async fn propose(&self, _t: &str, _p: &str, _e: &str) -> HealingPlan {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn fallback_skips_empty_proposals() {
        let mut mappings = FieldMappings::new();
        mappings.insert("custAge".to_string(), "age".to_string());
        let second = HealingPlan::new(None, mappings);

        let composite = FallbackProposer::new(vec![
            Arc::new(FixedProposer(HealingPlan::default())),
            Arc::new(FixedProposer(second.clone())),
        ]);

        let plan = composite.propose("t", "{}", "err").await;
        assert_eq!(plan, second);
    }

    #[tokio::test]
    async fn fallback_prefers_the_first_non_empty_plan() {
        let first = HealingPlan::new(Some("/v2/a".to_string()), FieldMappings::new());
        let second = HealingPlan::new(Some("/v2/b".to_string()), FieldMappings::new());

        let composite = FallbackProposer::new(vec![
            Arc::new(FixedProposer(first.clone())),
            Arc::new(FixedProposer(second)),
        ]);

        let plan = composite.propose("t", "{}", "err").await;
        assert_eq!(plan, first);
    }
}
