// selfheal-gateway-rs/src/orchestrator.rs
//
// Per-request convergence loop: apply known rules, call upstream, and on
// a structured rejection learn a correction, persist it, and retry -
// bounded. Stateless across requests; all memory lives in the rule store.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::model::{
    normalize_target, FieldMappings, Payload, SmartCallRequest, SmartCallResponse,
};
use crate::proposer::RuleProposer;
use crate::store::{RuleStore, StoreError};
use crate::upstream::{UpstreamClient, UpstreamOutcome};

/// Attempt budget for one request. Each failed attempt can learn new
/// rules, so the loop can converge across attempts; three is enough for
/// an endpoint rewrite plus a round of field renames.
pub const MAX_ATTEMPTS: usize = 3;

pub struct ConvergenceOrchestrator {
    store: Arc<dyn RuleStore>,
    upstream: Arc<dyn UpstreamClient>,
    proposer: Arc<dyn RuleProposer>,
    default_timeout_ms: u64,
}

impl ConvergenceOrchestrator {
    pub fn new(
        store: Arc<dyn RuleStore>,
        upstream: Arc<dyn UpstreamClient>,
        proposer: Arc<dyn RuleProposer>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            upstream,
            proposer,
            default_timeout_ms,
        }
    }

    /// Run the bounded convergence loop for one request.
    ///
    /// Store faults propagate as errors (losing a learned rule silently
    /// would be worse than failing loudly); every other failure mode
    /// folds into an error-status response body.
    #[instrument(name = "smart_call", skip(self, request), fields(target = %request.target))]
    pub async fn handle_smart_call(
        &self,
        request: SmartCallRequest,
    ) -> Result<SmartCallResponse, StoreError> {
        // The original target stays constant across attempts: it is the
        // key rules are looked up and stored under, so every future call
        // to the same logical target benefits from what this one learns.
        let base_target = request.target.clone();
        let timeout_ms = request
            .options
            .as_ref()
            .and_then(|o| o.timeout_ms)
            .unwrap_or(self.default_timeout_ms);

        let mut current_payload = request.payload;
        let mut any_healing_applied = false;
        let mut learned_anything = false;
        let mut last_status: u16 = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            // 1) Resolve the endpoint: learned rewrite if present, else
            //    the raw target unmodified.
            let endpoint = self
                .store
                .get_endpoint_rule(&base_target)
                .await?
                .unwrap_or_else(|| base_target.clone());

            // 2) Apply persisted field mappings to the payload.
            let mappings = self.store.get_field_mappings(&base_target).await?;
            let healed_payload = apply_field_mappings(&current_payload, &mappings);

            let endpoint_healed = endpoint != base_target;
            let fields_healed = healed_payload != current_payload;
            any_healing_applied = any_healing_applied || endpoint_healed || fields_healed;

            info!(
                attempt,
                target = %base_target,
                endpoint = %endpoint,
                endpoint_healed,
                fields_healed,
                "smart-call attempt"
            );

            // 3) Invoke the upstream with the resolved endpoint and
            //    mapped payload.
            match self
                .upstream
                .call(&endpoint, &healed_payload, timeout_ms)
                .await
            {
                UpstreamOutcome::Success(data) => {
                    return Ok(SmartCallResponse::success(
                        any_healing_applied,
                        any_healing_applied.then(|| base_target.clone()),
                        data,
                    ));
                }

                UpstreamOutcome::Rejected { status, body } => {
                    last_status = status;

                    // The failure event is recorded unconditionally so
                    // the async learner sees it even if synchronous
                    // inference comes up empty.
                    self.store
                        .append_failure_event(&base_target, &healed_payload, &body)
                        .await?;

                    // 4) Synchronous learning from the rejection body.
                    let payload_json = serde_json::to_string(&healed_payload)
                        .unwrap_or_else(|_| "{}".to_string());
                    let plan = self
                        .proposer
                        .propose(&normalize_target(&base_target), &payload_json, &body)
                        .await;

                    // Nothing new to try: stop immediately rather than
                    // repeating an attempt that cannot go differently.
                    if plan.is_empty() {
                        return Ok(SmartCallResponse::error(
                            any_healing_applied,
                            any_healing_applied.then(|| base_target.clone()),
                            format!("Upstream API error: {}", status),
                        ));
                    }

                    // 5) Persist endpoint + mappings together.
                    self.store.save_plan_atomic(&base_target, &plan).await?;
                    learned_anything = true;
                    info!(target = %base_target, plan = ?plan, "learned healing plan");

                    // 6) Fold the learned field mappings into the
                    //    in-memory payload for the next attempt. The
                    //    endpoint is intentionally not applied in memory:
                    //    the next iteration re-reads it from the store,
                    //    which stays the single source of truth.
                    current_payload =
                        apply_learned_mappings(&healed_payload, &plan.field_mappings);
                }

                UpstreamOutcome::Transport(message) => {
                    // No structured error text to learn from: record the
                    // failure and stop.
                    warn!(target = %base_target, error = %message, "transport-level upstream failure");
                    self.store
                        .append_failure_event(&base_target, &healed_payload, &message)
                        .await?;
                    return Ok(SmartCallResponse::error(
                        any_healing_applied,
                        any_healing_applied.then(|| base_target.clone()),
                        format!("Unexpected error: {}", message),
                    ));
                }
            }
        }

        // Retry budget exhausted.
        let message = if learned_anything {
            format!(
                "Upstream API error: {} (healing attempted, max retries reached)",
                last_status
            )
        } else {
            format!("Upstream API error: {}", last_status)
        };
        Ok(SmartCallResponse::error(
            any_healing_applied,
            any_healing_applied.then(|| base_target.clone()),
            message,
        ))
    }
}

/// Rename payload keys according to persisted mappings. A mapping whose
/// source key is absent is a no-op; mappings are disjoint by construction
/// so application order does not matter.
pub fn apply_field_mappings(payload: &Payload, mappings: &FieldMappings) -> Payload {
    if mappings.is_empty() {
        return payload.clone();
    }
    let mut out = payload.clone();
    for (from, to) in mappings {
        let from = from.trim();
        let to = to.trim();
        if from.is_empty() || to.is_empty() {
            continue;
        }
        if let Some(value) = out.remove(from) {
            out.insert(to.to_string(), value);
        }
    }
    out
}

/// Fold freshly learned mappings into the in-memory payload. Unlike the
/// persisted-mapping pass, the target key may already exist here (the
/// upstream may have partially accepted earlier renames), so a rename
/// whose target key is occupied drops the source key instead of
/// overwriting.
pub fn apply_learned_mappings(payload: &Payload, mappings: &FieldMappings) -> Payload {
    if mappings.is_empty() {
        return payload.clone();
    }
    let mut out = payload.clone();
    for (from, to) in mappings {
        let from = from.trim();
        let to = to.trim();
        if from.is_empty() || to.is_empty() {
            continue;
        }
        if out.contains_key(from) {
            if out.contains_key(to) {
                out.remove(from);
            } else if let Some(value) = out.remove(from) {
                out.insert(to.to_string(), value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_of(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn mapping_application_renames_present_keys() {
        let payload = payload_of(json!({"custName": "vikas", "custAge": 10}));
        let mut mappings = FieldMappings::new();
        mappings.insert("custName".to_string(), "name".to_string());
        mappings.insert("custAge".to_string(), "age".to_string());
        mappings.insert("absent".to_string(), "other".to_string());

        let out = apply_field_mappings(&payload, &mappings);
        assert_eq!(out, payload_of(json!({"name": "vikas", "age": 10})));
    }

    #[test]
    fn mapping_application_is_idempotent_once_sources_are_gone() {
        let payload = payload_of(json!({"name": "vikas", "age": 10}));
        let mut mappings = FieldMappings::new();
        mappings.insert("custName".to_string(), "name".to_string());
        mappings.insert("custAge".to_string(), "age".to_string());

        let once = apply_field_mappings(&payload, &mappings);
        let twice = apply_field_mappings(&once, &mappings);
        assert_eq!(once, payload);
        assert_eq!(twice, payload);
    }

    #[test]
    fn learned_mapping_drops_source_when_target_exists() {
        let payload = payload_of(json!({"custName": "old", "name": "new"}));
        let mut mappings = FieldMappings::new();
        mappings.insert("custName".to_string(), "name".to_string());

        let out = apply_learned_mappings(&payload, &mappings);
        assert_eq!(out, payload_of(json!({"name": "new"})));
    }
}
