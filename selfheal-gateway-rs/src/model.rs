// selfheal-gateway-rs/src/model.rs
//
// Wire DTOs and core value types for the self-healing gateway:
// - SmartCallRequest / SmartCallResponse / CallOptions (HTTP surface)
// - HealingPlan (one learned correction: endpoint rewrite + field renames)
// - target normalization (the sole key used to address rules)

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Untyped JSON payload. Insertion order is preserved so that field
/// renames are observable in the order the caller sent them.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Ordered rename rules: original field name -> upstream-expected name.
pub type FieldMappings = IndexMap<String, String>;

/// Normalize a logical target name. Idempotent: trims surrounding
/// whitespace and strips leading slashes so "/v1/orders" and "v1/orders"
/// resolve to the same rules.
pub fn normalize_target(target: &str) -> String {
    target.trim().trim_start_matches('/').to_string()
}

/// Incoming request for the smart-call endpoint. The client names a
/// logical target, provides the JSON payload to forward, and may tune
/// the underlying HTTP call via `options`.
#[derive(Debug, Clone, Deserialize)]
pub struct SmartCallRequest {
    /// Logical name of the external integration, e.g. "v1/orders".
    /// Rules in the store are keyed off the normalized form of this value.
    pub target: String,

    /// Body to send upstream. Represented as an untyped map so field
    /// names can be adjusted by healing rules.
    pub payload: Payload,

    /// Optional settings for the underlying HTTP call.
    #[serde(default)]
    pub options: Option<CallOptions>,
}

/// Optional per-request settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOptions {
    /// Maximum time (milliseconds) to wait for the upstream response.
    /// Falls back to the configured default when absent.
    pub timeout_ms: Option<u64>,

    /// Accepted for API compatibility; the convergence loop is bounded
    /// by its own fixed attempt budget.
    pub retries: Option<u32>,
}

/// Response returned by the smart-call endpoint. Mirrors the upstream
/// response but adds metadata about whether healing was applied. The
/// transport status is always 200; `status` inside the body conveys the
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartCallResponse {
    /// "success" or "error".
    pub status: String,
    /// True if any rewrite (endpoint or fields) was applied this request.
    pub healed: bool,
    /// Identifier of the applied rule set (the original target), surfaced
    /// only when healed.
    pub applied_rule_id: Option<String>,
    /// Upstream response body on success.
    pub data: Option<serde_json::Value>,
    /// Human-readable error description, if any.
    pub message: Option<String>,
}

impl SmartCallResponse {
    pub fn success(healed: bool, rule_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            status: "success".to_string(),
            healed,
            applied_rule_id: rule_id,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(healed: bool, rule_id: Option<String>, message: String) -> Self {
        Self {
            status: "error".to_string(),
            healed,
            applied_rule_id: rule_id,
            data: None,
            message: Some(message),
        }
    }
}

/// One learned correction, inferred from a single failure. It can carry
/// a corrected endpoint, field renames, or both. An empty plan is the
/// canonical "nothing to learn" signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingPlan {
    /// Corrected endpoint, e.g. "/v2/createOrder". None = no rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Rename rules: wrong field name -> expected field name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub field_mappings: FieldMappings,
}

impl HealingPlan {
    pub fn new(endpoint: Option<String>, field_mappings: FieldMappings) -> Self {
        Self {
            endpoint,
            field_mappings,
        }
    }

    /// A plan is empty iff the endpoint is absent/blank and there are no
    /// field mappings. Empty plans are never persisted.
    pub fn is_empty(&self) -> bool {
        self.endpoint
            .as_deref()
            .map_or(true, |e| e.trim().is_empty())
            && self.field_mappings.is_empty()
    }
}

// IndexMap does not implement Hash; plans are hashed over the endpoint
// plus mappings in insertion order so they can be deduplicated during
// learning.
impl Hash for HealingPlan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
        for (from, to) in &self.field_mappings {
            from.hash(state);
            to.hash(state);
        }
    }
}
