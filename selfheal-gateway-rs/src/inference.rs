// selfheal-gateway-rs/src/inference.rs
//
// Deterministic rule inference: a pure function from (payload, error text)
// to a HealingPlan. No I/O, no state. It exists so healing works without
// any LLM provider configured, and as the fallback when the provider
// returns nothing usable.
//
// Three independent extractions are combined into one plan:
// 1) endpoint: "... Use /v2/createOrder ..."
// 2) expected fields: "fields { name, age }" / "expects: name, age" /
//    repeated "Missing or invalid field: X"
// 3) field mappings: fuzzy-match payload keys against expected fields

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{FieldMappings, HealingPlan, Payload};

/// Matches "Use /v2/something" (case-insensitive). Group 1 captures the
/// path or URL token after "use"; the trailing boundary keeps
/// sentence-final punctuation out of the capture.
static USE_ENDPOINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\buse\s+([/A-Za-z0-9._:-]+)\b").expect("valid regex"));

/// Matches a "fields { name, age }" or "field { ... }" brace group.
static FIELDS_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fields?\s*\{([^}]*)\}").expect("valid regex"));

/// Matches an "expects: name, age" / "expect name,age" clause.
static EXPECTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)expects?\s*:?\s*([A-Za-z0-9_,\s\-]+)").expect("valid regex"));

/// Matches single missing-field complaints, e.g.
/// "Missing or invalid field: name" or "Missing required field: age".
static MISSING_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bmissing(?:\s+or\s+invalid)?(?:\s+required)?\s+field\s*:?\s*([A-Za-z0-9_]+)")
        .expect("valid regex")
});

/// Stoplist of ownership prefixes that carry no matching signal:
/// "custAge" and "age" should compare equal after stripping.
static STOPLIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(customer|cust|client|user|usr)\b").expect("valid regex"));

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9\s]").expect("valid regex"));

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z])([A-Z])").expect("valid regex"));

/// Minimum similarity score for a payload key to be mapped onto an
/// expected field. Below this, no mapping is emitted.
const MIN_MAPPING_SCORE: i32 = 2;

/// Deterministic inference engine. Stateless; cheap to share.
#[derive(Debug, Default, Clone, Copy)]
pub struct InferenceEngine;

impl InferenceEngine {
    pub fn new() -> Self {
        Self
    }

    /// Derive a healing plan from the payload that was sent and the error
    /// text the upstream returned. Returns an empty plan when nothing can
    /// be inferred.
    pub fn infer_plan(&self, payload: &Payload, error: &str) -> HealingPlan {
        let endpoint = infer_endpoint(error);
        let expected = infer_expected_fields(error);
        let field_mappings = infer_field_mappings(payload, &expected);

        let mut plan = HealingPlan::default();
        if let Some(e) = endpoint {
            if !e.trim().is_empty() {
                plan.endpoint = Some(e.trim().to_string());
            }
        }
        if !field_mappings.is_empty() {
            plan.field_mappings = field_mappings;
        }
        plan
    }
}

/// Search the error text for an endpoint suggestion following "use".
/// Relative paths gain a leading slash; absolute URLs pass through.
fn infer_endpoint(error: &str) -> Option<String> {
    if error.trim().is_empty() {
        return None;
    }
    let caps = USE_ENDPOINT.captures(error)?;
    let candidate = caps.get(1)?.as_str();
    if !candidate.starts_with("http") && !candidate.starts_with('/') {
        Some(format!("/{}", candidate))
    } else {
        Some(candidate.to_string())
    }
}

/// Extract the upstream-expected field names, trying patterns in strict
/// priority order and stopping at the first that matches:
/// 1. brace group, 2. expects clause, 3. all missing-field occurrences.
/// Insertion order is preserved; duplicates are dropped.
fn infer_expected_fields(error: &str) -> Vec<String> {
    if let Some(caps) = FIELDS_BRACES.captures(error) {
        return split_field_list(caps.get(1).map_or("", |m| m.as_str()));
    }

    if let Some(caps) = EXPECTS.captures(error) {
        return split_field_list(caps.get(1).map_or("", |m| m.as_str()));
    }

    let mut collected = Vec::new();
    for caps in MISSING_FIELD.captures_iter(error) {
        if let Some(m) = caps.get(1) {
            let field = m.as_str().trim();
            if !field.is_empty() && !collected.iter().any(|f| f == field) {
                collected.push(field.to_string());
            }
        }
    }
    collected
}

/// Break "name, age" (or newline-separated lists) into an ordered,
/// deduplicated list of field names, stripping quote/brace leftovers.
fn split_field_list(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in raw.split(|c| c == ',' || c == '\n') {
        let field: String = part
            .chars()
            .filter(|c| !matches!(c, '"' | '\'' | '{' | '}'))
            .collect();
        let field = field.trim();
        if !field.is_empty() && !out.iter().any(|f| f == field) {
            out.push(field.to_string());
        }
    }
    out
}

/// For each expected field missing from the payload, pick the best-scoring
/// payload key as its rename source. Assignment is greedy-unique: a key
/// claimed for an earlier expected field is out of candidacy for later
/// ones, so two expected fields never rename the same source.
fn infer_field_mappings(payload: &Payload, expected_fields: &[String]) -> FieldMappings {
    let mut mappings = FieldMappings::new();
    if payload.is_empty() || expected_fields.is_empty() {
        return mappings;
    }

    for expected in expected_fields {
        let expected = expected.trim();
        if expected.is_empty() || payload.contains_key(expected) {
            continue;
        }

        let mut best: Option<&str> = None;
        let mut best_score = -1;
        for candidate in payload.keys() {
            if mappings.contains_key(candidate.as_str()) {
                continue;
            }
            let score = similarity_score(candidate, expected);
            if score > best_score {
                best_score = score;
                best = Some(candidate);
            }
        }

        if let Some(best) = best {
            if best_score >= MIN_MAPPING_SCORE {
                mappings.insert(best.to_string(), expected.to_string());
            }
        }
    }
    mappings
}

/// Token-based similarity between two field names. 2 points per shared
/// token, plus 1 when one concatenated form contains the other. 0 when
/// either side normalizes to nothing.
fn similarity_score(a: &str, b: &str) -> i32 {
    let ta = normalize_tokens(a);
    let tb = normalize_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0;
    }

    let mut score = 0;
    for t in &ta {
        if tb.contains(t) {
            score += 2;
        }
    }

    let na = ta.concat();
    let nb = tb.concat();
    if na.contains(&nb) || nb.contains(&na) {
        score += 1;
    }
    score
}

/// Normalize a field name into comparable tokens: split camel-case
/// boundaries, map "_"/"-" to spaces, lowercase, strip the ownership
/// stoplist and non-alphanumerics, split on whitespace.
fn normalize_tokens(s: &str) -> Vec<String> {
    let x = s.trim();
    if x.is_empty() {
        return Vec::new();
    }

    let x = CAMEL_BOUNDARY.replace_all(x, "$1 $2");
    let x = x.replace(['_', '-'], " ").to_lowercase();
    let x = STOPLIST.replace_all(&x, " ");
    let x = NON_ALNUM.replace_all(&x, " ");

    x.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_of(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn infers_endpoint_and_mappings_from_deprecation_error() {
        let payload = payload_of(json!({"custName": "vikas", "custAge": 10}));
        let error = "Request url is deprecated. Use /v2/createOrder with fields { name, age }";

        let plan = InferenceEngine::new().infer_plan(&payload, error);

        assert_eq!(plan.endpoint.as_deref(), Some("/v2/createOrder"));
        assert_eq!(plan.field_mappings.get("custName").map(String::as_str), Some("name"));
        assert_eq!(plan.field_mappings.get("custAge").map(String::as_str), Some("age"));
    }

    #[test]
    fn relative_endpoint_gains_leading_slash() {
        let plan = InferenceEngine::new().infer_plan(&Payload::new(), "deprecated, use v2/createOrder");
        assert_eq!(plan.endpoint.as_deref(), Some("/v2/createOrder"));
    }

    #[test]
    fn absolute_endpoint_passes_through() {
        let plan = InferenceEngine::new()
            .infer_plan(&Payload::new(), "please use http://api.vendor.com/v2/orders instead");
        assert_eq!(plan.endpoint.as_deref(), Some("http://api.vendor.com/v2/orders"));
    }

    #[test]
    fn trailing_punctuation_is_not_part_of_the_endpoint() {
        let plan = InferenceEngine::new()
            .infer_plan(&Payload::new(), "Request url is deprecated. Use /v2/createOrder.");
        assert_eq!(plan.endpoint.as_deref(), Some("/v2/createOrder"));
    }

    #[test]
    fn only_first_use_match_is_taken() {
        let plan = InferenceEngine::new()
            .infer_plan(&Payload::new(), "use /v2/orders or use /v3/orders");
        assert_eq!(plan.endpoint.as_deref(), Some("/v2/orders"));
    }

    #[test]
    fn brace_group_takes_priority_over_expects() {
        let fields = infer_expected_fields("expects: other. fields { name, age }");
        assert_eq!(fields, vec!["name", "age"]);
    }

    #[test]
    fn expects_clause_is_used_without_brace_group() {
        let fields = infer_expected_fields("endpoint expects: name, age");
        assert_eq!(fields, vec!["name", "age"]);
    }

    #[test]
    fn collects_all_missing_field_occurrences_in_order() {
        let error = r#"{"error":"Missing or invalid field: name"} and also Missing required field: age"#;
        let fields = infer_expected_fields(error);
        assert_eq!(fields, vec!["name", "age"]);
    }

    #[test]
    fn field_list_split_strips_quotes_and_dedups() {
        let fields = split_field_list(" \"name\", 'age'\n name ");
        assert_eq!(fields, vec!["name", "age"]);
    }

    #[test]
    fn cust_prefix_is_stripped_before_matching() {
        assert!(similarity_score("custAge", "age") >= 2);
        assert!(similarity_score("customer_id", "id") >= 2);
        assert_eq!(similarity_score("qty", "name"), 0);
    }

    #[test]
    fn no_mapping_when_payload_already_has_expected_key() {
        let payload = payload_of(json!({"name": "vikas"}));
        let mappings = infer_field_mappings(&payload, &["name".to_string()]);
        assert!(mappings.is_empty());
    }

    #[test]
    fn low_scoring_candidates_are_not_mapped() {
        let payload = payload_of(json!({"qty": 3}));
        let mappings = infer_field_mappings(&payload, &["name".to_string()]);
        assert!(mappings.is_empty());
    }

    #[test]
    fn claimed_keys_are_not_reused_for_later_fields() {
        // "custName" is the best candidate for "name"; once claimed it must
        // not also be picked for a second similar expected field.
        let payload = payload_of(json!({"custName": "vikas"}));
        let expected = vec!["name".to_string(), "userName".to_string()];
        let mappings = infer_field_mappings(&payload, &expected);

        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.get("custName").map(String::as_str), Some("name"));
    }

    #[test]
    fn unparseable_error_yields_empty_plan() {
        let payload = payload_of(json!({"custName": "vikas"}));
        let plan = InferenceEngine::new().infer_plan(&payload, "internal server error");
        assert!(plan.is_empty());
    }
}
