// selfheal-gateway-rs/src/store.rs
//
// Rule persistence and the failure-event log.
//
// Storage model (per normalized target):
// 1) Endpoint rewrite (string key/value):
//      selfheal:<target>:endpoint -> "/v2/createOrder"
// 2) Field mappings (hash):
//      selfheal:<target>:field-mappings -> { custName: name, custAge: age }
// 3) Failure stream (append-only log, consumed by the stream learner):
//      selfheal:failures (configurable) with fields target/payloadJson/error/ts
//
// Two backends share the RuleStore trait: RedisRuleStore for deployments
// and MemoryRuleStore for tests and store-less development. The trait is
// dyn-compatible so components hold Arc<dyn RuleStore>.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{normalize_target, FieldMappings, HealingPlan, Payload};

const KEY_PREFIX: &str = "selfheal:";

/// Store-level error. Persistence failures are never swallowed into a
/// healed response; callers decide whether to propagate them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One record appended to the failure log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    /// Normalized target the failed call addressed.
    pub target: String,
    /// Serialized payload snapshot as sent upstream.
    pub payload_json: String,
    /// Upstream error text (or transport error message).
    pub error: String,
    /// Epoch millis at append time.
    pub ts: i64,
}

/// A failure event as delivered to a consumer, carrying the log record id
/// needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct FailureDelivery {
    pub id: String,
    pub event: FailureEvent,
}

/// Durable rule storage plus the failure-event log. All rule operations
/// address rules by the normalized target, so textually different inputs
/// that normalize equal resolve to the same rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Endpoint rewrite rule for a target, if one has been learned.
    /// Blank stored values read back as None.
    async fn get_endpoint_rule(&self, target: &str) -> Result<Option<String>, StoreError>;

    /// Persist an endpoint rewrite. No-op when target or endpoint is blank.
    async fn save_endpoint_rule(&self, target: &str, endpoint: &str) -> Result<(), StoreError>;

    /// All field mappings for a target; empty when none exist.
    async fn get_field_mappings(&self, target: &str) -> Result<FieldMappings, StoreError>;

    /// Upsert a single mapping. Other mappings for the target are untouched.
    async fn save_field_mapping(&self, target: &str, from: &str, to: &str)
        -> Result<(), StoreError>;

    /// Batch upsert. Blank keys or values are silently dropped.
    async fn save_field_mappings(
        &self,
        target: &str,
        mappings: &FieldMappings,
    ) -> Result<(), StoreError>;

    /// Write the plan's endpoint and mappings as one all-or-nothing
    /// transaction, so no observer sees an endpoint rewrite without its
    /// accompanying mappings or vice versa. No-op for empty plans.
    async fn save_plan_atomic(&self, target: &str, plan: &HealingPlan) -> Result<(), StoreError>;

    /// Durable append to the failure log. Must succeed independently of
    /// rule-write outcomes.
    async fn append_failure_event(
        &self,
        target: &str,
        payload: &Payload,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Remove the endpoint rule and the entire field-mapping set for a
    /// target. Debugging/reset use.
    async fn delete_rules_for_target(&self, target: &str) -> Result<(), StoreError>;

    /// Create the consumer group on the failure log if it does not exist
    /// yet. "Already exists" is success.
    async fn ensure_consumer_group(&self, group: &str) -> Result<(), StoreError>;

    /// Blocking read of up to `count` records not yet delivered to this
    /// consumer, waiting at most `block_ms`. Missing record fields decode
    /// to empty strings.
    async fn read_failure_events(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<FailureDelivery>, StoreError>;

    /// Remove a delivered record from the group's pending list.
    async fn ack_failure_event(&self, group: &str, id: &str) -> Result<(), StoreError>;

    /// Backend reachability, used by the health endpoint.
    async fn is_healthy(&self) -> bool;
}

fn endpoint_key(target: &str) -> String {
    format!("{}{}:endpoint", KEY_PREFIX, normalize_target(target))
}

fn field_map_key(target: &str) -> String {
    format!("{}{}:field-mappings", KEY_PREFIX, normalize_target(target))
}

/// Drop entries with blank keys or values, trimming the rest.
fn clean_mappings(mappings: &FieldMappings) -> Vec<(String, String)> {
    mappings
        .iter()
        .filter_map(|(k, v)| {
            let k = k.trim();
            let v = v.trim();
            if k.is_empty() || v.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

fn serialize_payload(payload: &Payload) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
}

/// Redis-backed rule store over a shared ConnectionManager (auto
/// reconnecting, cheap to clone per operation).
pub struct RedisRuleStore {
    conn: ConnectionManager,
    failure_stream: String,
}

impl RedisRuleStore {
    pub async fn connect(redis_url: &str, failure_stream: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            failure_stream: failure_stream.to_string(),
        })
    }

    pub fn new(conn: ConnectionManager, failure_stream: &str) -> Self {
        Self {
            conn,
            failure_stream: failure_stream.to_string(),
        }
    }
}

#[async_trait]
impl RuleStore for RedisRuleStore {
    async fn get_endpoint_rule(&self, target: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(endpoint_key(target)).await?;
        Ok(value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn save_endpoint_rule(&self, target: &str, endpoint: &str) -> Result<(), StoreError> {
        if normalize_target(target).is_empty() || endpoint.trim().is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(endpoint_key(target), endpoint.trim())
            .await?;
        Ok(())
    }

    async fn get_field_mappings(&self, target: &str) -> Result<FieldMappings, StoreError> {
        if normalize_target(target).is_empty() {
            return Ok(FieldMappings::new());
        }
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(field_map_key(target)).await?;

        let mut out = FieldMappings::new();
        for (k, v) in raw {
            let k = k.trim();
            let v = v.trim();
            if !k.is_empty() && !v.is_empty() {
                out.insert(k.to_string(), v.to_string());
            }
        }
        Ok(out)
    }

    async fn save_field_mapping(
        &self,
        target: &str,
        from: &str,
        to: &str,
    ) -> Result<(), StoreError> {
        if normalize_target(target).is_empty() || from.trim().is_empty() || to.trim().is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(field_map_key(target), from.trim(), to.trim())
            .await?;
        Ok(())
    }

    async fn save_field_mappings(
        &self,
        target: &str,
        mappings: &FieldMappings,
    ) -> Result<(), StoreError> {
        if normalize_target(target).is_empty() {
            return Ok(());
        }
        let clean = clean_mappings(mappings);
        if clean.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(field_map_key(target), &clean)
            .await?;
        Ok(())
    }

    async fn save_plan_atomic(&self, target: &str, plan: &HealingPlan) -> Result<(), StoreError> {
        if normalize_target(target).is_empty() || plan.is_empty() {
            return Ok(());
        }

        // MULTI/EXEC: endpoint and mappings land together or not at all.
        let mut pipe = redis::pipe();
        pipe.atomic();

        if let Some(endpoint) = plan.endpoint.as_deref() {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                pipe.set(endpoint_key(target), endpoint).ignore();
            }
        }

        let clean = clean_mappings(&plan.field_mappings);
        if !clean.is_empty() {
            pipe.hset_multiple(field_map_key(target), &clean).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        debug!(target = %normalize_target(target), plan = ?plan, "persisted healing plan");
        Ok(())
    }

    async fn append_failure_event(
        &self,
        target: &str,
        payload: &Payload,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let fields = [
            ("target", normalize_target(target)),
            ("payloadJson", serialize_payload(payload)),
            ("error", error.to_string()),
            ("ts", chrono::Utc::now().timestamp_millis().to_string()),
        ];
        conn.xadd::<_, _, _, _, ()>(&self.failure_stream, "*", &fields)
            .await?;
        Ok(())
    }

    async fn delete_rules_for_target(&self, target: &str) -> Result<(), StoreError> {
        if normalize_target(target).is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[endpoint_key(target), field_map_key(target)])
            .await?;
        Ok(())
    }

    async fn ensure_consumer_group(&self, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(&self.failure_stream, group, "$")
            .await;
        match created {
            Ok(_) => Ok(()),
            // The group surviving a restart is the normal case.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_failure_events(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<FailureDelivery>, StoreError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[self.failure_stream.as_str()], &[">"], &opts)
            .await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for record in key.ids {
                let event = FailureEvent {
                    target: record.get("target").unwrap_or_default(),
                    payload_json: record.get("payloadJson").unwrap_or_default(),
                    error: record.get("error").unwrap_or_default(),
                    ts: record
                        .get::<String>("ts")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_default(),
                };
                out.push(FailureDelivery {
                    id: record.id,
                    event,
                });
            }
        }
        Ok(out)
    }

    async fn ack_failure_event(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, ()>(&self.failure_stream, group, &[id])
            .await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// In-memory rule store with single-delivery consumer-group emulation.
/// Used by the test suite and usable for local development without Redis.
#[derive(Default)]
pub struct MemoryRuleStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    endpoints: HashMap<String, String>,
    mappings: HashMap<String, FieldMappings>,
    log: Vec<(String, FailureEvent)>,
    groups: HashMap<String, GroupState>,
    next_seq: u64,
}

#[derive(Default)]
struct GroupState {
    /// Index of the next log record not yet delivered to any consumer
    /// in this group.
    cursor: usize,
    /// Delivered-but-unacknowledged record ids.
    pending: Vec<String>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of rules for a target, read in one lock acquisition.
    /// Supports the atomicity tests: a reader either sees a plan's
    /// endpoint together with its mappings or neither.
    pub async fn snapshot(&self, target: &str) -> (Option<String>, FieldMappings) {
        let t = normalize_target(target);
        let inner = self.inner.lock().await;
        (
            inner.endpoints.get(&t).cloned(),
            inner.mappings.get(&t).cloned().unwrap_or_default(),
        )
    }

    /// Number of unacknowledged records for a group.
    pub async fn pending_count(&self, group: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.groups.get(group).map_or(0, |g| g.pending.len())
    }

    /// Number of records ever delivered to a group.
    pub async fn delivered_count(&self, group: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.groups.get(group).map_or(0, |g| g.cursor)
    }

    async fn take_unseen(
        &self,
        group: &str,
        count: usize,
    ) -> Option<Vec<FailureDelivery>> {
        let mut inner = self.inner.lock().await;
        let len = inner.log.len();
        let (start, end) = {
            let state = inner.groups.entry(group.to_string()).or_default();
            if state.cursor >= len {
                return None;
            }
            let start = state.cursor;
            let end = (start + count).min(len);
            state.cursor = end;
            (start, end)
        };

        let batch: Vec<FailureDelivery> = inner.log[start..end]
            .iter()
            .map(|(id, event)| FailureDelivery {
                id: id.clone(),
                event: event.clone(),
            })
            .collect();

        let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
        if let Some(state) = inner.groups.get_mut(group) {
            state.pending.extend(ids);
        }
        Some(batch)
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn get_endpoint_rule(&self, target: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .endpoints
            .get(&normalize_target(target))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn save_endpoint_rule(&self, target: &str, endpoint: &str) -> Result<(), StoreError> {
        let t = normalize_target(target);
        if t.is_empty() || endpoint.trim().is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.endpoints.insert(t, endpoint.trim().to_string());
        Ok(())
    }

    async fn get_field_mappings(&self, target: &str) -> Result<FieldMappings, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .mappings
            .get(&normalize_target(target))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_field_mapping(
        &self,
        target: &str,
        from: &str,
        to: &str,
    ) -> Result<(), StoreError> {
        let t = normalize_target(target);
        if t.is_empty() || from.trim().is_empty() || to.trim().is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner
            .mappings
            .entry(t)
            .or_default()
            .insert(from.trim().to_string(), to.trim().to_string());
        Ok(())
    }

    async fn save_field_mappings(
        &self,
        target: &str,
        mappings: &FieldMappings,
    ) -> Result<(), StoreError> {
        let t = normalize_target(target);
        if t.is_empty() {
            return Ok(());
        }
        let clean = clean_mappings(mappings);
        if clean.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        let entry = inner.mappings.entry(t).or_default();
        for (from, to) in clean {
            entry.insert(from, to);
        }
        Ok(())
    }

    async fn save_plan_atomic(&self, target: &str, plan: &HealingPlan) -> Result<(), StoreError> {
        let t = normalize_target(target);
        if t.is_empty() || plan.is_empty() {
            return Ok(());
        }
        // Single lock acquisition = both writes are observed together.
        let mut inner = self.inner.lock().await;
        if let Some(endpoint) = plan.endpoint.as_deref() {
            if !endpoint.trim().is_empty() {
                inner.endpoints.insert(t.clone(), endpoint.trim().to_string());
            }
        }
        let clean = clean_mappings(&plan.field_mappings);
        if !clean.is_empty() {
            let entry = inner.mappings.entry(t).or_default();
            for (from, to) in clean {
                entry.insert(from, to);
            }
        }
        Ok(())
    }

    async fn append_failure_event(
        &self,
        target: &str,
        payload: &Payload,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        let id = format!("{}-0", inner.next_seq);
        let event = FailureEvent {
            target: normalize_target(target),
            payload_json: serialize_payload(payload),
            error: error.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        inner.log.push((id, event));
        Ok(())
    }

    async fn delete_rules_for_target(&self, target: &str) -> Result<(), StoreError> {
        let t = normalize_target(target);
        let mut inner = self.inner.lock().await;
        inner.endpoints.remove(&t);
        inner.mappings.remove(&t);
        Ok(())
    }

    async fn ensure_consumer_group(&self, group: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // New groups start at the tail, like XGROUP CREATE with "$".
        let cursor = inner.log.len();
        inner
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                cursor,
                pending: Vec::new(),
            });
        Ok(())
    }

    async fn read_failure_events(
        &self,
        group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<FailureDelivery>, StoreError> {
        if let Some(batch) = self.take_unseen(group, count).await {
            return Ok(batch);
        }
        // Nothing unseen yet: wait out the block timeout, then re-check
        // once, mirroring a blocking XREADGROUP.
        tokio::time::sleep(Duration::from_millis(block_ms)).await;
        Ok(self.take_unseen(group, count).await.unwrap_or_default())
    }

    async fn ack_failure_event(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.groups.get_mut(group) {
            state.pending.retain(|p| p != id);
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_of(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn rules_are_keyed_by_normalized_target() {
        let store = MemoryRuleStore::new();
        store
            .save_endpoint_rule("/v1/orders", "/v2/createOrder")
            .await
            .unwrap();

        let rule = store.get_endpoint_rule("v1/orders").await.unwrap();
        assert_eq!(rule.as_deref(), Some("/v2/createOrder"));
    }

    #[tokio::test]
    async fn blank_endpoint_save_is_a_noop() {
        let store = MemoryRuleStore::new();
        store.save_endpoint_rule("v1/orders", "   ").await.unwrap();
        assert_eq!(store.get_endpoint_rule("v1/orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn field_mapping_saves_are_upserts() {
        let store = MemoryRuleStore::new();
        store
            .save_field_mapping("v1/orders", "custName", "name")
            .await
            .unwrap();
        store
            .save_field_mapping("v1/orders", "custAge", "age")
            .await
            .unwrap();
        // Overwrite one entry; the other must survive.
        store
            .save_field_mapping("v1/orders", "custName", "fullName")
            .await
            .unwrap();

        let mappings = store.get_field_mappings("v1/orders").await.unwrap();
        assert_eq!(mappings.get("custName").map(String::as_str), Some("fullName"));
        assert_eq!(mappings.get("custAge").map(String::as_str), Some("age"));
    }

    #[tokio::test]
    async fn batch_save_drops_blank_entries() {
        let store = MemoryRuleStore::new();
        let mut batch = FieldMappings::new();
        batch.insert("custName".to_string(), "name".to_string());
        batch.insert("".to_string(), "x".to_string());
        batch.insert("custAge".to_string(), "  ".to_string());
        store.save_field_mappings("v1/orders", &batch).await.unwrap();

        let mappings = store.get_field_mappings("v1/orders").await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.get("custName").map(String::as_str), Some("name"));
    }

    #[tokio::test]
    async fn atomic_save_writes_endpoint_and_mappings_together() {
        let store = MemoryRuleStore::new();
        let mut mappings = FieldMappings::new();
        mappings.insert("custName".to_string(), "name".to_string());
        let plan = HealingPlan::new(Some("/v2/createOrder".to_string()), mappings);

        store.save_plan_atomic("v1/orders", &plan).await.unwrap();

        let (endpoint, mapped) = store.snapshot("v1/orders").await;
        assert_eq!(endpoint.as_deref(), Some("/v2/createOrder"));
        assert_eq!(mapped.get("custName").map(String::as_str), Some("name"));
    }

    #[tokio::test]
    async fn concurrent_reader_never_observes_a_partial_plan() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut mappings = FieldMappings::new();
        mappings.insert("custName".to_string(), "name".to_string());
        let plan = HealingPlan::new(Some("/v2/createOrder".to_string()), mappings);

        // Writer keeps tearing down and re-saving the plan, with writes
        // to an unrelated target interleaved.
        let writer_store = store.clone();
        let writer_plan = plan.clone();
        let writer = tokio::spawn(async move {
            for i in 0..200u32 {
                writer_store
                    .delete_rules_for_target("v1/orders")
                    .await
                    .unwrap();
                writer_store
                    .save_plan_atomic("v1/orders", &writer_plan)
                    .await
                    .unwrap();
                writer_store
                    .save_endpoint_rule("v1/other", &format!("/v{}/other", i))
                    .await
                    .unwrap();
            }
        });

        // The reader must see the endpoint rewrite and its mappings
        // together or not at all.
        for _ in 0..200 {
            let (endpoint, mappings) = store.snapshot("v1/orders").await;
            if endpoint.is_some() {
                assert!(!mappings.is_empty(), "endpoint visible without mappings");
            } else {
                assert!(mappings.is_empty(), "mappings visible without endpoint");
            }
            tokio::task::yield_now().await;
        }

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn atomic_save_of_empty_plan_is_a_noop() {
        let store = MemoryRuleStore::new();
        store
            .save_plan_atomic("v1/orders", &HealingPlan::default())
            .await
            .unwrap();
        let (endpoint, mappings) = store.snapshot("v1/orders").await;
        assert!(endpoint.is_none());
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_both_rule_kinds() {
        let store = MemoryRuleStore::new();
        store
            .save_endpoint_rule("v1/orders", "/v2/createOrder")
            .await
            .unwrap();
        store
            .save_field_mapping("v1/orders", "custName", "name")
            .await
            .unwrap();

        store.delete_rules_for_target("/v1/orders").await.unwrap();

        assert_eq!(store.get_endpoint_rule("v1/orders").await.unwrap(), None);
        assert!(store.get_field_mappings("v1/orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn consumer_group_delivers_each_record_once() {
        let store = MemoryRuleStore::new();
        store.ensure_consumer_group("g").await.unwrap();
        // Idempotent re-create must not reset the cursor.
        store.ensure_consumer_group("g").await.unwrap();

        let payload = payload_of(json!({"custName": "vikas"}));
        store
            .append_failure_event("v1/orders", &payload, "boom")
            .await
            .unwrap();

        let first = store.read_failure_events("g", "c1", 1, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event.target, "v1/orders");
        assert_eq!(first[0].event.error, "boom");

        // Same record is not redelivered to another consumer of the group.
        let second = store.read_failure_events("g", "c2", 1, 10).await.unwrap();
        assert!(second.is_empty());

        assert_eq!(store.pending_count("g").await, 1);
        store.ack_failure_event("g", &first[0].id).await.unwrap();
        assert_eq!(store.pending_count("g").await, 0);
    }

    #[tokio::test]
    async fn group_created_at_tail_skips_prior_records() {
        let store = MemoryRuleStore::new();
        let payload = payload_of(json!({}));
        store
            .append_failure_event("v1/orders", &payload, "old")
            .await
            .unwrap();

        store.ensure_consumer_group("g").await.unwrap();
        store
            .append_failure_event("v1/orders", &payload, "new")
            .await
            .unwrap();

        let batch = store.read_failure_events("g", "c1", 10, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event.error, "new");
    }
}
