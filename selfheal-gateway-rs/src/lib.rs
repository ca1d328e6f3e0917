// selfheal-gateway-rs/src/lib.rs
// Library interface for the self-healing API gateway.
//
// The gateway forwards caller requests to an upstream API; when the
// upstream rejects a call because its URL or payload schema has drifted,
// it learns a correction (endpoint rewrite and/or field renames),
// persists it, and applies it - both within the same request (bounded
// retries) and to all future calls to the same logical target.
//
// Layering, leaves first:
// - store:        durable rules + failure-event log (Redis / in-memory)
// - inference:    deterministic error-text -> HealingPlan engine
// - proposer:     RuleProposer capability (LLM-first fallback composite)
// - upstream:     HTTP collaborator boundary with a tagged outcome type
// - orchestrator: per-request bounded convergence loop
// - learner:      background consumer-group worker on the failure log
// - http/config:  axum surface and env-driven configuration

pub mod config;
pub mod http;
pub mod inference;
pub mod learner;
pub mod model;
pub mod orchestrator;
pub mod proposer;
pub mod store;
pub mod upstream;


pub use config::GatewayConfig;
pub use inference::InferenceEngine;
pub use learner::{LearnerConfig, StreamLearner};
pub use model::{HealingPlan, SmartCallRequest, SmartCallResponse};
pub use orchestrator::ConvergenceOrchestrator;
pub use proposer::{build_proposer, RuleProposer};
pub use store::{MemoryRuleStore, RedisRuleStore, RuleStore, StoreError};
pub use upstream::{HttpUpstreamClient, UpstreamClient, UpstreamOutcome};
