// selfheal-gateway-rs/src/main.rs
// Self-Healing API Gateway - HTTP entry point.
//
// Wires the rule store (Redis), the proposer stack, the convergence
// orchestrator and the background stream learner, then serves the axum
// router until ctrl-c. The learner gets a bounded grace period to finish
// its in-flight read on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use selfheal_gateway::http::{router, AppState};
use selfheal_gateway::learner::{LearnerConfig, StreamLearner};
use selfheal_gateway::orchestrator::ConvergenceOrchestrator;
use selfheal_gateway::proposer::build_proposer;
use selfheal_gateway::store::{RedisRuleStore, RuleStore};
use selfheal_gateway::upstream::HttpUpstreamClient;
use selfheal_gateway::GatewayConfig;

const LEARNER_SHUTDOWN_GRACE: Duration = Duration::from_secs(6);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env();
    info!(port = config.port, upstream = %config.upstream_base_url, "starting self-healing gateway");

    let store: Arc<dyn RuleStore> = Arc::new(
        RedisRuleStore::connect(&config.redis_url, &config.failure_stream)
            .await
            .context("failed to connect to Redis")?,
    );

    let proposer = build_proposer(
        config.openai_api_key.as_deref(),
        &config.openai_api_url,
        &config.openai_model,
    );
    if config.openai_api_key.is_some() {
        info!(model = %config.openai_model, "LLM proposer enabled");
    } else {
        info!("no LLM API key configured; using deterministic inference only");
    }

    let upstream = Arc::new(HttpUpstreamClient::new(&config.upstream_base_url));
    let orchestrator = Arc::new(ConvergenceOrchestrator::new(
        store.clone(),
        upstream,
        proposer.clone(),
        config.upstream_timeout_ms,
    ));

    let learner = StreamLearner::spawn(
        store.clone(),
        proposer,
        LearnerConfig {
            consumer_group: config.consumer_group.clone(),
            block_ms: config.block_ms,
        },
    );
    info!(consumer = %learner.consumer_name(), group = %config.consumer_group, "stream learner running");

    let state = AppState {
        orchestrator,
        store,
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped; shutting down stream learner");
    learner.shutdown(LEARNER_SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
