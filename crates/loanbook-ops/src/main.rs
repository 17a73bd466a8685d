use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use loanbook_platform::{
    EngineSettings, PAYMENTS_CLEARED_CHANNEL, PaymentClearedEvent, PgServicingStore, RedisBus,
    RedisNotifier, ServiceConfig, connect_database, ensure_schema,
};
use loanbook_waiver::{PaymentOutcome, WaiverEngine};
use redis::Msg;
use tracing::{error, info, warn};

type Engine = WaiverEngine<PgServicingStore, RedisNotifier>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "loanbook_ops=info,loanbook_waiver=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let settings = EngineSettings::from_env()?;
    let pool = connect_database(&config.database_url).await?;
    ensure_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let store = Arc::new(PgServicingStore::new(pool));
    let notifier = Arc::new(RedisNotifier::new(redis.clone()));
    let engine = WaiverEngine::new(store, notifier, settings.into_engine_config());

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(PAYMENTS_CLEARED_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    let mut sweep = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs.max(1)));

    info!(
        sweep_interval_secs = config.sweep_interval_secs,
        "waiver worker subscribed to {PAYMENTS_CLEARED_CHANNEL}"
    );

    loop {
        tokio::select! {
            msg = messages.next() => {
                let msg = msg.context("payments.cleared stream ended unexpectedly")?;
                if let Err(err) = handle_message(&engine, msg).await {
                    error!("failed to process payment message: {err:#}");
                }
            }
            _ = sweep.tick() => {
                match engine.sweep_expired(engine.today()).await {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "expired stale waivers"),
                    Err(err) => error!("expiry sweep failed: {err}"),
                }
            }
        }
    }
}

async fn handle_message(engine: &Engine, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: PaymentClearedEvent =
        serde_json::from_str(&payload).context("malformed payments.cleared payload")?;

    let outcome = engine
        .on_payment_cleared(event.account_id, event.amount, event.paid_at)
        .await
        .with_context(|| format!("payment for account {} not applied", event.account_id))?;

    match outcome {
        PaymentOutcome::Implemented {
            pending_waiver_id,
            replayed_payments,
        } => info!(
            account_id = event.account_id,
            %pending_waiver_id,
            replayed_payments,
            payment_ref = event.payment_ref.as_deref().unwrap_or("-"),
            "payment activated waiver"
        ),
        PaymentOutcome::Expired { pending_waiver_id } => warn!(
            account_id = event.account_id,
            %pending_waiver_id,
            "payment arrived after waiver deadline"
        ),
        PaymentOutcome::Accruing { .. } | PaymentOutcome::Unwaived => {}
    }
    Ok(())
}
