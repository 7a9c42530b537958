use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sideline_api::{app, rate_limit_middleware, worker, AppState, AuthConfig, ServiceSettings};
use sideline_booking::{FeePolicy, MockPaymentProcessor, SideEffectExecutor, WebhookSecrets};
use sideline_core::notify::NotificationSink;
use sideline_core::payment::PaymentProcessor;
use sideline_core::repository::MarketplaceStore;
use sideline_store::{DbClient, EventProducer, HttpMailer, LogMailer, PgStore, RedisClient, StripeClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sideline_api=debug,sideline_booking=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = sideline_store::Config::load().context("failed to load config")?;
    tracing::info!("Starting Sideline API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;
    let fee_percent = db
        .fetch_platform_fee_percent(config.payments.platform_fee_percent)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to configured platform fee: {}", e);
            config.payments.platform_fee_percent
        });
    let store: Arc<dyn MarketplaceStore> = Arc::new(PgStore::new(db.pool.clone()));

    // Redis is only used for rate limiting
    let redis = match RedisClient::new(&config.redis.url).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
            None
        }
    };

    let processor: Arc<dyn PaymentProcessor> = if config.payments.secret_key.is_empty() {
        tracing::warn!("No payment secret key configured; using the mock processor");
        Arc::new(MockPaymentProcessor::new())
    } else {
        Arc::new(
            StripeClient::new(
                &config.payments.secret_key,
                &config.payments.api_base,
                Duration::from_millis(config.payments.timeout_ms),
            )
            .context("failed to build payment client")?,
        )
    };

    let mailer: Arc<dyn NotificationSink> = match (&config.email.api_url, &config.email.api_key) {
        (Some(url), Some(key)) => Arc::new(
            HttpMailer::new(url, key, &config.email.from).context("failed to build mailer")?,
        ),
        _ => {
            tracing::warn!("No email API configured; emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let events = Arc::new(
        EventProducer::new(&config.kafka.brokers).context("failed to create Kafka producer")?,
    );

    let settings = ServiceSettings {
        fees: FeePolicy::new(fee_percent),
        app_base_url: config.urls.app_base_url.clone(),
        webhooks: WebhookSecrets {
            processor_secret: config.webhooks.processor_secret.clone(),
            video_secret: config.webhooks.video_secret.clone(),
            allow_unsigned: config.webhooks.allow_unsigned,
            tolerance_secs: config.webhooks.tolerance_secs,
        },
    };
    tracing::info!("Platform fee set to {}%", settings.fees.percent());

    let app_state = AppState::new(
        store.clone(),
        processor.clone(),
        settings,
        AuthConfig { secret: config.auth.jwt_secret.clone() },
        redis,
    );

    // Background workers
    let executor = Arc::new(SideEffectExecutor::new(store, processor, mailer, events));
    tokio::spawn(worker::start_outbox_worker(
        executor,
        Duration::from_millis(config.workers.outbox_interval_ms),
        config.workers.outbox_batch_size,
    ));
    tokio::spawn(worker::start_sweep_worker(
        app_state.review_workflow.clone(),
        app_state.bookings.clone(),
        Duration::from_secs(config.workers.sweep_interval_secs),
        chrono::Duration::hours(config.workers.abandoned_checkout_hours),
    ));

    let app = app(app_state.clone()).layer(axum::middleware::from_fn_with_state(
        app_state,
        rate_limit_middleware,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}
