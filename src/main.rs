use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use tutorbot::analysis::{Analyzer, NoAnalyzer, OpenAiAnalyzer};
use tutorbot::calendar::{Calendar, HttpCalendar, NoCalendar};
use tutorbot::config::AppConfig;
use tutorbot::flows::{Ctx, Orchestrator};
use tutorbot::guard::OutgoingGuard;
use tutorbot::payments::{HttpPayments, NoPayments, Payments};
use tutorbot::platform::{ChatwootClient, Messaging};
use tutorbot::server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;

    let platform: Arc<dyn Messaging> = Arc::new(
        ChatwootClient::new(
            config.platform_base_url.clone(),
            config.platform_account_id,
            config.platform_api_token.clone(),
            config.request_timeout,
        )
        .context("building platform client")?,
    );

    let analysis_enabled = config.analysis_api_key.is_some();
    let analyzer: Arc<dyn Analyzer> = match &config.analysis_api_key {
        Some(key) => Arc::new(
            OpenAiAnalyzer::new(
                key.clone(),
                config.analysis_model.clone(),
                config.request_timeout,
            )
            .context("building analyzer")?,
        ),
        None => {
            tracing::warn!("no analysis key configured; prefill and free-text intake disabled");
            Arc::new(NoAnalyzer)
        }
    };

    let calendar: Arc<dyn Calendar> = match &config.calendar_base_url {
        Some(base_url) => Arc::new(
            HttpCalendar::new(
                base_url.clone(),
                config.calendar_id.clone(),
                config.request_timeout,
            )
            .context("building calendar client")?,
        ),
        None => {
            tracing::warn!("no calendar configured; using locally generated slots");
            Arc::new(NoCalendar)
        }
    };

    let payments_enabled = config.payment_base_url.is_some() && config.payment_api_key.is_some();
    let payments: Arc<dyn Payments> = match (&config.payment_base_url, &config.payment_api_key) {
        (Some(base_url), Some(key)) => Arc::new(
            HttpPayments::new(base_url.clone(), key.clone(), config.request_timeout)
                .context("building payments client")?,
        ),
        _ => {
            tracing::warn!("no payment gateway configured; paid bookings confirm without checkout");
            Arc::new(NoPayments)
        }
    };

    let ctx = Ctx {
        platform,
        analyzer,
        calendar,
        payments,
        guard: OutgoingGuard::new(config.handoff_agent_id),
        handoff_agent_id: config.handoff_agent_id,
        analysis_enabled,
        payments_enabled,
        order_prefix: config.order_prefix.clone(),
        tz_offset_minutes: config.tz_offset_minutes,
    };

    let state = AppState::new(
        Arc::new(Orchestrator::new(ctx)),
        config.platform_webhook_secret.clone(),
        config.payment_webhook_secret.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "tutorbot listening");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}
