//! Odds Board Sync — Binary Entrypoint
//! Boots the scheduler driver and the Axum HTTP surface the dashboard calls.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use odds_board_sync::api::{self, AppState};
use odds_board_sync::bus::EventBus;
use odds_board_sync::config;
use odds_board_sync::guard::AccessGuard;
use odds_board_sync::history::ReportHistory;
use odds_board_sync::metrics::Metrics;
use odds_board_sync::sync::merge::{CanonicalStore, MemoryStore, MergeEngine};
use odds_board_sync::sync::orchestrator::Orchestrator;
use odds_board_sync::sync::scheduler::SyncScheduler;
use odds_board_sync::sync::types::SourceAdapter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("odds_board_sync=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[cfg(feature = "adapters-http")]
fn build_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    use odds_board_sync::sync::adapters::{odds_api::OddsApiAdapter, score_feed::ScoreFeedAdapter};

    let odds_url = std::env::var("ODDS_API_URL")
        .unwrap_or_else(|_| "https://api.the-odds-api.example/v4/odds".to_string());
    let scores_url = std::env::var("SCORE_FEED_URL")
        .unwrap_or_else(|_| "https://feeds.scores.example/scoreboard.xml".to_string());
    vec![
        Arc::new(OddsApiAdapter::from_url(odds_url)),
        Arc::new(ScoreFeedAdapter::from_url(scores_url)),
    ]
}

#[cfg(all(feature = "adapters-fixtures", not(feature = "adapters-http")))]
fn build_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    use odds_board_sync::sync::adapters::{odds_api::OddsApiAdapter, score_feed::ScoreFeedAdapter};

    let odds_json: &str = include_str!("../tests/fixtures/odds_api.json");
    let scores_xml: &str = include_str!("../tests/fixtures/score_feed.xml");
    vec![
        Arc::new(OddsApiAdapter::from_fixture(odds_json)),
        Arc::new(ScoreFeedAdapter::from_fixture(scores_xml)),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default()?;
    let metrics = Metrics::init(cfg.adapter_timeout_ms);

    let store: Arc<dyn CanonicalStore> = Arc::new(MemoryStore::new());
    let mut orchestrator = Orchestrator::new(
        MergeEngine::new(Arc::clone(&store)),
        cfg.adapter_timeout_ms,
    );
    for adapter in build_adapters() {
        orchestrator.register(adapter);
    }
    let orchestrator = Arc::new(orchestrator);

    let guard = Arc::new(AccessGuard::new(cfg.guard.to_guard_cfg()));
    let bus = EventBus::default();
    let history = Arc::new(ReportHistory::with_capacity(200));

    let scheduler = Arc::new(SyncScheduler::new(
        cfg.jobs.clone(),
        cfg.scheduler.visibility_aware,
        Arc::clone(&orchestrator),
        Arc::clone(&guard),
        bus.clone(),
        Arc::clone(&history),
    )?);
    let driver = scheduler.start();

    // Sample bus consumer: the dashboard would subscribe the same way.
    let mut reports = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(report) = reports.recv().await {
            tracing::info!(
                job = %report.job_id,
                generation = report.generation,
                sources = report.per_source.len(),
                "refresh completed"
            );
        }
    });

    let state = AppState {
        scheduler: Arc::clone(&scheduler),
        guard,
        history,
        store,
    };
    let app = api::create_router(state).merge(metrics.router());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "odds board sync listening");
    axum::serve(listener, app).await?;

    scheduler.stop();
    driver.abort();
    Ok(())
}
