use std::sync::Arc;

use pricewatch::{
    analysis::{AnalysisEngine, ChangeDetector},
    config::AppConfig,
    db::Db,
    logger::init_tracing,
    market::{poller::Poller, polygon::PolygonClient},
    metrics::counters::Counters,
    prices::{
        cache::PriceCache,
        repository::{PriceRepository, SymbolDirectory},
        repository_sqlx::SqlxPriceRepository,
    },
};

/// Connects, migrates and seeds the store, then warms the price cache from
/// history so the first poll after a restart compares against real prices.
async fn init_engine(cfg: &AppConfig) -> anyhow::Result<Arc<AnalysisEngine>> {
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxPriceRepository::new(db.pool.clone()));
    seed_symbols(repo.as_ref(), cfg).await?;

    let repo: Arc<dyn PriceRepository> = repo;
    let engine = Arc::new(AnalysisEngine::new(
        repo,
        Arc::new(PriceCache::new()),
        ChangeDetector::new(cfg.detector),
    ));

    engine.warm_start().await?;

    Ok(engine)
}

async fn seed_symbols(repo: &dyn SymbolDirectory, cfg: &AppConfig) -> anyhow::Result<()> {
    for symbol in &cfg.seed_symbols {
        if repo.insert_symbol(symbol).await? {
            tracing::info!(ticker = %symbol.ticker, name = %symbol.name, "seeded symbol");
        }
    }
    Ok(())
}

fn start_poller(engine: Arc<AnalysisEngine>, cfg: &AppConfig) -> anyhow::Result<()> {
    let client = PolygonClient::new(
        cfg.polygon_base_url.clone(),
        cfg.polygon_api_key.clone(),
        cfg.quote_endpoint,
    )?;

    if cfg.polygon_api_key.is_empty() {
        tracing::warn!("POLYGON_API_KEY is not set; upstream requests will be rejected");
    }

    let poller = Arc::new(Poller::new(
        engine,
        Arc::new(client),
        Counters::default(),
        cfg.fetch_timeout,
        cfg.max_concurrent_fetches,
    ));

    tokio::spawn(poller.run(cfg.poll_interval));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting pricewatch...");

    let cfg = AppConfig::from_env()?;

    let engine = init_engine(&cfg).await?;

    start_poller(engine, &cfg)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
