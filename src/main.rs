use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transit_snapshot::config::Config;
use transit_snapshot::db::{schema, Store};
use transit_snapshot::features::FeatureService;
use transit_snapshot::realtime::FeedCache;
use transit_snapshot::schedule;
use transit_snapshot::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let config = Arc::new(Config::load("config.yaml").expect("Failed to load config"));
    tracing::info!(
        archive = %config.static_archive_url,
        database = %config.database_path,
        "Loaded configuration"
    );

    let store = Store::open(&config.database_path)
        .await
        .expect("Failed to open database");
    schema::ensure_live_tables(store.write_pool())
        .await
        .expect("Failed to create live tables");

    let client = reqwest::Client::new();

    // Initial static load; a schema-level failure here is fatal.
    schedule::reload(&store, &client, &config)
        .await
        .expect("Initial schedule load failed");

    let features = Arc::new(FeatureService::new(
        store.clone(),
        &config.refresh,
        config.parsed_timezone(),
    ));
    features
        .export_all(&config.export_dir)
        .await
        .expect("Initial GeoJSON export failed");

    let scheduler = Arc::new(Scheduler::new(
        store,
        client,
        config,
        FeedCache::new(),
        features,
    ));
    let handles = scheduler.start();
    tracing::info!(tasks = handles.len(), "Snapshot engine running");

    for handle in handles {
        let _ = handle.await;
    }
}
