//! Cadence scheduler.
//!
//! Four independent periodic tasks share one store: the three live feed
//! polls and the nightly maintenance pass (full static reload, calendar
//! purge, facility prune, GeoJSON re-export, cache invalidation). A failed
//! job run is logged and the loop keeps its cadence; writes to the same
//! entity kind are serialized by the replace transaction itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::EngineError;
use crate::features::FeatureService;
use crate::realtime::{self, FeedCache};
use crate::schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    VehiclePoll,
    PredictionPoll,
    AlertPoll,
    NightlyMaintenance,
}

/// One scheduled task: a name for logs, a cadence, and the job to run.
pub struct Task {
    pub name: &'static str,
    pub interval: Duration,
    pub job: JobKind,
}

pub struct Scheduler {
    store: Store,
    client: reqwest::Client,
    config: Arc<Config>,
    feed_cache: FeedCache,
    features: Arc<FeatureService>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        client: reqwest::Client,
        config: Arc<Config>,
        feed_cache: FeedCache,
        features: Arc<FeatureService>,
    ) -> Self {
        Self {
            store,
            client,
            config,
            feed_cache,
            features,
        }
    }

    /// The full task list, cadences taken from config.
    pub fn tasks(&self) -> Vec<Task> {
        let r = &self.config.refresh;
        vec![
            Task {
                name: "vehicle_positions",
                interval: Duration::from_secs(r.vehicle_secs),
                job: JobKind::VehiclePoll,
            },
            Task {
                name: "trip_updates",
                interval: Duration::from_secs(r.prediction_secs),
                job: JobKind::PredictionPoll,
            },
            Task {
                name: "alerts",
                interval: Duration::from_secs(r.alert_secs),
                job: JobKind::AlertPoll,
            },
            Task {
                name: "nightly_maintenance",
                interval: Duration::from_secs(r.reload_secs),
                job: JobKind::NightlyMaintenance,
            },
        ]
    }

    /// Spawn one loop per task. Live polls fire immediately; maintenance
    /// waits a full interval since startup already performed a load.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        self.tasks()
            .into_iter()
            .map(|task| {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(task.interval);
                    if task.job == JobKind::NightlyMaintenance {
                        interval.tick().await;
                    }
                    info!(task = task.name, interval_secs = task.interval.as_secs(), "Scheduled task");
                    loop {
                        interval.tick().await;
                        if let Err(e) = scheduler.run(task.job).await {
                            warn!(task = task.name, error = %e, "Scheduled job failed");
                        }
                    }
                })
            })
            .collect()
    }

    pub async fn run(&self, job: JobKind) -> Result<(), EngineError> {
        match job {
            JobKind::VehiclePoll => {
                realtime::refresh_vehicles(&self.store, &self.client, &self.feed_cache, &self.config)
                    .await
            }
            JobKind::PredictionPoll => {
                realtime::refresh_predictions(
                    &self.store,
                    &self.client,
                    &self.feed_cache,
                    &self.config,
                )
                .await
            }
            JobKind::AlertPoll => {
                realtime::refresh_alerts(&self.store, &self.client, &self.feed_cache, &self.config)
                    .await
            }
            JobKind::NightlyMaintenance => self.nightly().await,
        }
    }

    async fn nightly(&self) -> Result<(), EngineError> {
        schedule::reload(&self.store, &self.client, &self.config).await?;

        let today = chrono::Utc::now()
            .with_timezone(&self.config.parsed_timezone())
            .format("%Y%m%d")
            .to_string();
        schedule::purge_elapsed_calendars(&self.store, &today).await?;
        schedule::prune_facilities(&self.store).await?;

        // Reload swapped the static snapshot out from under both caches.
        self.feed_cache.invalidate().await;
        self.features.invalidate().await;

        self.features.export_all(&self.config.export_dir).await?;
        info!("Nightly maintenance complete");
        Ok(())
    }
}
