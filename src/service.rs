//! Explicitly wired telemetry service.

use crate::metrics::cache::PollingCache;
use crate::metrics::collector::SensorReader;
use crate::metrics::config::MonitorConfig;
use crate::metrics::host::SystemProcessHost;
use crate::metrics::process::ProcessManager;
use crate::metrics::sources::default_sources;
use crate::metrics::traits::{ProcessHost, SensorSource};
use crate::state::SubscriberCount;
use crate::web::broadcast::BroadcastScheduler;
use crate::web::registry::SubscriberRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Owns every long-lived component. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryService {
    config: Arc<MonitorConfig>,
    process: Arc<ProcessManager>,
    cache: Arc<PollingCache>,
    scheduler: BroadcastScheduler,
    registry: Arc<SubscriberRegistry>,
}

impl TelemetryService {
    /// Service talking to the real host.
    pub fn new(config: MonitorConfig) -> Self {
        let config = Arc::new(config);
        let host: Arc<dyn ProcessHost> = Arc::new(SystemProcessHost::new());
        let sources = default_sources(Arc::clone(&config), Arc::clone(&host));
        Self::assemble(config, host, sources)
    }

    /// Service with injected host access and sensor sources.
    pub fn with_parts(
        config: MonitorConfig,
        host: Arc<dyn ProcessHost>,
        sources: Vec<Arc<dyn SensorSource>>,
    ) -> Self {
        Self::assemble(Arc::new(config), host, sources)
    }

    fn assemble(
        config: Arc<MonitorConfig>,
        host: Arc<dyn ProcessHost>,
        sources: Vec<Arc<dyn SensorSource>>,
    ) -> Self {
        let count = SubscriberCount::new();
        let process = Arc::new(ProcessManager::new(Arc::clone(&config), host));
        let reader = Arc::new(SensorReader::new(Arc::clone(&config), sources, count.clone()));
        let cache = Arc::new(PollingCache::new(Arc::clone(&config), reader, count.clone()));
        let scheduler = BroadcastScheduler::new(Arc::clone(&cache));
        let registry = Arc::new(SubscriberRegistry::new(
            Arc::clone(&config),
            Arc::clone(&process),
            Arc::clone(&cache),
            scheduler.clone(),
            count,
        ));

        Self {
            config,
            process,
            cache,
            scheduler,
            registry,
        }
    }

    pub fn config(&self) -> &Arc<MonitorConfig> {
        &self.config
    }

    pub fn process(&self) -> &Arc<ProcessManager> {
        &self.process
    }

    pub fn cache(&self) -> &Arc<PollingCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &BroadcastScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Start the periodic liveness sweep. The first sweep runs one period
    /// after start.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let period = self.config.sweep_interval();
        let registry = Arc::clone(&self.registry);
        info!("sweeping stale subscribers every {}s", period.as_secs());
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let pruned = registry.sweep().await;
                debug!("sweep finished, {} pruned", pruned);
            }
        })
    }

    /// Close every subscriber and release the sensor utility.
    pub async fn shutdown(&self) {
        info!("shutting down telemetry service");
        self.registry.close_all().await;
    }
}
