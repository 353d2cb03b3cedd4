//! Sensor reading with multi-tier fallback.

use crate::metrics::config::MonitorConfig;
use crate::metrics::data::{MemoryTriple, SensorRead};
use crate::metrics::throttle::{LogCategory, LogThrottle};
use crate::metrics::traits::SensorSource;
use crate::state::SubscriberCount;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads temperature and memory through an ordered chain of sources.
///
/// Every read is gated on the subscriber count: with nobody listening no
/// source is touched at all.
pub struct SensorReader {
    config: Arc<MonitorConfig>,
    sources: Vec<Arc<dyn SensorSource>>,
    audience: SubscriberCount,
    throttle: LogThrottle,
}

impl SensorReader {
    pub fn new(
        config: Arc<MonitorConfig>,
        sources: Vec<Arc<dyn SensorSource>>,
        audience: SubscriberCount,
    ) -> Self {
        let throttle = LogThrottle::new(config.log_throttle());
        Self {
            config,
            sources,
            audience,
            throttle,
        }
    }

    /// Read the CPU temperature from the first source that has one.
    pub async fn read_temperature(&self) -> SensorRead<f64> {
        if !self.audience.has_audience() {
            return SensorRead::unavailable("no active subscribers");
        }

        let mut reason = String::from("no sensor sources configured");
        for source in &self.sources {
            match source.read_temperature().await {
                Ok(value) => {
                    // The audience may have left while the query was in flight.
                    if !self.audience.has_audience() {
                        return SensorRead::unavailable("subscribers left during read");
                    }
                    self.persist_method(source.method().describe()).await;
                    return SensorRead::Value {
                        value,
                        method: source.method(),
                    };
                }
                Err(e) => {
                    if e.is_degradation() {
                        debug!("{:?} temperature read failed: {}", source.method(), e);
                    } else {
                        warn!("{:?} temperature source error: {}", source.method(), e);
                    }
                    reason = e.to_string();
                }
            }
        }

        if self.throttle.allow(LogCategory::Temperature) {
            warn!("CPU temperature unavailable: {}", reason);
        }
        SensorRead::unavailable(reason)
    }

    /// Read memory statistics from the first source that has them.
    pub async fn read_memory(&self) -> SensorRead<MemoryTriple> {
        if !self.audience.has_audience() {
            return SensorRead::unavailable("no active subscribers");
        }

        let mut reason = String::from("no sensor sources configured");
        for source in &self.sources {
            match source.read_memory().await {
                Ok(value) => {
                    if !self.audience.has_audience() {
                        return SensorRead::unavailable("subscribers left during read");
                    }
                    return SensorRead::Value {
                        value,
                        method: source.method(),
                    };
                }
                Err(e) => {
                    if e.is_degradation() {
                        debug!("{:?} memory read failed: {}", source.method(), e);
                    } else {
                        warn!("{:?} memory source error: {}", source.method(), e);
                    }
                    reason = e.to_string();
                }
            }
        }

        if self.throttle.allow(LogCategory::Memory) {
            warn!("memory statistics unavailable: {}", reason);
        }
        SensorRead::unavailable(reason)
    }

    async fn persist_method(&self, description: &str) {
        let line = format!("Temperature acquisition method: {}", description);
        if let Err(e) = tokio::fs::write(self.config.method_file(), line).await {
            debug!("could not record acquisition method: {}", e);
        }
    }

    /// Contents of the acquisition-method side file, if any.
    pub async fn current_method(&self) -> Option<String> {
        tokio::fs::read_to_string(self.config.method_file())
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
