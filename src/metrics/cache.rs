//! Single polling timer and latest-reading cache.
//!
//! The in-memory slot is the source of truth. The scratch files are an
//! advisory handoff for a fresh process and carry no locking: last writer wins.

use crate::metrics::collector::SensorReader;
use crate::metrics::config::MonitorConfig;
use crate::metrics::data::{MemoryTriple, SensorRead, SensorReading, SourceMethod};
use crate::metrics::history::MetricsHistory;
use crate::metrics::throttle::{LogCategory, LogThrottle};
use crate::state::SubscriberCount;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Values recovered from the scratch files of an earlier poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchValues {
    pub temperature_celsius: Option<f64>,
    pub memory: Option<MemoryTriple>,
}

/// Periodically polls the [`SensorReader`] and keeps the latest reading.
pub struct PollingCache {
    config: Arc<MonitorConfig>,
    reader: Arc<SensorReader>,
    audience: SubscriberCount,
    latest: watch::Sender<Arc<SensorReading>>,
    history: Mutex<MetricsHistory>,
    task: Mutex<Option<JoinHandle<()>>>,
    throttle: LogThrottle,
}

impl PollingCache {
    pub fn new(config: Arc<MonitorConfig>, reader: Arc<SensorReader>, audience: SubscriberCount) -> Self {
        let (latest, _) = watch::channel(Arc::new(SensorReading::unavailable()));
        let throttle = LogThrottle::new(config.log_throttle());
        Self {
            config,
            reader,
            audience,
            latest,
            history: Mutex::new(MetricsHistory::new(crate::HISTORY_LEN)),
            task: Mutex::new(None),
            throttle,
        }
    }

    pub fn reader(&self) -> &Arc<SensorReader> {
        &self.reader
    }

    /// Latest reading. Never blocks; an explicit unavailable reading before
    /// the first successful poll.
    pub fn latest(&self) -> Arc<SensorReading> {
        self.latest.borrow().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Start the polling timer. A no-op while one is already running.
    pub fn start_polling(self: &Arc<Self>) {
        let Ok(mut slot) = self.task.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let period = self.config.poll_interval();
        info!("starting sensor polling every {}ms", period.as_millis());
        let cache = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !cache.audience.has_audience() {
                    debug!("no subscribers left, polling timer cancels itself");
                    break;
                }
                cache.poll_once().await;
            }
        }));
    }

    /// Stop the polling timer immediately.
    pub fn stop_polling(&self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                info!("sensor polling stopped");
            }
        }
    }

    /// Run one poll cycle and publish the result.
    ///
    /// Values that could not be read are carried over from the previous
    /// reading rather than replaced by an error state.
    pub async fn poll_once(&self) {
        let temperature = self.reader.read_temperature().await;
        let memory = self.reader.read_memory().await;

        if !temperature.is_available() && !memory.is_available() {
            return;
        }

        let previous = self.latest();
        let method = match (&temperature, &memory) {
            (SensorRead::Value { method, .. }, _) => *method,
            (_, SensorRead::Value { method, .. }) => *method,
            _ => SourceMethod::Unavailable,
        };
        let temperature = temperature.value();
        let memory = memory.value();

        // The audience may have gone while we were reading; do not resurrect
        // a cache or scratch files that have just been cleared.
        if !self.audience.has_audience() {
            return;
        }

        if let Some(t) = temperature {
            self.write_scratch(self.config.temp_file(), format!("{:.1}", t)).await;
        }
        if let Some(m) = memory {
            self.write_scratch(self.config.mem_file(), m.to_scratch_line()).await;
        }

        let reading = SensorReading {
            temperature_celsius: temperature.or(previous.temperature_celsius),
            memory: memory.or(previous.memory),
            captured_at: Utc::now(),
            source_method: method,
        };

        if let Ok(mut history) = self.history.lock() {
            if let Some(t) = reading.temperature_celsius {
                history.push_temperature(t);
            }
            if let Some(m) = reading.memory {
                history.push_ram_percent(m.used_percent());
            }
        }

        self.latest.send_replace(Arc::new(reading));
    }

    async fn write_scratch(&self, path: std::path::PathBuf, contents: String) {
        if let Err(e) = tokio::fs::write(&path, contents).await {
            if self.throttle.allow(LogCategory::Polling) {
                warn!("could not write scratch file {}: {}", path.display(), e);
            }
        }
    }

    /// Chart series (temperature, memory-used percent), each exactly
    /// `HISTORY_LEN` long.
    pub fn history(&self) -> (Vec<f64>, Vec<f64>) {
        match self.history.lock() {
            Ok(history) => (history.temperature_series(), history.ram_series()),
            Err(_) => (vec![0.0; crate::HISTORY_LEN], vec![0.0; crate::HISTORY_LEN]),
        }
    }

    /// Read whatever an earlier poll left in the scratch files.
    pub async fn read_scratch(&self) -> Option<ScratchValues> {
        let temperature_celsius = tokio::fs::read_to_string(self.config.temp_file())
            .await
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite());
        let memory = tokio::fs::read_to_string(self.config.mem_file())
            .await
            .ok()
            .and_then(|s| MemoryTriple::from_scratch_line(&s));

        if temperature_celsius.is_none() && memory.is_none() {
            None
        } else {
            Some(ScratchValues {
                temperature_celsius,
                memory,
            })
        }
    }

    /// Forget everything: reset the slot, the history and the scratch files.
    pub async fn clear(&self) {
        self.latest.send_replace(Arc::new(SensorReading::unavailable()));
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
        self.clear_scratch_files().await;
    }

    async fn clear_scratch_files(&self) {
        for path in [self.config.temp_file(), self.config.mem_file()] {
            let _ = tokio::fs::remove_file(&path).await;
        }

        let Ok(mut entries) = tokio::fs::read_dir(&self.config.scratch_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if self.config.is_scratch_file(&path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
}
