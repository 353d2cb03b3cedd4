//! Telemetry core configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lower bound for any per-subscriber cadence.
pub const MIN_CADENCE_MS: u64 = 1_000;

/// Configuration for the sensor utility, polling and delivery cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Path to the hardware-monitoring executable
    pub utility_path: PathBuf,
    /// Process name used for enumeration and kill-by-name
    pub process_name: String,
    /// Signed helper script used for elevated termination
    pub helper_script_path: PathBuf,
    /// Management namespace the utility publishes its sensors under
    pub sensor_namespace: String,
    /// Shell used to issue management queries and privileged launches
    pub shell: String,
    /// Directory holding the scratch cache files
    pub scratch_dir: PathBuf,
    /// Prefix of every scratch file we create
    pub scratch_prefix: String,
    /// Sensor polling period in milliseconds
    pub poll_interval_ms: u64,
    /// Liveness sweep period in milliseconds
    pub sweep_interval_ms: u64,
    /// Delivery cadence for desktop subscribers in milliseconds
    pub default_cadence_ms: u64,
    /// Delivery cadence for mobile subscribers in milliseconds
    pub mobile_cadence_ms: u64,
    /// Minimum gap between two log lines of the same category in milliseconds
    pub log_throttle_ms: u64,
    /// Upper bound for any single child-process invocation in milliseconds
    pub command_timeout_ms: u64,
    /// Command users are told to run when the utility is missing
    pub setup_hint: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let install_dir = PathBuf::from("vendor").join("open-hardware-monitor");
        Self {
            utility_path: install_dir.join("OpenHardwareMonitor.exe"),
            process_name: "OpenHardwareMonitor".to_string(),
            helper_script_path: install_dir.join("close_ohm.vbs"),
            sensor_namespace: "root\\OpenHardwareMonitor".to_string(),
            shell: "powershell.exe".to_string(),
            scratch_dir: std::env::temp_dir(),
            scratch_prefix: "ohm_".to_string(),
            poll_interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
            sweep_interval_ms: crate::DEFAULT_SWEEP_INTERVAL_MS,
            default_cadence_ms: crate::DEFAULT_CADENCE_MS,
            mobile_cadence_ms: crate::MOBILE_CADENCE_MS,
            log_throttle_ms: 10_000,
            command_timeout_ms: 5_000,
            setup_hint: "run the sensor utility setup step to download and install it".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn with_utility_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.utility_path = path.into();
        self
    }

    pub fn with_helper_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_script_path = path.into();
        self
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = ms;
        self
    }

    pub fn with_cadences(mut self, default_ms: u64, mobile_ms: u64) -> Self {
        self.default_cadence_ms = default_ms;
        self.mobile_cadence_ms = mobile_ms;
        self
    }

    pub fn with_command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn log_throttle(&self) -> Duration {
        Duration::from_millis(self.log_throttle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }

    /// Cadence for a device class, clamped to [`MIN_CADENCE_MS`].
    pub fn cadence_for(&self, device: crate::metrics::data::DeviceClass) -> u64 {
        let ms = match device {
            crate::metrics::data::DeviceClass::Desktop => self.default_cadence_ms,
            crate::metrics::data::DeviceClass::Mobile => self.mobile_cadence_ms,
        };
        ms.max(MIN_CADENCE_MS)
    }

    pub fn temp_file(&self) -> PathBuf {
        self.scratch_file("temp_data.txt")
    }

    pub fn mem_file(&self) -> PathBuf {
        self.scratch_file("mem_data.txt")
    }

    pub fn method_file(&self) -> PathBuf {
        self.scratch_file("method_info.txt")
    }

    fn scratch_file(&self, suffix: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{}{}", self.scratch_prefix, suffix))
    }

    /// Whether `path` is one of our scratch files.
    pub fn is_scratch_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(&self.scratch_prefix) || n.contains(&self.process_name))
            .unwrap_or(false)
    }
}
