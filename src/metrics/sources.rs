//! Sensor sources: the external hardware-monitoring utility and the OS itself.
//!
//! The parsing helpers are free functions so they can be exercised against
//! captured query output without running any command.

use crate::error::{Result, TelemetryError};
use crate::metrics::config::MonitorConfig;
use crate::metrics::data::{MemoryTriple, SourceMethod};
use crate::metrics::traits::{HostCommand, ProcessHost, SensorSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use sysinfo::{Components, System};

/// Raw memory values above this are megabytes, not gigabytes.
///
/// Known approximation: the utility reports some memory sensors in MB and
/// others in GB, and nothing in the record says which.
pub const MB_PLAUSIBILITY_THRESHOLD: f64 = 100.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One `{Name, Value, SensorType}` record from a sensor query.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SensorRecord {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
    #[serde(rename = "SensorType", default)]
    pub sensor_type: Option<String>,
}

impl SensorRecord {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Numeric value, accepting both JSON numbers and numeric strings.
    pub fn numeric_value(&self) -> Option<f64> {
        let v = match self.value.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok()?,
            _ => return None,
        };
        v.is_finite().then_some(v)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<SensorRecord>),
    One(SensorRecord),
}

/// Parse the JSON emitted by a category-filtered sensor query.
///
/// The query tool emits a bare object for a single match and an array for
/// several, so both shapes are accepted.
pub fn parse_sensor_records(stdout: &str) -> Result<Vec<SensorRecord>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::sensor_unavailable("sensor query returned no output"));
    }
    match serde_json::from_str::<OneOrMany>(trimmed) {
        Ok(OneOrMany::Many(records)) => Ok(records),
        Ok(OneOrMany::One(record)) => Ok(vec![record]),
        Err(e) => Err(TelemetryError::malformed_output(format!("sensor records: {}", e))),
    }
}

fn round_tenths(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Pick the CPU temperature out of temperature-class records.
///
/// Prefers the first record whose name mentions the CPU, otherwise takes the
/// first record. A zero value means the sensor is not ready yet and never
/// counts as a reading.
pub fn select_cpu_temperature(records: &[SensorRecord]) -> Option<f64> {
    let ready = |r: &&SensorRecord| r.numeric_value().is_some_and(|v| v != 0.0);
    records
        .iter()
        .filter(ready)
        .find(|r| r.name().contains("CPU"))
        .or_else(|| records.first().filter(ready))
        .and_then(SensorRecord::numeric_value)
        .map(round_tenths)
}

/// Reconcile total/used/available memory records into a triple in GB.
pub fn reconcile_memory_records(records: &[SensorRecord]) -> Option<MemoryTriple> {
    let mut total = 0.0;
    let mut used = 0.0;
    let mut free = 0.0;

    for record in records {
        let name = record.name();
        let relevant = name.contains("Memory")
            && (name.contains("Total") || name.contains("Used") || name.contains("Available"));
        if !relevant {
            continue;
        }
        let Some(mut value) = record.numeric_value() else {
            continue;
        };
        if value > MB_PLAUSIBILITY_THRESHOLD && !name.contains("Percent") {
            value /= 1024.0;
        }

        if name.contains("Total") {
            total = value;
        } else if name.contains("Used") || name.contains("Usage") {
            used = value;
        } else if name.contains("Available") || name.contains("Free") {
            free = value;
        }
    }

    MemoryTriple::reconcile(total, used, free)
}

/// Queries the external hardware-monitoring utility through the OS
/// management query interface.
pub struct ExternalUtilitySource {
    config: Arc<MonitorConfig>,
    host: Arc<dyn ProcessHost>,
}

impl ExternalUtilitySource {
    pub fn new(config: Arc<MonitorConfig>, host: Arc<dyn ProcessHost>) -> Self {
        Self { config, host }
    }

    fn query_command(&self, filter: &str, fields: &str) -> HostCommand {
        let script = format!(
            "Get-WmiObject -Namespace {} -Class Sensor | Where-Object {{ {} }} | Select-Object {} | ConvertTo-Json -Depth 2",
            self.config.sensor_namespace, filter, fields
        );
        HostCommand::new(&self.config.shell).args(["-NoProfile", "-Command"]).arg(script)
    }

    pub fn temperature_query(&self) -> HostCommand {
        self.query_command(
            "$_.SensorType -eq 'Temperature' -and $_.Name -like '*CPU*'",
            "Name,Value,SensorType",
        )
    }

    pub fn memory_query(&self) -> HostCommand {
        self.query_command(
            "$_.SensorType -eq 'Data' -and $_.Name -match '(Used|Available|Memory)'",
            "Name,Value,SensorType,InstanceId",
        )
    }

    async fn query(&self, command: HostCommand) -> Result<Vec<SensorRecord>> {
        let pids = self.host.find_process(&self.config.process_name).await?;
        if pids.is_empty() {
            return Err(TelemetryError::sensor_unavailable("sensor utility is not running"));
        }

        let output = self
            .host
            .run(&command, self.config.command_timeout())
            .await?;
        if !output.success {
            return Err(TelemetryError::sensor_unavailable(format!(
                "sensor query failed: {}",
                output.stderr.trim()
            )));
        }
        parse_sensor_records(&output.stdout)
    }
}

#[async_trait]
impl SensorSource for ExternalUtilitySource {
    fn method(&self) -> SourceMethod {
        SourceMethod::ExternalSensorApi
    }

    async fn read_temperature(&self) -> Result<f64> {
        let records = self.query(self.temperature_query()).await?;
        select_cpu_temperature(&records)
            .ok_or_else(|| TelemetryError::malformed_output("no usable CPU temperature record"))
    }

    async fn read_memory(&self) -> Result<MemoryTriple> {
        let records = self.query(self.memory_query()).await?;
        reconcile_memory_records(&records)
            .ok_or_else(|| TelemetryError::malformed_output("memory records could not be reconciled"))
    }
}

/// Reads sensors the operating system exposes directly.
#[derive(Debug, Default, Clone)]
pub struct OsNativeSource;

impl OsNativeSource {
    pub fn new() -> Self {
        Self
    }

    /// Current memory figures from the OS. Cheap and never privileged.
    pub fn memory_now() -> Option<MemoryTriple> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory() as f64 / BYTES_PER_GB;
        let free = sys.available_memory() as f64 / BYTES_PER_GB;
        if total <= 0.0 {
            return None;
        }
        Some(MemoryTriple {
            total,
            free,
            used: (total - free).max(0.0),
        })
    }

    /// [`Self::memory_now`] on the blocking pool.
    pub async fn memory() -> Option<MemoryTriple> {
        tokio::task::spawn_blocking(Self::memory_now)
            .await
            .ok()
            .flatten()
    }

    /// Hottest CPU-labelled component, if the OS exposes one.
    pub fn cpu_temperature_now() -> Option<f64> {
        let components = Components::new_with_refreshed_list();
        components
            .iter()
            .filter(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu")
                    || label.contains("package")
                    || label.contains("tctl")
                    || label.contains("tdie")
            })
            .map(|c| c.temperature() as f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(round_tenths)
    }
}

#[async_trait]
impl SensorSource for OsNativeSource {
    fn method(&self) -> SourceMethod {
        SourceMethod::OsFallback
    }

    async fn read_temperature(&self) -> Result<f64> {
        tokio::task::spawn_blocking(Self::cpu_temperature_now)
            .await
            .map_err(|e| TelemetryError::sensor_unavailable(e.to_string()))?
            .ok_or_else(|| TelemetryError::sensor_unavailable("no CPU temperature sensor exposed by the OS"))
    }

    async fn read_memory(&self) -> Result<MemoryTriple> {
        tokio::task::spawn_blocking(Self::memory_now)
            .await
            .map_err(|e| TelemetryError::sensor_unavailable(e.to_string()))?
            .ok_or_else(|| TelemetryError::sensor_unavailable("OS reported no memory"))
    }
}

/// The standard fallback chain: external utility first, then the OS.
pub fn default_sources(
    config: Arc<MonitorConfig>,
    host: Arc<dyn ProcessHost>,
) -> Vec<Arc<dyn SensorSource>> {
    vec![
        Arc::new(ExternalUtilitySource::new(config, host)),
        Arc::new(OsNativeSource::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::traits::testing::ScriptedHost;

    const TEMPERATURE_ARRAY: &str = r#"[
        {"Name": "GPU Core", "Value": 51.0, "SensorType": "Temperature"},
        {"Name": "CPU Package", "Value": 47.25, "SensorType": "Temperature"},
        {"Name": "CPU Core #1", "Value": 45.0, "SensorType": "Temperature"}
    ]"#;

    const MEMORY_MB: &str = r#"[
        {"Name": "Used Memory", "Value": 8192.0, "SensorType": "Data", "InstanceId": 1},
        {"Name": "Available Memory", "Value": 8192.0, "SensorType": "Data", "InstanceId": 2}
    ]"#;

    #[test]
    fn picks_cpu_named_temperature() {
        let records = parse_sensor_records(TEMPERATURE_ARRAY).unwrap();
        assert_eq!(select_cpu_temperature(&records), Some(47.3));
    }

    #[test]
    fn single_object_output_is_accepted() {
        let records =
            parse_sensor_records(r#"{"Name": "CPU Package", "Value": "52,4", "SensorType": "Temperature"}"#)
                .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(select_cpu_temperature(&records), Some(52.4));
    }

    #[test]
    fn falls_back_to_first_record_without_cpu_name() {
        let records =
            parse_sensor_records(r#"[{"Name": "Mainboard", "Value": 38.0}, {"Name": "HDD", "Value": 30.0}]"#)
                .unwrap();
        assert_eq!(select_cpu_temperature(&records), Some(38.0));
    }

    #[test]
    fn zero_reading_is_not_a_temperature() {
        let single = parse_sensor_records(
            r#"{"Name": "CPU Package", "Value": 0, "SensorType": "Temperature"}"#,
        )
        .unwrap();
        assert_eq!(select_cpu_temperature(&single), None);

        let all_zero = parse_sensor_records(
            r#"[{"Name": "CPU Core #1", "Value": 0}, {"Name": "CPU Package", "Value": 0}]"#,
        )
        .unwrap();
        assert_eq!(select_cpu_temperature(&all_zero), None);

        let first_zero = parse_sensor_records(
            r#"[{"Name": "Mainboard", "Value": 0}, {"Name": "CPU Package", "Value": 44.0}]"#,
        )
        .unwrap();
        assert_eq!(select_cpu_temperature(&first_zero), Some(44.0));
    }

    #[test]
    fn empty_and_malformed_output_are_errors() {
        assert!(matches!(
            parse_sensor_records("   \r\n"),
            Err(TelemetryError::SensorUnavailable(_))
        ));
        assert!(matches!(
            parse_sensor_records("Get-WmiObject : Invalid namespace"),
            Err(TelemetryError::MalformedSensorOutput(_))
        ));
    }

    #[test]
    fn megabyte_values_are_converted_and_total_synthesized() {
        let records = parse_sensor_records(MEMORY_MB).unwrap();
        let memory = reconcile_memory_records(&records).unwrap();
        assert_eq!(memory.used, 8.0);
        assert_eq!(memory.free, 8.0);
        assert_eq!(memory.total, 16.0);
    }

    #[test]
    fn unrelated_records_are_ignored() {
        let records = parse_sensor_records(
            r#"[{"Name": "GPU Core Load", "Value": 1.5}, {"Name": "Disk Used Space", "Value": 200.0}]"#,
        )
        .unwrap();
        assert!(reconcile_memory_records(&records).is_none());
    }

    fn utility_source(host: &Arc<ScriptedHost>) -> ExternalUtilitySource {
        ExternalUtilitySource::new(Arc::new(MonitorConfig::default()), host.clone())
    }

    #[tokio::test]
    async fn query_is_skipped_when_utility_is_not_running() {
        let host = Arc::new(ScriptedHost::running(&[]).with_stdout(TEMPERATURE_ARRAY));
        let source = utility_source(&host);

        assert!(matches!(
            source.read_temperature().await,
            Err(TelemetryError::SensorUnavailable(_))
        ));
        assert!(host.ran().is_empty());
    }

    #[tokio::test]
    async fn failed_query_is_unavailable() {
        let config = Arc::new(MonitorConfig::default());
        let queries = ExternalUtilitySource::new(config.clone(), Arc::new(ScriptedHost::default()));
        let host = Arc::new(
            ScriptedHost::running(&[7])
                .with_stdout(MEMORY_MB)
                .failing(queries.memory_query()),
        );
        let source = ExternalUtilitySource::new(config, host.clone());

        assert!(matches!(
            source.read_memory().await,
            Err(TelemetryError::SensorUnavailable(_))
        ));
        assert_eq!(host.ran(), vec![source.memory_query()]);
    }

    #[tokio::test]
    async fn not_ready_temperature_is_rejected() {
        let host = Arc::new(
            ScriptedHost::running(&[7])
                .with_stdout(r#"{"Name": "CPU Package", "Value": 0, "SensorType": "Temperature"}"#),
        );

        assert!(matches!(
            utility_source(&host).read_temperature().await,
            Err(TelemetryError::MalformedSensorOutput(_))
        ));
    }

    #[tokio::test]
    async fn running_utility_answers_queries() {
        let host = Arc::new(ScriptedHost::running(&[7]).with_stdout(TEMPERATURE_ARRAY));
        assert_eq!(utility_source(&host).read_temperature().await.unwrap(), 47.3);
    }
}
