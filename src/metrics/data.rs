//! Data structures for sensor readings and subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text shown wherever a value could not be obtained.
pub const NOT_AVAILABLE: &str = "N/A";

/// How a value was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceMethod {
    /// Queried from the external hardware-monitoring utility.
    ExternalSensorApi,
    /// Read directly from the operating system.
    OsFallback,
    /// Nothing could be read.
    Unavailable,
}

impl SourceMethod {
    /// Human readable description, persisted to the method side file.
    pub fn describe(&self) -> &'static str {
        match self {
            SourceMethod::ExternalSensorApi => "external sensor utility (management query provider)",
            SourceMethod::OsFallback => "operating system sensors",
            SourceMethod::Unavailable => "unavailable",
        }
    }
}

/// Memory statistics in gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryTriple {
    pub total: f64,
    pub free: f64,
    pub used: f64,
}

impl MemoryTriple {
    /// Build a triple from up to three raw figures, synthesizing the missing one.
    ///
    /// A zero means "not reported". The result satisfies `used + free ≈ total`
    /// whenever at least two figures were known. Returns `None` when there is
    /// not enough information to produce a meaningful triple.
    pub fn reconcile(total: f64, used: f64, free: f64) -> Option<Self> {
        let mut total = total.max(0.0);
        let mut used = used.max(0.0);
        let mut free = free.max(0.0);

        if total == 0.0 && used > 0.0 && free > 0.0 {
            total = used + free;
        }

        if total > 0.0 {
            if used > 0.0 && free == 0.0 {
                free = (total - used).max(0.0);
            } else if free > 0.0 && used == 0.0 {
                used = (total - free).max(0.0);
            }
        }

        if total > 0.0 && (used > 0.0 || free > 0.0) {
            Some(Self { total, free, used })
        } else {
            None
        }
    }

    /// Used memory as a percentage of total (0.0 to 100.0).
    pub fn used_percent(&self) -> f64 {
        if self.total > 0.0 {
            (self.used / self.total * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Scratch-file encoding: `total,free,used` with two decimals.
    pub fn to_scratch_line(&self) -> String {
        format!("{:.2},{:.2},{:.2}", self.total, self.free, self.used)
    }

    /// Parse the scratch-file encoding written by [`MemoryTriple::to_scratch_line`].
    pub fn from_scratch_line(line: &str) -> Option<Self> {
        let mut parts = line.trim().split(',').map(|p| p.trim().parse::<f64>());
        let total = parts.next()?.ok()?;
        let free = parts.next()?.ok()?;
        let used = parts.next()?.ok()?;
        if parts.next().is_some() || !total.is_finite() || !free.is_finite() || !used.is_finite() {
            return None;
        }
        Some(Self { total, free, used })
    }
}

/// Immutable snapshot of the latest sensor values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// CPU temperature in Celsius
    pub temperature_celsius: Option<f64>,
    /// Memory statistics in GB
    pub memory: Option<MemoryTriple>,
    /// When this reading was captured
    pub captured_at: DateTime<Utc>,
    /// How the reading was obtained
    pub source_method: SourceMethod,
}

impl SensorReading {
    /// Placeholder served before the first successful poll.
    pub fn unavailable() -> Self {
        Self {
            temperature_celsius: None,
            memory: None,
            captured_at: Utc::now(),
            source_method: SourceMethod::Unavailable,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.temperature_celsius.is_none() && self.memory.is_none()
    }

    /// Temperature formatted for the wire: one decimal, or `"N/A"`.
    pub fn cpu_temp_display(&self) -> String {
        format_temperature(self.temperature_celsius)
    }

    /// Unix timestamp in milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }
}

pub fn format_temperature(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.1}", v),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Outcome of a single sensor read.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorRead<T> {
    /// A value was obtained with the given method.
    Value { value: T, method: SourceMethod },
    /// No value right now; carries the reason for logs and tests.
    Unavailable { reason: String },
}

impl<T> SensorRead<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        SensorRead::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            SensorRead::Value { value, .. } => Some(value),
            SensorRead::Unavailable { .. } => None,
        }
    }

    pub fn method(&self) -> SourceMethod {
        match self {
            SensorRead::Value { method, .. } => *method,
            SensorRead::Unavailable { .. } => SourceMethod::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SensorRead::Value { .. })
    }
}

/// Kind of device behind a subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Parse a client-supplied hint; anything unrecognised is a desktop.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "mobile" | "phone" | "tablet" | "widget" => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        }
    }
}

/// Opaque correlation key of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live transport connection receiving periodic snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub device_class: DeviceClass,
    /// Delivery period in milliseconds, never below 1000
    pub cadence_ms: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}
