//! Sensor acquisition, the external monitor process and the polling cache.
//!
//! Readings flow one way: [`sources`] produce raw values, the
//! [`collector::SensorReader`] picks the first source that answers, and the
//! [`cache::PollingCache`] publishes the result for every subscriber.

pub mod cache;
pub mod collector;
pub mod config;
pub mod data;
pub mod history;
pub mod host;
pub mod process;
pub mod sources;
pub mod throttle;
pub mod traits;

// Re-export commonly used items
pub use cache::PollingCache;
pub use collector::SensorReader;
pub use config::MonitorConfig;
pub use data::{DeviceClass, MemoryTriple, SensorRead, SensorReading, SourceMethod, Subscriber, SubscriberId};
pub use process::{LaunchOutcome, ProcessManager, TerminateOutcome};
pub use traits::{ProcessHost, SensorSource};
