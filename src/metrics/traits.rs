//! Seams between the telemetry core and the host operating system.
//!
//! Both traits are object safe so the service can be wired with the real
//! implementations at startup and with fakes in tests.

use crate::error::Result;
use crate::metrics::data::{MemoryTriple, SourceMethod};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// A tier of the sensor fallback chain.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Acquisition method reported for values from this source.
    fn method(&self) -> SourceMethod;

    /// Read the CPU temperature in Celsius.
    async fn read_temperature(&self) -> Result<f64>;

    /// Read total/free/used memory in GB.
    async fn read_memory(&self) -> Result<MemoryTriple>;
}

/// A child-process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Process enumeration and short-lived command execution.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// PIDs of running processes whose name matches `name` (case-insensitive,
    /// with or without an `.exe` suffix).
    async fn find_process(&self, name: &str) -> Result<Vec<u32>>;

    /// Run a command to completion, killing it if it outlives `timeout`.
    ///
    /// Spawn failures and timeouts are errors; a non-zero exit is reported
    /// through [`CommandOutput::success`].
    async fn run(&self, command: &HostCommand, timeout: Duration) -> Result<CommandOutput>;
}
