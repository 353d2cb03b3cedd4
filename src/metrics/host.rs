//! Real [`ProcessHost`] backed by `tokio::process` and `sysinfo`.

use crate::error::{Result, TelemetryError};
use crate::metrics::traits::{CommandOutput, HostCommand, ProcessHost};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::process::Command;

/// Runs commands on the local machine.
#[derive(Debug, Default, Clone)]
pub struct SystemProcessHost;

impl SystemProcessHost {
    pub fn new() -> Self {
        Self
    }
}

/// Normalise a process name for comparison: lowercase, no `.exe`.
pub fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

#[async_trait]
impl ProcessHost for SystemProcessHost {
    async fn find_process(&self, name: &str) -> Result<Vec<u32>> {
        let wanted = normalize_process_name(name);
        tokio::task::spawn_blocking(move || {
            let sys = System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new()),
            );
            sys.processes()
                .iter()
                .filter(|(_, process)| {
                    let name = OsStr::new(process.name()).to_string_lossy();
                    normalize_process_name(&name) == wanted
                })
                .map(|(pid, _)| pid.as_u32())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| TelemetryError::sensor_unavailable(format!("process enumeration failed: {}", e)))
    }

    async fn run(&self, command: &HostCommand, timeout: Duration) -> Result<CommandOutput> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TelemetryError::sensor_unavailable(format!(
                "`{}` timed out after {}ms",
                command.program,
                timeout.as_millis()
            ))),
        }
    }
}
