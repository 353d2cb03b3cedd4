//! Lifecycle of the external hardware-monitoring process.
//!
//! The utility needs elevated privileges, so every action here tries the
//! cheapest check first and escalates only when it has to.

use crate::metrics::config::MonitorConfig;
use crate::metrics::traits::{HostCommand, ProcessHost};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Where the process manager is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Singleton state owned by [`ProcessManager`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorProcessState {
    pub phase: ProcessPhase,
    /// Consecutive failed launches, reset on success
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Default for MonitorProcessState {
    fn default() -> Self {
        Self {
            phase: ProcessPhase::Stopped,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Result of [`ProcessManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The utility was already running; nothing was launched.
    AlreadyRunning,
    /// A launch request succeeded.
    Launched { elevated: bool },
    /// Monitoring stays off.
    Failed { reason: String },
}

impl LaunchOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, LaunchOutcome::Failed { .. })
    }
}

/// Termination strategies, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStrategy {
    HelperScript,
    ManagementObject,
    KillByName,
}

/// Result of [`ProcessManager::force_terminate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing to do; no privilege escalation was attempted.
    NotRunning,
    Terminated { strategy: KillStrategy },
    Failed { reason: String },
}

/// Starts, tracks and kills the sensor utility.
pub struct ProcessManager {
    config: Arc<MonitorConfig>,
    host: Arc<dyn ProcessHost>,
    state: Mutex<MonitorProcessState>,
}

impl ProcessManager {
    pub fn new(config: Arc<MonitorConfig>, host: Arc<dyn ProcessHost>) -> Self {
        Self {
            config,
            host,
            state: Mutex::new(MonitorProcessState::default()),
        }
    }

    pub async fn state(&self) -> MonitorProcessState {
        self.state.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.phase == ProcessPhase::Running
    }

    /// Make sure the utility is running. Idempotent.
    ///
    /// Running is recorded as soon as a launch request succeeds; the utility
    /// may take a moment before its sensors answer.
    pub async fn start(&self) -> LaunchOutcome {
        let mut state = self.state.lock().await;
        if state.phase == ProcessPhase::Running {
            return LaunchOutcome::AlreadyRunning;
        }

        if !self.config.utility_path.exists() {
            let reason = format!(
                "sensor utility not found at {}; {}",
                self.config.utility_path.display(),
                self.config.setup_hint
            );
            error!("{}", reason);
            return Self::record_failure(&mut state, reason);
        }

        match self.host.find_process(&self.config.process_name).await {
            Ok(pids) if !pids.is_empty() => {
                info!("sensor utility already running (pid {:?})", pids);
                state.phase = ProcessPhase::Running;
                state.retry_count = 0;
                state.last_error = None;
                return LaunchOutcome::AlreadyRunning;
            }
            Ok(_) => {}
            Err(e) => debug!("process enumeration failed, assuming not running: {}", e),
        }

        state.phase = ProcessPhase::Starting;
        info!("launching sensor utility {}", self.config.utility_path.display());

        let timeout = self.config.command_timeout();
        let elevated = launch_command(&self.config, true);
        let outcome = match self.host.run(&elevated, timeout).await {
            Ok(output) if output.success => LaunchOutcome::Launched { elevated: true },
            elevated_result => {
                match elevated_result {
                    Ok(output) => warn!("elevated launch refused: {}", output.stderr.trim()),
                    Err(e) => warn!("elevated launch could not be requested: {}", e),
                }
                let plain = launch_command(&self.config, false);
                match self.host.run(&plain, timeout).await {
                    Ok(output) if output.success => LaunchOutcome::Launched { elevated: false },
                    Ok(output) => LaunchOutcome::Failed {
                        reason: format!("launch exited unsuccessfully: {}", output.stderr.trim()),
                    },
                    Err(e) => LaunchOutcome::Failed {
                        reason: format!("launch failed: {}", e),
                    },
                }
            }
        };

        match outcome {
            LaunchOutcome::Failed { reason } => {
                error!("could not start sensor utility: {}", reason);
                Self::record_failure(&mut state, reason)
            }
            launched => {
                state.phase = ProcessPhase::Running;
                state.retry_count = 0;
                state.last_error = None;
                launched
            }
        }
    }

    fn record_failure(state: &mut MonitorProcessState, reason: String) -> LaunchOutcome {
        state.phase = ProcessPhase::Stopped;
        state.retry_count = state.retry_count.saturating_add(1);
        state.last_error = Some(reason.clone());
        LaunchOutcome::Failed { reason }
    }

    /// Stop monitoring: terminate the utility and mark it stopped.
    pub async fn stop(&self) -> TerminateOutcome {
        self.force_terminate().await
    }

    /// Best-effort privileged kill of the utility. Never fails loudly.
    pub async fn force_terminate(&self) -> TerminateOutcome {
        let mut state = self.state.lock().await;
        state.phase = ProcessPhase::Stopping;
        let outcome = self.terminate_inner().await;
        state.phase = ProcessPhase::Stopped;

        match &outcome {
            TerminateOutcome::NotRunning => debug!("sensor utility not running, nothing to terminate"),
            TerminateOutcome::Terminated { strategy } => info!("sensor utility terminated via {:?}", strategy),
            TerminateOutcome::Failed { reason } => {
                warn!("could not terminate sensor utility: {}", reason);
                state.last_error = Some(reason.clone());
            }
        }
        outcome
    }

    async fn terminate_inner(&self) -> TerminateOutcome {
        let pids = match self.host.find_process(&self.config.process_name).await {
            Ok(pids) if !pids.is_empty() => pids,
            _ => return TerminateOutcome::NotRunning,
        };
        info!("terminating sensor utility (pid {:?})", pids);

        let timeout = self.config.command_timeout();

        if let Some(command) = self.helper_command().await {
            let ran = self.host.run(&command.command, timeout).await;
            command.cleanup().await;
            if matches!(ran, Ok(ref output) if output.success) {
                return TerminateOutcome::Terminated {
                    strategy: KillStrategy::HelperScript,
                };
            }
            debug!("helper script termination failed: {:?}", ran);
        }

        let management = management_kill_command(&self.config, &pids);
        match self.host.run(&management, timeout).await {
            Ok(output) if output.success => {
                return TerminateOutcome::Terminated {
                    strategy: KillStrategy::ManagementObject,
                }
            }
            other => debug!("management-object termination failed: {:?}", other),
        }

        let by_name = kill_by_name_command(&self.config);
        match self.host.run(&by_name, timeout).await {
            Ok(output) if output.success => TerminateOutcome::Terminated {
                strategy: KillStrategy::KillByName,
            },
            Ok(output) => TerminateOutcome::Failed {
                reason: format!("kill-by-name exited unsuccessfully: {}", output.stderr.trim()),
            },
            Err(e) => TerminateOutcome::Failed {
                reason: format!("kill-by-name failed: {}", e),
            },
        }
    }

    /// Elevated helper invocation, writing a temporary helper if the signed
    /// one is missing.
    async fn helper_command(&self) -> Option<HelperInvocation> {
        if self.config.helper_script_path.exists() {
            return Some(HelperInvocation {
                command: helper_script_command(&self.config, &self.config.helper_script_path),
                temporary: None,
            });
        }

        let temp = self
            .config
            .scratch_dir
            .join(format!("{}kill_helper.{}", self.config.scratch_prefix, HELPER_EXTENSION));
        if let Err(e) = tokio::fs::write(&temp, temporary_helper_body(&self.config)).await {
            debug!("could not write temporary helper: {}", e);
            return None;
        }
        Some(HelperInvocation {
            command: helper_script_command(&self.config, &temp),
            temporary: Some(temp),
        })
    }
}

struct HelperInvocation {
    command: HostCommand,
    temporary: Option<std::path::PathBuf>,
}

impl HelperInvocation {
    async fn cleanup(&self) {
        if let Some(path) = &self.temporary {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

fn executable_name(config: &MonitorConfig) -> String {
    if cfg!(windows) {
        format!("{}.exe", config.process_name)
    } else {
        config.process_name.clone()
    }
}

#[cfg(windows)]
const HELPER_EXTENSION: &str = "vbs";
#[cfg(not(windows))]
const HELPER_EXTENSION: &str = "sh";

#[cfg(windows)]
pub fn launch_command(config: &MonitorConfig, elevated: bool) -> HostCommand {
    let verb = if elevated { " -Verb RunAs" } else { "" };
    HostCommand::new(&config.shell).args(["-NoProfile", "-Command"]).arg(format!(
        "Start-Process '{}' -WindowStyle Hidden{}",
        config.utility_path.display(),
        verb
    ))
}

#[cfg(not(windows))]
pub fn launch_command(config: &MonitorConfig, elevated: bool) -> HostCommand {
    let prefix = if elevated { "pkexec " } else { "" };
    HostCommand::new("sh").arg("-c").arg(format!(
        "nohup {}'{}' >/dev/null 2>&1 &",
        prefix,
        config.utility_path.display()
    ))
}

#[cfg(windows)]
fn helper_script_command(config: &MonitorConfig, script: &Path) -> HostCommand {
    HostCommand::new(&config.shell)
        .args(["-NoProfile", "-WindowStyle", "Hidden", "-Command"])
        .arg(format!(
            "Start-Process -FilePath 'wscript.exe' -ArgumentList '{}' -Verb RunAs -WindowStyle Hidden -Wait",
            script.display()
        ))
}

#[cfg(not(windows))]
fn helper_script_command(_config: &MonitorConfig, script: &Path) -> HostCommand {
    HostCommand::new("pkexec")
        .arg("sh")
        .arg(script.display().to_string())
}

#[cfg(windows)]
fn temporary_helper_body(config: &MonitorConfig) -> String {
    format!(
        "Set objShell = CreateObject(\"WScript.Shell\")\nobjShell.Run \"taskkill /F /IM {} /T\", 0, True\n",
        executable_name(config)
    )
}

#[cfg(not(windows))]
fn temporary_helper_body(config: &MonitorConfig) -> String {
    format!("#!/bin/sh\npkill -9 -x '{}'\n", executable_name(config))
}

#[cfg(windows)]
fn management_kill_command(config: &MonitorConfig, _pids: &[u32]) -> HostCommand {
    HostCommand::new(&config.shell)
        .args(["-NoProfile", "-WindowStyle", "Hidden", "-Command"])
        .arg(format!(
            "Get-WmiObject Win32_Process -Filter \"Name='{}'\" | ForEach-Object {{ $_.Terminate() }}",
            executable_name(config)
        ))
}

#[cfg(not(windows))]
fn management_kill_command(_config: &MonitorConfig, pids: &[u32]) -> HostCommand {
    HostCommand::new("kill")
        .arg("-KILL")
        .args(pids.iter().map(|p| p.to_string()))
}

#[cfg(windows)]
fn kill_by_name_command(config: &MonitorConfig) -> HostCommand {
    HostCommand::new("taskkill").args(["/F", "/IM"]).arg(executable_name(config))
}

#[cfg(not(windows))]
fn kill_by_name_command(config: &MonitorConfig) -> HostCommand {
    HostCommand::new("pkill").args(["-9", "-x"]).arg(executable_name(config))
}
