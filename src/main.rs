//! Cinema Telemetry binary.
//!
//! Serves live sensor telemetry to dashboards and widgets, or probes the
//! sensors once from the command line.

use anyhow::Context;
use cinema_telemetry::metrics::host::SystemProcessHost;
use cinema_telemetry::metrics::process::ProcessManager;
use cinema_telemetry::metrics::sources::default_sources;
use cinema_telemetry::metrics::traits::{ProcessHost, SensorSource};
use cinema_telemetry::{
    start_web_server, MemoryTriple, MonitorConfig, TelemetryService, TerminateOutcome, WebConfig,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_SWEEP_INTERVAL_MS, DEFAULT_WEB_PORT,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cinema_telemetry")]
#[command(about = "Live CPU temperature and memory telemetry for the movie-night server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Sensor polling interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval: u64,

    /// Stale-subscriber sweep interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval: u64,

    /// Path to the hardware-monitoring utility executable
    #[arg(long)]
    utility_path: Option<PathBuf>,

    /// Path to the signed helper script that stops the utility
    #[arg(long)]
    helper_script: Option<PathBuf>,

    /// Directory for the scratch cache files
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (default)
    Serve(ServeArgs),

    /// Read the sensors once and exit
    Probe(ProbeArgs),

    /// Stop a stray hardware-monitoring utility and exit
    StopMonitor,
}

#[derive(Args)]
struct ServeArgs {
    /// Static files directory for the dashboard (optional)
    #[arg(long)]
    static_dir: Option<String>,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Maximum WebSocket connections
    #[arg(long, default_value_t = 100)]
    max_connections: usize,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            static_dir: None,
            no_cors: false,
            max_connections: 100,
        }
    }
}

#[derive(Args)]
struct ProbeArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let monitor_config = monitor_config(&cli);

    match &cli.command {
        Some(Commands::Serve(args)) => serve_command(&cli, args, monitor_config).await,
        Some(Commands::Probe(args)) => probe_command(args, monitor_config).await,
        Some(Commands::StopMonitor) => stop_monitor_command(monitor_config).await,
        None => serve_command(&cli, &ServeArgs::default(), monitor_config).await,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))
}

fn monitor_config(cli: &Cli) -> MonitorConfig {
    let mut config = MonitorConfig::default()
        .with_poll_interval_ms(cli.poll_interval)
        .with_sweep_interval_ms(cli.sweep_interval);
    if let Some(path) = &cli.utility_path {
        config = config.with_utility_path(path);
    }
    if let Some(path) = &cli.helper_script {
        config = config.with_helper_script(path);
    }
    if let Some(dir) = &cli.scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    config
}

async fn serve_command(cli: &Cli, args: &ServeArgs, monitor: MonitorConfig) -> anyhow::Result<()> {
    let web_config = WebConfig::new(&cli.host, cli.port)
        .with_static_path(args.static_dir.clone())
        .with_cors(!args.no_cors)
        .with_max_websocket_connections(args.max_connections);

    info!("Web server configuration:");
    info!("  - Bind address: {}", web_config.bind_address());
    info!("  - CORS enabled: {}", web_config.enable_cors);
    info!("  - Max WebSocket connections: {}", web_config.max_websocket_connections);
    info!("  - Sensor utility: {}", monitor.utility_path.display());
    info!("  - Poll interval: {}ms", monitor.poll_interval_ms);

    let service = TelemetryService::new(monitor);
    start_web_server(web_config, service)
        .await
        .context("web server failed")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeResult {
    source: String,
    temperature_celsius: Option<f64>,
    temperature_error: Option<String>,
    memory: Option<MemoryTriple>,
    memory_error: Option<String>,
}

async fn probe_command(args: &ProbeArgs, monitor: MonitorConfig) -> anyhow::Result<()> {
    let config = Arc::new(monitor);
    let host: Arc<dyn ProcessHost> = Arc::new(SystemProcessHost::new());

    let mut results = Vec::new();
    for source in default_sources(config, host) {
        let temperature = source.read_temperature().await;
        let memory = source.read_memory().await;
        results.push(ProbeResult {
            source: source.method().describe().to_string(),
            temperature_celsius: temperature.as_ref().ok().copied(),
            temperature_error: temperature.err().map(|e| e.to_string()),
            memory: memory.as_ref().ok().copied(),
            memory_error: memory.err().map(|e| e.to_string()),
        });
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&results)?),
        "pretty" => print_pretty_probe(&results),
        other => anyhow::bail!("Unsupported format: {}. Use 'json' or 'pretty'", other),
    }
    Ok(())
}

fn print_pretty_probe(results: &[ProbeResult]) {
    for result in results {
        println!("{}", result.source);
        match (result.temperature_celsius, &result.temperature_error) {
            (Some(t), _) => println!("  CPU temperature: {:.1}°C", t),
            (None, Some(e)) => println!("  CPU temperature: unavailable ({})", e),
            (None, None) => println!("  CPU temperature: unavailable"),
        }
        match (&result.memory, &result.memory_error) {
            (Some(m), _) => println!(
                "  Memory: {:.2} GB total, {:.2} GB used, {:.2} GB free",
                m.total, m.used, m.free
            ),
            (None, Some(e)) => println!("  Memory: unavailable ({})", e),
            (None, None) => println!("  Memory: unavailable"),
        }
        println!();
    }
}

async fn stop_monitor_command(monitor: MonitorConfig) -> anyhow::Result<()> {
    let host: Arc<dyn ProcessHost> = Arc::new(SystemProcessHost::new());
    let manager = ProcessManager::new(Arc::new(monitor), host);
    match manager.force_terminate().await {
        TerminateOutcome::NotRunning => println!("Sensor utility is not running"),
        TerminateOutcome::Terminated { strategy } => {
            println!("Sensor utility stopped ({:?})", strategy)
        }
        TerminateOutcome::Failed { reason } => anyhow::bail!("could not stop sensor utility: {}", reason),
    }
    Ok(())
}
