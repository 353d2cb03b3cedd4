use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use cinema_telemetry::{
    error::{Result, TelemetryError},
    metrics::{
        data::{DeviceClass, MemoryTriple, SourceMethod, SubscriberId},
        process::{launch_command, LaunchOutcome},
        traits::{CommandOutput, HostCommand, ProcessHost, SensorSource},
        MonitorConfig,
    },
    web::{
        create_app, websocket::handle_client_text, AppState, ChannelTransport, Transport,
        WebConfig,
    },
    TelemetryService,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

/// Host that pretends to launch and kill the sensor utility.
struct FakeHost {
    config: MonitorConfig,
    running: AtomicBool,
    launches: AtomicUsize,
    kills: AtomicUsize,
}

impl FakeHost {
    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHost for FakeHost {
    async fn find_process(&self, _name: &str) -> Result<Vec<u32>> {
        if self.running.load(Ordering::SeqCst) {
            Ok(vec![4242])
        } else {
            Ok(Vec::new())
        }
    }

    async fn run(&self, command: &HostCommand, _timeout: Duration) -> Result<CommandOutput> {
        let is_launch = *command == launch_command(&self.config, true)
            || *command == launch_command(&self.config, false);
        if is_launch {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
        } else {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(CommandOutput {
            success: true,
            ..Default::default()
        })
    }
}

/// Sensor source with fixed values that counts how often it is asked.
struct FakeSource {
    available: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl SensorSource for FakeSource {
    fn method(&self) -> SourceMethod {
        SourceMethod::ExternalSensorApi
    }

    async fn read_temperature(&self) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available {
            Ok(50.0)
        } else {
            Err(TelemetryError::sensor_unavailable("no sensors"))
        }
    }

    async fn read_memory(&self) -> Result<MemoryTriple> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available {
            Ok(MemoryTriple {
                total: 16.0,
                free: 6.0,
                used: 10.0,
            })
        } else {
            Err(TelemetryError::sensor_unavailable("no sensors"))
        }
    }
}

struct Fixture {
    _install: TempDir,
    scratch: TempDir,
    host: Arc<FakeHost>,
    source: Arc<FakeSource>,
    service: TelemetryService,
}

impl Fixture {
    fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn scratch_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("ohm_"))
            })
            .collect()
    }
}

fn fixture(installed: bool, sensors_available: bool) -> Fixture {
    let install = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let utility = install.path().join("OpenHardwareMonitor.exe");
    if installed {
        std::fs::write(&utility, b"stub").unwrap();
    }

    let config = MonitorConfig::default()
        .with_utility_path(&utility)
        .with_helper_script(install.path().join("close_ohm.vbs"))
        .with_scratch_dir(scratch.path());

    let host = Arc::new(FakeHost {
        config: config.clone(),
        running: AtomicBool::new(false),
        launches: AtomicUsize::new(0),
        kills: AtomicUsize::new(0),
    });
    let source = Arc::new(FakeSource {
        available: sensors_available,
        calls: AtomicUsize::new(0),
    });
    let service = TelemetryService::with_parts(config, host.clone(), vec![source.clone()]);

    Fixture {
        _install: install,
        scratch,
        host,
        source,
        service,
    }
}

fn transport(id: &str) -> (Arc<ChannelTransport>, UnboundedReceiver<String>) {
    let (transport, rx) = ChannelTransport::new(id);
    (Arc::new(transport), rx)
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut messages = Vec::new();
    while let Ok(text) = rx.try_recv() {
        messages.push(serde_json::from_str(&text).unwrap());
    }
    messages
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn first_subscriber_launches_once_and_last_one_stops_everything() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();

    let (a, mut a_rx) = transport("a");
    registry.register(a.clone(), DeviceClass::Desktop).await;
    assert_eq!(fx.host.launches(), 1);
    assert!(fx.service.process().is_running().await);
    assert!(fx.service.cache().is_polling());

    let (b, mut b_rx) = transport("b");
    registry.register(b.clone(), DeviceClass::Desktop).await;
    assert_eq!(fx.host.launches(), 1);
    assert_eq!(registry.count().get(), 2);

    sleep_ms(2_100).await;
    let a_msgs = drain(&mut a_rx);
    let b_msgs = drain(&mut b_rx);
    assert_eq!(a_msgs.len(), 1);
    assert_eq!(b_msgs.len(), 1);
    assert_eq!(a_msgs[0]["type"], "systemData");
    assert_eq!(a_msgs[0]["cpuTemp"], "50.0");
    assert_eq!(b_msgs[0]["memInfo"]["total"], 16.0);
    assert!(!fx.scratch_files().is_empty());

    assert!(registry.unregister(&SubscriberId::new(a.id())).await);
    assert!(fx.service.process().is_running().await);
    assert_eq!(fx.host.kills(), 0);

    sleep_ms(2_000).await;
    assert_eq!(drain(&mut b_rx).len(), 1);
    assert!(drain(&mut a_rx).is_empty());

    assert!(registry.unregister(&SubscriberId::new(b.id())).await);
    assert_eq!(registry.count().get(), 0);
    assert_eq!(fx.host.kills(), 1);
    assert!(!fx.service.process().is_running().await);
    assert!(!fx.service.cache().is_polling());
    assert!(fx.service.cache().latest().is_unavailable());
    assert!(fx.scratch_files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_registrations_launch_once() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();
    let (a, _a_rx) = transport("a");
    let (b, _b_rx) = transport("b");

    tokio::join!(
        registry.register(a, DeviceClass::Desktop),
        registry.register(b, DeviceClass::Mobile),
    );

    assert_eq!(fx.host.launches(), 1);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn registering_the_same_transport_twice_is_idempotent() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();
    let (a, _rx) = transport("a");

    let first = registry.register(a.clone(), DeviceClass::Desktop).await;
    let second = registry.register(a.clone(), DeviceClass::Mobile).await;

    assert_eq!(first, second);
    assert_eq!(registry.count().get(), 1);
    assert_eq!(fx.host.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn mobile_announcement_moves_to_slower_cadence_once() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();
    let (a, mut rx) = transport("phone");
    let subscriber = registry.register(a.clone(), DeviceClass::Desktop).await;
    assert_eq!(subscriber.cadence_ms, 2_000);

    sleep_ms(2_100).await;
    assert_eq!(drain(&mut rx).len(), 1);

    assert!(registry.announce_device(&subscriber.id, DeviceClass::Mobile).await);
    assert!(!registry.announce_device(&subscriber.id, DeviceClass::Mobile).await);

    sleep_ms(4_900).await;
    assert!(drain(&mut rx).is_empty());

    sleep_ms(200).await;
    assert_eq!(drain(&mut rx).len(), 1);

    let subscribers = registry.subscribers().await;
    assert_eq!(subscribers[0].cadence_ms, 5_000);
    assert_eq!(subscribers[0].device_class, DeviceClass::Mobile);
    assert!(subscribers[0].last_delivery_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn desktop_announcement_changes_nothing() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();
    let (a, _rx) = transport("laptop");
    let subscriber = registry.register(a, DeviceClass::Desktop).await;

    assert!(!registry.announce_device(&subscriber.id, DeviceClass::Desktop).await);
    assert_eq!(registry.subscribers().await[0].cadence_ms, 2_000);
}

#[tokio::test(start_paused = true)]
async fn sweep_prunes_silently_dropped_transport_and_stops_monitoring() {
    let fx = fixture(true, true);
    let registry = fx.service.registry();
    let (a, rx) = transport("ghost");
    registry.register(a, DeviceClass::Desktop).await;
    sleep_ms(2_100).await;

    drop(rx);
    assert_eq!(registry.sweep().await, 1);
    assert_eq!(registry.count().get(), 0);
    assert_eq!(fx.host.kills(), 1);
    assert!(!fx.service.cache().is_polling());
    assert!(fx.scratch_files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_sweeper_reconciles_within_one_period() {
    let fx = fixture(true, true);
    let sweeper = fx.service.spawn_sweeper();
    let (a, rx) = transport("ghost");
    fx.service.registry().register(a, DeviceClass::Desktop).await;

    drop(rx);
    sleep_ms(30_100).await;

    assert_eq!(fx.service.registry().count().get(), 0);
    assert!(!fx.service.process().is_running().await);
    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn missing_utility_degrades_to_not_available() {
    let fx = fixture(false, false);
    let registry = fx.service.registry();

    let (a, mut rx) = transport("a");
    registry.register(a, DeviceClass::Desktop).await;
    assert_eq!(fx.host.launches(), 0);

    let state = fx.service.process().state().await;
    assert_eq!(state.retry_count, 1);
    assert!(state.last_error.unwrap().contains("not found"));

    match fx.service.process().start().await {
        LaunchOutcome::Failed { reason } => assert!(reason.contains("OpenHardwareMonitor.exe")),
        other => panic!("expected failure, got {:?}", other),
    }

    sleep_ms(4_100).await;
    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 2);
    for message in messages {
        assert_eq!(message["cpuTemp"], "N/A");
        assert!(message["memInfo"]["total"].is_number());
    }
}

#[tokio::test(start_paused = true)]
async fn client_requests_are_answered_outside_the_timer() {
    let fx = fixture(true, true);
    let (a, mut rx) = transport("a");
    let id = fx
        .service
        .registry()
        .register(a.clone(), DeviceClass::Desktop)
        .await
        .id;

    sleep_ms(1_000).await;
    let polls_before = fx.source.calls.load(Ordering::SeqCst);
    assert!(polls_before > 0);

    handle_client_text(&fx.service, &id, a.as_ref(), r#"{"type":"requestData"}"#).await;
    handle_client_text(&fx.service, &id, a.as_ref(), r#"{"type":"ping"}"#).await;
    handle_client_text(&fx.service, &id, a.as_ref(), "not json").await;

    let immediate = drain(&mut rx);
    assert_eq!(immediate.len(), 2);
    assert_eq!(immediate[0]["type"], "systemData");
    assert_eq!(immediate[0]["cpuTemp"], "50.0");
    assert_eq!(immediate[1]["type"], "pong");
    assert!(immediate[1]["timestamp"].is_number());
    assert_eq!(fx.source.calls.load(Ordering::SeqCst), polls_before);

    // The regular push still lands one cadence after registration.
    sleep_ms(1_100).await;
    let scheduled = drain(&mut rx);
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0]["type"], "systemData");
}

#[tokio::test(start_paused = true)]
async fn manual_stop_still_reports_os_memory() {
    let fx = fixture(true, true);
    let (a, mut rx) = transport("a");
    fx.service.registry().register(a.clone(), DeviceClass::Desktop).await;

    fx.service.registry().stop_monitoring().await;
    assert!(fx.service.cache().latest().memory.is_none());

    assert!(fx.service.scheduler().send_now(a.as_ref()).await);
    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["cpuTemp"], "N/A");
    assert!(messages[0]["memInfo"]["used"].is_number());
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let fx = fixture(true, true);
    let process = fx.service.process();

    assert_eq!(process.start().await, LaunchOutcome::Launched { elevated: true });
    assert_eq!(process.start().await, LaunchOutcome::AlreadyRunning);
    assert!(process.start().await.succeeded());
    assert_eq!(fx.host.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_audience_means_no_sensor_reads() {
    let fx = fixture(true, true);
    sleep_ms(10_000).await;

    assert_eq!(fx.source.calls.load(Ordering::SeqCst), 0);
    assert!(fx.service.cache().latest().is_unavailable());
    assert_eq!(fx.host.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_transport() {
    let fx = fixture(true, true);
    let (a, _rx) = transport("a");
    fx.service.registry().register(a.clone(), DeviceClass::Desktop).await;

    fx.service.shutdown().await;

    assert!(!a.is_open());
    assert!(fx.service.registry().is_empty().await);
    assert!(!fx.service.process().is_running().await);
}

fn app(fx: &Fixture) -> axum::Router {
    create_app(AppState {
        service: fx.service.clone(),
        config: WebConfig::default(),
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn monitoring_data_serves_live_cache() {
    let fx = fixture(true, true);
    let (a, _rx) = transport("a");
    fx.service.registry().register(a, DeviceClass::Desktop).await;
    fx.service.cache().poll_once().await;

    let response = app(&fx).oneshot(get("/api/monitoring-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );

    let body = json_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["cpuTemp"], "50.0");
    assert_eq!(body["memInfo"]["used"], 10.0);
    let history = body["cpuHistory"].as_array().unwrap();
    assert_eq!(history.len(), 60);
    assert_eq!(history[59], 50.0);
    assert_eq!(body["ramHistory"].as_array().unwrap().len(), 60);
}

#[tokio::test]
async fn monitoring_data_falls_back_to_scratch_files() {
    let fx = fixture(true, true);
    std::fs::write(fx.scratch_dir().join("ohm_temp_data.txt"), "44.5").unwrap();
    std::fs::write(fx.scratch_dir().join("ohm_mem_data.txt"), "16.00,6.00,10.00").unwrap();

    let response = app(&fx).oneshot(get("/api/monitoring-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "cached");
    assert_eq!(body["cpuTemp"], "44.5");
    assert_eq!(body["memInfo"]["total"], 16.0);
    assert_eq!(fx.source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn monitoring_data_without_anything_is_still_valid() {
    let fx = fixture(false, false);

    let response = app(&fx).oneshot(get("/api/monitoring-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "fallback");
    assert_eq!(body["cpuTemp"], "N/A");
    assert!(body["memInfo"]["total"].is_number());
    assert_eq!(body["cpuHistory"], Value::Array(vec![0.0.into(); 60]));
}

#[tokio::test]
async fn monitor_control_starts_stops_and_rejects_unknown_actions() {
    let fx = fixture(true, true);
    let (a, mut rx) = transport("a");
    fx.service.registry().register(a, DeviceClass::Desktop).await;
    assert_eq!(fx.host.launches(), 1);

    let response = app(&fx)
        .oneshot(post_json("/api/system/monitor", r#"{"action":"stop"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fx.host.kills(), 1);
    let events: Vec<Value> = drain(&mut rx)
        .into_iter()
        .filter(|m| m["type"] == "systemBroadcast")
        .collect();
    assert_eq!(events[0]["event"], "monitorStopped");

    let response = app(&fx)
        .oneshot(post_json("/api/system/monitor", r#"{"action":"start"}"#))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["status"], "success");
    assert_eq!(fx.host.launches(), 2);

    let response = app(&fx)
        .oneshot(post_json("/api/system/monitor", r#"{"action":"reboot"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["status"], "error");
}

#[tokio::test]
async fn ping_and_system_info_answer() {
    let fx = fixture(true, true);

    let response = app(&fx).oneshot(get("/ping")).await.unwrap();
    assert_eq!(json_body(response).await["status"], "success");

    let response = app(&fx).oneshot(get("/api/system/info")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["temperature"], "N/A");
    assert!(body["method"].is_string());
}
