//! End-to-end runs of the monitoring loop with in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ratsensor_agent::broker::mock::MockConnector;
use ratsensor_agent::broker::{
    BrokerConnection, CommandHandler, ConnectionSettings, ConnectionState,
};
use ratsensor_agent::config::MqttConfig;
use ratsensor_agent::monitor::MonitorParts;
use ratsensor_agent::{AdminCommands, Agent, AgentDeps, Config, Monitor, MonitorSettings};
use ratsensor_core::mock::{MockBuffer, MockExecutor, MockMetrics, MockSensor, StaticIdentity};
use ratsensor_core::{SensorKind, SensorSource};
use ratsensor_types::SensorValues;

struct Rig {
    sensor: Arc<dyn SensorSource>,
    buffer: Arc<MockBuffer>,
    connector: Arc<MockConnector>,
    connection: Arc<BrokerConnection>,
}

impl Rig {
    fn new(connector: MockConnector) -> Self {
        Self::with_sensor(connector, Arc::new(MockSensor::default()))
    }

    fn with_sensor(connector: MockConnector, sensor: Arc<dyn SensorSource>) -> Self {
        let connector = Arc::new(connector);
        let mqtt = MqttConfig {
            listen_for_admin: true,
            admin_topic: Some("admin/{device_id}".to_string()),
            initial_retry_delay: 1,
            retry_backoff_factor: 2.0,
            retry_jitter: 0,
            ..Default::default()
        };
        let settings = ConnectionSettings::from_config(&mqtt, "dev-1").unwrap();
        Self {
            sensor,
            buffer: Arc::new(MockBuffer::new()),
            connection: Arc::new(BrokerConnection::new(connector.clone(), settings)),
            connector,
        }
    }

    fn monitor(&self, batch: usize, admin: Option<Arc<dyn CommandHandler>>) -> Monitor {
        let settings = MonitorSettings {
            interval: Duration::from_secs(1),
            save_batch_size: batch,
            error_cooldown: Duration::from_secs(10),
        };
        Monitor::new(
            "dev-1",
            settings,
            MonitorParts {
                sensor: self.sensor.clone(),
                metrics: Arc::new(MockMetrics::default()),
                buffer: self.buffer.clone(),
                connection: self.connection.clone(),
                admin,
            },
        )
        .unwrap()
    }
}

async fn cancel_after(cancel: CancellationToken, after: Duration) {
    tokio::time::sleep(after).await;
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn happy_path_saves_and_publishes_every_cycle() {
    let rig = Rig::new(MockConnector::new());
    let mut monitor = rig.monitor(2, None);
    let cancel = CancellationToken::new();

    // Cycles at t=0 and t=1.
    tokio::join!(
        monitor.run(cancel.clone()),
        cancel_after(cancel.clone(), Duration::from_millis(1_500))
    );

    assert_eq!(monitor.cycles(), 2);
    assert_eq!(rig.connector.connect_calls(), 1);

    let batches = rig.buffer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(rig.buffer.save_calls(), 1);

    let sensor = rig.connector.published_to("sensor/dev-1");
    let info = rig.connector.published_to("info/dev-1");
    assert_eq!(sensor.len(), 2);
    assert_eq!(info.len(), 2);

    let reading: serde_json::Value = serde_json::from_slice(&sensor[0].payload).unwrap();
    assert_eq!(reading["device_id"], "dev-1");
    assert_eq!(reading["temperature"], 22.5);
    let snapshot: serde_json::Value = serde_json::from_slice(&info[0].payload).unwrap();
    assert_eq!(snapshot["timestamp"], reading["timestamp"]);

    let status = rig.connector.published_to("status/dev-1");
    assert_eq!(status.len(), 1);
    assert!(status[0].payload_str().contains("shutdown"));
    assert_eq!(rig.connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn unreachable_broker_buffers_and_flushes_at_shutdown() {
    let rig = Rig::new(MockConnector::unreachable());
    let mut monitor = rig.monitor(5, None);
    monitor.start().await;

    for _ in 0..3 {
        let report = monitor.run_cycle().await;
        assert!(!report.published);
        assert_eq!(rig.connection.state(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(1_600)).await;
    }

    // Attempts at t=0, t=1 and t=3.
    assert_eq!(rig.connector.connect_calls(), 3);
    assert_eq!(
        rig.connection.retry_state().current_delay,
        Duration::from_secs(4)
    );
    assert!(rig.connector.published().is_empty());
    assert_eq!(rig.buffer.save_calls(), 0);
    assert_eq!(monitor.pending().len(), 3);

    monitor.shutdown().await;
    monitor.shutdown().await;

    let batches = rig.buffer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(rig.buffer.save_calls(), 1);
    assert!(rig.connector.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn broker_recovery_resumes_publishing() {
    let rig = Rig::new(MockConnector::unreachable());
    let mut monitor = rig.monitor(10, None);
    monitor.start().await;

    assert!(!monitor.run_cycle().await.published);
    rig.connector.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(monitor.run_cycle().await.published);

    // Only readings taken while connected go out; nothing is replayed.
    assert_eq!(rig.connector.published_to("sensor/dev-1").len(), 1);
    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn save_failures_retain_readings_until_shutdown() {
    let rig = Rig::new(MockConnector::unreachable());
    rig.buffer.set_should_fail(true);
    let mut monitor = rig.monitor(2, None);
    monitor.start().await;

    for _ in 0..3 {
        monitor.run_cycle().await;
    }
    assert_eq!(rig.buffer.save_calls(), 2);
    assert_eq!(monitor.pending().len(), 3);

    rig.buffer.set_should_fail(false);
    monitor.shutdown().await;
    assert_eq!(rig.buffer.batches()[0].len(), 3);
    assert!(monitor.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn buffer_init_failure_is_not_fatal() {
    let rig = Rig::new(MockConnector::new());
    rig.buffer.set_fail_init(true);
    let mut monitor = rig.monitor(1, None);
    monitor.start().await;

    let report = monitor.run_cycle().await;
    assert!(report.published);
    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn admin_reboot_over_the_broker() {
    let rig = Rig::new(MockConnector::new());
    let executor = Arc::new(MockExecutor::new());
    let admin = AdminCommands::new(&rig.connection, executor.clone()).with_settle(Duration::ZERO);
    let mut monitor = rig.monitor(5, Some(Arc::new(admin)));
    monitor.start().await;
    assert_eq!(rig.connector.subscriptions(), vec!["admin/dev-1".to_string()]);

    rig.connector.inject_message("admin/dev-1", b"foo").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.reboot_count(), 0);
    assert!(rig.connection.is_connected());

    rig.connector.inject_message("admin/dev-1", b"REBOOT").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.reboot_count(), 1);
    assert!(!rig.connection.is_connected());
    assert!(rig.connector.subscriptions().is_empty());
    assert_eq!(rig.connector.clean_disconnects(), 1);

    monitor.shutdown().await;
}

/// Panics on its first read, then behaves.
#[derive(Default)]
struct FlakySensor {
    reads: AtomicU32,
}

#[async_trait]
impl SensorSource for FlakySensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Simulated
    }

    async fn initialize(&self) -> ratsensor_core::Result<()> {
        Ok(())
    }

    async fn read_sensors(&self) -> SensorValues {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("sensor bus wedged");
        }
        SensorValues::default()
    }

    async fn cleanup(&self) {}
}

#[tokio::test(start_paused = true)]
async fn panicking_cycle_cools_down_and_continues() {
    let sensor = Arc::new(FlakySensor::default());
    let rig = Rig::with_sensor(MockConnector::new(), sensor.clone());
    let mut monitor = rig.monitor(5, None);
    let cancel = CancellationToken::new();

    // Panic at t=0, cooldown until t=10, then cycles at t=10 and t=11.
    tokio::join!(
        monitor.run(cancel.clone()),
        cancel_after(cancel.clone(), Duration::from_millis(11_500))
    );

    assert_eq!(sensor.reads.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.cycles(), 2);
    assert_eq!(rig.buffer.batches()[0].len(), 2);
}

/// Takes longer than the loop interval to read.
struct SlowSensor {
    reads: AtomicU32,
}

#[async_trait]
impl SensorSource for SlowSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Simulated
    }

    async fn initialize(&self) -> ratsensor_core::Result<()> {
        Ok(())
    }

    async fn read_sensors(&self) -> SensorValues {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        SensorValues::default()
    }

    async fn cleanup(&self) {}
}

#[tokio::test(start_paused = true)]
async fn overrunning_cycles_run_back_to_back() {
    let sensor = Arc::new(SlowSensor {
        reads: AtomicU32::new(0),
    });
    let rig = Rig::with_sensor(MockConnector::new(), sensor.clone());
    let mut monitor = rig.monitor(5, None);
    let cancel = CancellationToken::new();

    // Cycles start at t=0, t=1.5 and t=3.0; the third completes after cancel.
    tokio::join!(
        monitor.run(cancel.clone()),
        cancel_after(cancel.clone(), Duration::from_millis(3_200))
    );

    assert_eq!(sensor.reads.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.cycles(), 3);
    assert_eq!(rig.buffer.batches()[0].len(), 3);
}

#[tokio::test(start_paused = true)]
async fn agent_runs_in_simulation_mode() {
    let connector = Arc::new(MockConnector::new());
    let buffer = Arc::new(MockBuffer::new());
    let deps = AgentDeps {
        identity: Arc::new(StaticIdentity("rpi-0042".to_string())),
        connector: connector.clone(),
        buffer: buffer.clone(),
        executor: Arc::new(MockExecutor::new()),
    };

    let mut config = Config::default();
    config.sensor.simulation = true;
    config.monitor.read_interval = 1;
    config.monitor.save_batch_size = 2;

    let mut agent = Agent::build(config, deps).unwrap();
    let cancel = CancellationToken::new();
    tokio::join!(
        agent.run(cancel.clone()),
        cancel_after(cancel.clone(), Duration::from_millis(2_500))
    );

    assert_eq!(agent.monitor().cycles(), 3);
    assert_eq!(connector.published_to("sensor/rpi-0042").len(), 3);
    assert_eq!(connector.published_to("info/rpi-0042").len(), 3);

    // One threshold save of two, then the shutdown flush of the third.
    let batches = buffer.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);
}
