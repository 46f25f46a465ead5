use ios_nextalarm_bridge::bridge::Bridge;
use ios_nextalarm_bridge::config::{Config, load_dotenv};
use ios_nextalarm_bridge::coordinator::Coordinator;
use ios_nextalarm_bridge::input::hass::spawn_hass_source;
use ios_nextalarm_bridge::input::mqtt::{MqttIntegration, TopicRouter};
use ios_nextalarm_bridge::instance_lock::{InstanceLock, InstanceLockError};
use ios_nextalarm_bridge::sensors::{
    EntityPublisher, MqttStatePublisher, PersonNotifier, TopicScheme,
};
use ios_nextalarm_bridge::storage::StateStore;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Load .env before the runtime starts any threads
    load_dotenv();
    init_logger();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run());
}

async fn run() {
    info!("Starting iOS NextAlarm bridge");

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded:");
    info!("  Home Assistant: {}", config.home_assistant.url);
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Base topic: {}", config.mqtt.base_topic);
    info!("  Time zone: {}", config.alarm.time_zone);
    info!("  Weekday locale: {}", config.alarm.weekday_locale);
    info!("  State file: {:?}", config.storage_path);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(InstanceLockError::AlreadyRunning) => {
            error!("Another instance of the bridge is already running");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let scheme = TopicScheme::new(
        config.mqtt.discovery_prefix.clone(),
        config.mqtt.base_topic.clone(),
        config.instance_id.clone(),
    );
    let policy = config.refresh.policy();
    let tz = config.alarm.time_zone();

    let coordinator = Coordinator::new(config.alarm.clone(), policy);
    let store = Arc::new(StateStore::new(config.storage_path.clone()));
    let notifier = PersonNotifier::default();
    let (bridge, handle) = Bridge::new(coordinator, store, notifier.clone());

    // MQTT session: inbound topics plus the client entities are published on
    let router = TopicRouter::new(
        scheme.clone(),
        config.home_assistant.event_type.clone(),
        config.home_assistant.refresh_event_type.clone(),
    );
    // The MQTT session outlives the bridge so its offline status is flushed
    let mqtt_cancel = CancellationToken::new();
    let (client, mqtt_task) = MqttIntegration::new(config.mqtt.clone(), scheme.clone(), router)
        .start(handle.clone(), mqtt_cancel.clone());

    let publisher = Arc::new(EntityPublisher::new(
        scheme,
        tz,
        policy.stale_after,
        Arc::new(MqttStatePublisher::new(client)),
    ));
    let publisher_task = publisher
        .clone()
        .run(notifier.subscribe(), cancel.clone());

    let bridge = bridge
        .with_publisher(publisher)
        .with_freshness_check(config.refresh.check_interval());
    let bridge_task = tokio::spawn(bridge.run(cancel.clone()));

    let hass_task = spawn_hass_source(config.home_assistant.clone(), handle, cancel.clone());

    info!("iOS NextAlarm bridge is running");
    info!("  - Press Ctrl+C to exit");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Shutdown
    cancel.cancel();
    if let Err(e) = bridge_task.await {
        error!("Bridge task failed: {}", e);
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), publisher_task).await;
    if let Some(hass_task) = hass_task {
        hass_task.abort();
    }
    mqtt_cancel.cancel();
    if let Err(e) = mqtt_task.await {
        error!("MQTT task failed: {}", e);
    }

    info!("iOS NextAlarm bridge stopped");
}
