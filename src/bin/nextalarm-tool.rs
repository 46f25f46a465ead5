//! Operator tool for the iOS NextAlarm bridge.
//!
//! Usage:
//!   cargo run --bin nextalarm-tool -- preview --file event.json
//!   cargo run --bin nextalarm-tool -- send --file event.json
//!   cargo run --bin nextalarm-tool -- refresh --person andrzej --phase start
//!
//! `preview` runs a payload through the parser and scheduler offline and
//! prints what the entities would show. `send` and `refresh` publish to the
//! bridge's inbound MQTT topics, standing in for the Shortcut.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ios_nextalarm_bridge::config::{Config, load_dotenv};
use ios_nextalarm_bridge::coordinator::{Coordinator, InboundEvent};
use ios_nextalarm_bridge::refresh::RefreshPhase;
use ios_nextalarm_bridge::sensors::discovery::TopicScheme;
use ios_nextalarm_bridge::sensors::{EntityContext, EntityKind};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use strum::IntoEnumIterator;

#[derive(Parser)]
#[command(name = "nextalarm-tool")]
#[command(about = "Preview and send iOS NextAlarm payloads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a payload and print the resulting entity states
    Preview {
        /// JSON file with `person` and `alarms`
        #[arg(long)]
        file: PathBuf,

        /// Override the configured time zone
        #[arg(long)]
        tz: Option<String>,

        /// Evaluate at this instant (RFC 3339) instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Publish a payload to the bridge's event topic
    Send {
        /// JSON file with `person` and `alarms`
        #[arg(long)]
        file: PathBuf,
    },
    /// Publish a refresh marker for a person
    Refresh {
        #[arg(long)]
        person: String,

        /// `start` or `end`
        #[arg(long, default_value = "start")]
        phase: RefreshPhase,
    },
}

fn read_payload(file: &PathBuf) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(file)?;
    let payload: Value = serde_json::from_str(&raw)?;
    if !payload.is_object() {
        return Err(format!("{} does not contain a JSON object", file.display()).into());
    }
    Ok(payload)
}

fn preview(
    config: Config,
    payload: Value,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = Coordinator::new(config.alarm.clone(), config.refresh.policy());
    let event = InboundEvent {
        event_type: config.home_assistant.event_type.clone(),
        origin: "LOCAL".to_string(),
        time_fired: now,
        context: Value::Null,
        data: payload,
    };
    let processed = coordinator.process_event(&event, now)?;
    let Some(person) = coordinator.get_person_state(&processed.slug) else {
        return Err("person state missing after processing".into());
    };

    let ctx = EntityContext {
        tz: coordinator.time_zone(),
        now,
        stale_after: coordinator.policy().stale_after,
    };
    let scheme = TopicScheme::new(
        config.mqtt.discovery_prefix.clone(),
        config.mqtt.base_topic.clone(),
        config.instance_id.clone(),
    );
    println!("Person: {} ({})", person.person, person.slug);
    for kind in EntityKind::iter() {
        let rendered = kind.render(person, &ctx);
        println!();
        println!("{} [{}]", kind.name(), scheme.object_id(&person.slug, kind));
        println!("  state: {}", rendered.state);
        println!(
            "  attributes: {}",
            serde_json::to_string_pretty(&rendered.attributes)?
        );
    }
    Ok(())
}

async fn publish(
    config: &Config,
    topic: String,
    payload: Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = MqttOptions::new(
        format!("{}-tool", config.mqtt.client_id),
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (&config.mqtt.username, &config.mqtt.password) {
        options.set_credentials(username, password);
    }

    let (client, mut event_loop) = AsyncClient::new(options, 10);
    let body = serde_json::to_string(&payload)?;
    println!("Publishing to {}: {}", topic, body);
    client
        .publish(topic, QoS::AtLeastOnce, false, body.into_bytes())
        .await?;

    let acked = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match acked {
        Ok(Ok(())) => {
            println!("Delivered");
            let _ = client.disconnect().await;
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err("timeout waiting for broker acknowledgement".into()),
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, std::io::Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    // Before the runtime exists, load_dotenv writes the process environment
    load_dotenv();
    let config = Config::from_env();
    config.validate()?;
    let scheme = TopicScheme::new(
        config.mqtt.discovery_prefix.clone(),
        config.mqtt.base_topic.clone(),
        config.instance_id.clone(),
    );

    match cli.command {
        Commands::Preview { file, tz, now } => {
            let mut config = config;
            if let Some(tz) = tz {
                config.alarm.time_zone = tz;
            }
            let payload = read_payload(&file)?;
            preview(config, payload, now.unwrap_or_else(Utc::now))?;
        }
        Commands::Send { file } => {
            let payload = read_payload(&file)?;
            block_on(publish(&config, scheme.event_topic(), payload))??;
        }
        Commands::Refresh { person, phase } => {
            let payload = json!({"person": person, "phase": phase.to_string()});
            block_on(publish(&config, scheme.refresh_topic(), payload))??;
        }
    }

    Ok(())
}
