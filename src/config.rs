use crate::alarm::weekday::AUTO_LOCALE;
use crate::alarm::{WeekdayMaps, build_weekday_maps};
use crate::error::{BridgeError, Result};
use crate::refresh::RefreshPolicy;
use chrono::TimeDelta;
use chrono_tz::Tz;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key, value));
        }
    }
    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub home_assistant: HomeAssistantConfig,
    pub mqtt: MqttConfig,
    pub alarm: AlarmConfig,
    pub refresh: RefreshConfig,
    pub storage_path: PathBuf,
    /// Prefix of every unique id and the discovery node id.
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    /// Websocket endpoint, e.g. `ws://homeassistant.local:8123/api/websocket`.
    pub url: String,
    /// Long-lived access token; the websocket source is disabled without one.
    pub token: Option<String>,
    pub event_type: String,
    pub refresh_event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub discovery_prefix: String,
    pub base_topic: String,
}

/// Options that drive alarm normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// IANA zone used for naive dates and weekday evaluation.
    pub time_zone: String,
    /// `auto` or a locale name from the weekday maps.
    pub weekday_locale: String,
    /// JSON object extending or overriding the weekday maps.
    pub weekday_custom_map: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Silence interval before a reading is stale; 0 disables the check.
    pub stale_after_secs: u64,
    pub grace_secs: u64,
    pub check_interval_secs: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            time_zone: "UTC".to_string(),
            weekday_locale: AUTO_LOCALE.to_string(),
            weekday_custom_map: String::new(),
        }
    }
}

impl AlarmConfig {
    /// Configured zone, falling back to UTC when the name is unknown.
    pub fn time_zone(&self) -> Tz {
        match self.time_zone.trim().parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!("Unknown time zone '{}', using UTC", self.time_zone);
                Tz::UTC
            }
        }
    }

    /// Reject custom maps with errors and locales that no map provides.
    pub fn validate(&self) -> Result<WeekdayMaps> {
        let (maps, errors) = build_weekday_maps(&self.weekday_custom_map);
        if !errors.is_empty() {
            return Err(BridgeError::InvalidCustomMap(errors));
        }
        if self.weekday_locale != AUTO_LOCALE && !maps.contains(&self.weekday_locale) {
            let known: Vec<&str> = maps.locale_names().collect();
            return Err(BridgeError::InvalidConfig(format!(
                "weekday locale '{}' is not one of auto, {}",
                self.weekday_locale,
                known.join(", ")
            )));
        }
        Ok(maps)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 26 * 3600,
            grace_secs: 120,
            check_interval_secs: 60,
        }
    }
}

/// Longest accepted refresh interval (ten years).
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 3600;

fn interval_from_secs(secs: u64) -> Option<TimeDelta> {
    if secs > MAX_INTERVAL_SECS {
        return None;
    }
    i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
}

impl RefreshConfig {
    /// Thresholds for the freshness check.
    ///
    /// Out of range values fall back to the defaults; [`Config::validate`]
    /// rejects them before startup.
    pub fn policy(&self) -> RefreshPolicy {
        let defaults = RefreshPolicy::default();
        let stale_after = match self.stale_after_secs {
            0 => None,
            secs => interval_from_secs(secs).or(defaults.stale_after),
        };
        RefreshPolicy {
            stale_after,
            grace: interval_from_secs(self.grace_secs).unwrap_or(defaults.grace),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("NEXTALARM_STALE_AFTER_SECS", self.stale_after_secs),
            ("NEXTALARM_REFRESH_GRACE_SECS", self.grace_secs),
            ("NEXTALARM_CHECK_INTERVAL_SECS", self.check_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs > MAX_INTERVAL_SECS {
                return Err(BridgeError::InvalidConfig(format!(
                    "{name} must be at most {MAX_INTERVAL_SECS}, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

/// Default location of the persisted person state.
pub fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ios-nextalarm-bridge")
        .join("state.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home_assistant: HomeAssistantConfig {
                url: "ws://homeassistant.local:8123/api/websocket".to_string(),
                token: None,
                event_type: "ha_ios_nextalarm".to_string(),
                refresh_event_type: "ha_ios_nextalarm_refresh".to_string(),
            },
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "ios-nextalarm-bridge".to_string(),
                username: None,
                password: None,
                discovery_prefix: "homeassistant".to_string(),
                base_topic: "ios_nextalarm".to_string(),
            },
            alarm: AlarmConfig::default(),
            refresh: RefreshConfig::default(),
            storage_path: default_storage_path(),
            instance_id: "ios_nextalarm".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Home Assistant
        if let Some(url) = var("HA_URL") {
            config.home_assistant.url = websocket_url(&url);
        }
        if let Some(token) = var("HA_TOKEN")
            && !token.trim().is_empty()
        {
            config.home_assistant.token = Some(token.trim().to_string());
        }
        if let Some(event_type) = var("NEXTALARM_EVENT_TYPE") {
            config.home_assistant.event_type = event_type;
        }
        if let Some(event_type) = var("NEXTALARM_REFRESH_EVENT_TYPE") {
            config.home_assistant.refresh_event_type = event_type;
        }

        // MQTT configuration
        if let Some(host) = var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Some(client_id) = var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(username) = var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(prefix) = var("MQTT_DISCOVERY_PREFIX") {
            config.mqtt.discovery_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Some(base) = var("MQTT_BASE_TOPIC") {
            config.mqtt.base_topic = base.trim_end_matches('/').to_string();
        }

        // Alarm options
        if let Some(instance_id) = var("NEXTALARM_INSTANCE_ID") {
            config.instance_id = instance_id;
        }
        if let Some(tz) = var("NEXTALARM_TIME_ZONE").or_else(|| var("TZ")) {
            config.alarm.time_zone = tz;
        }
        if let Some(locale) = var("NEXTALARM_WEEKDAY_LOCALE") {
            config.alarm.weekday_locale = locale.trim().to_string();
        }
        if let Some(custom_map) = var("NEXTALARM_WEEKDAY_CUSTOM_MAP") {
            config.alarm.weekday_custom_map = custom_map;
        }

        // Refresh checks
        if let Some(secs) = var("NEXTALARM_STALE_AFTER_SECS")
            && let Ok(s) = secs.parse()
        {
            config.refresh.stale_after_secs = s;
        }
        if let Some(secs) = var("NEXTALARM_REFRESH_GRACE_SECS")
            && let Ok(s) = secs.parse()
        {
            config.refresh.grace_secs = s;
        }
        if let Some(secs) = var("NEXTALARM_CHECK_INTERVAL_SECS")
            && let Ok(s) = secs.parse()
        {
            config.refresh.check_interval_secs = s;
        }

        if let Some(path) = var("NEXTALARM_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "instance id must not be empty".to_string(),
            ));
        }
        if self.mqtt.base_topic.is_empty() || self.mqtt.discovery_prefix.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "MQTT base topic and discovery prefix must not be empty".to_string(),
            ));
        }
        self.refresh.validate()?;
        self.alarm.validate()?;
        Ok(())
    }
}

/// Accept an `http(s)://` base URL and point it at the websocket API.
fn websocket_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let url = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    };
    if url.ends_with("/api/websocket") {
        url
    } else {
        format!("{url}/api/websocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.home_assistant.event_type, "ha_ios_nextalarm");
        assert_eq!(config.home_assistant.token, None);
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(config.mqtt.base_topic, "ios_nextalarm");
        assert_eq!(config.alarm.weekday_locale, "auto");
        assert_eq!(config.refresh.policy(), RefreshPolicy::default());
        assert!(config.storage_path.ends_with("ios-nextalarm-bridge/state.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("HA_URL", "https://ha.example.org/"),
            ("HA_TOKEN", " abc "),
            ("MQTT_BROKER_PORT", "8883"),
            ("MQTT_BASE_TOPIC", "phones/"),
            ("NEXTALARM_TIME_ZONE", "Europe/Warsaw"),
            ("NEXTALARM_STALE_AFTER_SECS", "0"),
            ("NEXTALARM_REFRESH_GRACE_SECS", "not a number"),
        ]);
        assert_eq!(config.home_assistant.url, "wss://ha.example.org/api/websocket");
        assert_eq!(config.home_assistant.token.as_deref(), Some("abc"));
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.mqtt.base_topic, "phones");
        assert_eq!(config.alarm.time_zone(), chrono_tz::Europe::Warsaw);
        assert_eq!(config.refresh.policy().stale_after, None);
        assert_eq!(config.refresh.grace_secs, 120);
    }

    #[test]
    fn test_out_of_range_intervals() {
        let config = config_from(&[("NEXTALARM_STALE_AFTER_SECS", "10000000000000000")]);
        assert!(matches!(config.validate(), Err(BridgeError::InvalidConfig(_))));
        assert_eq!(config.refresh.policy(), RefreshPolicy::default());

        let refresh = RefreshConfig {
            stale_after_secs: u64::MAX,
            grace_secs: u64::MAX,
            check_interval_secs: u64::MAX,
        };
        assert!(refresh.validate().is_err());
        assert_eq!(refresh.policy(), RefreshPolicy::default());
        assert_eq!(
            refresh.check_interval(),
            Duration::from_secs(MAX_INTERVAL_SECS)
        );

        let refresh = RefreshConfig {
            stale_after_secs: MAX_INTERVAL_SECS,
            ..Default::default()
        };
        assert!(refresh.validate().is_ok());
        assert_eq!(
            refresh.policy().stale_after,
            Some(TimeDelta::seconds(MAX_INTERVAL_SECS as i64))
        );
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://10.0.0.2:8123"),
            "ws://10.0.0.2:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("ws://ha:8123/api/websocket"),
            "ws://ha:8123/api/websocket"
        );
    }

    #[test]
    fn test_unknown_time_zone_falls_back_to_utc() {
        let alarm = AlarmConfig {
            time_zone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert_eq!(alarm.time_zone(), Tz::UTC);
    }

    #[test]
    fn test_validate_rejects_invalid_custom_map() {
        let alarm = AlarmConfig {
            weekday_custom_map: "{\"de\": {\"montag\": 9}}".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            alarm.validate(),
            Err(BridgeError::InvalidCustomMap(errors)) if errors.len() == 1
        ));

        let alarm = AlarmConfig {
            weekday_custom_map: "{\"de\": {\"montag\": 0}}".to_string(),
            weekday_locale: "de".to_string(),
            ..Default::default()
        };
        assert!(alarm.validate().unwrap().contains("de"));

        let alarm = AlarmConfig {
            weekday_locale: "fr".to_string(),
            ..Default::default()
        };
        assert!(matches!(alarm.validate(), Err(BridgeError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_dotenv() {
        let pairs = parse_dotenv("# comment\nHA_TOKEN=\"abc def\"\n\nMQTT_BROKER_HOST = broker\n");
        assert_eq!(
            pairs,
            vec![("HA_TOKEN", "abc def"), ("MQTT_BROKER_HOST", "broker")]
        );
    }
}
