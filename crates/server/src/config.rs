use std::{fs, path::Path, time::Duration};

use clap::ValueEnum;
use serde::Deserialize;
use shadow_sync::DriverConfig;
use tracing::warn;

/// Which remote broker the shadow driver talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// No shadow sync; events arrive over HTTP and the subscriber only.
    #[default]
    None,
    /// In-process broker, handy for local runs.
    Loopback,
}

impl BrokerMode {
    fn parse(raw: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub http_bind: String,
    pub client_id: String,
    pub subscribe_url: Option<String>,
    pub broker: BrokerMode,
    pub refresh_interval_secs: u64,
    pub initial_refresh_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub shadow_get_timeout_secs: u64,
    pub shadow_update_timeout_secs: u64,
    pub display_columns: usize,
    pub display_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_bind: "127.0.0.1:8088".into(),
            client_id: "display".into(),
            subscribe_url: None,
            broker: BrokerMode::None,
            refresh_interval_secs: 60,
            initial_refresh_delay_secs: 1,
            connect_timeout_secs: 10,
            operation_timeout_secs: 5,
            shadow_get_timeout_secs: 15,
            shadow_update_timeout_secs: 10,
            display_columns: 40,
            display_rows: 8,
        }
    }
}

impl Settings {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            initial_refresh_delay: Duration::from_secs(self.initial_refresh_delay_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            shadow_get_timeout: Duration::from_secs(self.shadow_get_timeout_secs),
            shadow_update_timeout: Duration::from_secs(self.shadow_update_timeout_secs),
            ..DriverConfig::new(self.client_id.clone())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    http_bind: Option<String>,
    client_id: Option<String>,
    subscribe_url: Option<String>,
    broker: Option<BrokerMode>,
    refresh_interval_secs: Option<u64>,
    initial_refresh_delay_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    operation_timeout_secs: Option<u64>,
    shadow_get_timeout_secs: Option<u64>,
    shadow_update_timeout_secs: Option<u64>,
    display_columns: Option<usize>,
    display_rows: Option<usize>,
}

/// Defaults, then `path` if it exists, then `DISPLAY_*` / `APP__*` environment variables.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(error) => {
            warn!(%error, "ignoring unreadable settings file");
            return;
        }
    };

    if let Some(v) = file_cfg.http_bind {
        settings.http_bind = v;
    }
    if let Some(v) = file_cfg.client_id {
        settings.client_id = v;
    }
    if let Some(v) = file_cfg.subscribe_url {
        settings.subscribe_url = Some(v);
    }
    if let Some(v) = file_cfg.broker {
        settings.broker = v;
    }
    if let Some(v) = file_cfg.refresh_interval_secs {
        settings.refresh_interval_secs = v;
    }
    if let Some(v) = file_cfg.initial_refresh_delay_secs {
        settings.initial_refresh_delay_secs = v;
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
    if let Some(v) = file_cfg.operation_timeout_secs {
        settings.operation_timeout_secs = v;
    }
    if let Some(v) = file_cfg.shadow_get_timeout_secs {
        settings.shadow_get_timeout_secs = v;
    }
    if let Some(v) = file_cfg.shadow_update_timeout_secs {
        settings.shadow_update_timeout_secs = v;
    }
    if let Some(v) = file_cfg.display_columns {
        settings.display_columns = v;
    }
    if let Some(v) = file_cfg.display_rows {
        settings.display_rows = v;
    }
}

/// `APP__` variables win over their `DISPLAY_` twins.
pub(crate) fn apply_env<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| {
        let twin = match name.strip_prefix("DISPLAY_") {
            Some(_) => name.to_string(),
            None => format!("DISPLAY_{name}"),
        };
        lookup(&format!("APP__{name}")).or_else(|| lookup(&twin))
    };

    if let Some(v) = var("HTTP_BIND") {
        settings.http_bind = v;
    }
    if let Some(v) = var("CLIENT_ID") {
        settings.client_id = v;
    }
    if let Some(v) = var("SUBSCRIBE_URL") {
        settings.subscribe_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    if let Some(v) = var("BROKER") {
        match BrokerMode::parse(&v) {
            Some(mode) => settings.broker = mode,
            None => warn!(value = %v, "unknown broker mode"),
        }
    }

    let number = |name: &str, target: &mut u64| {
        if let Some(v) = var(name) {
            match v.trim().parse::<u64>() {
                Ok(parsed) => *target = parsed,
                Err(_) => warn!(variable = name, value = %v, "expected a number of seconds"),
            }
        }
    };
    number("REFRESH_INTERVAL_SECS", &mut settings.refresh_interval_secs);
    number(
        "INITIAL_REFRESH_DELAY_SECS",
        &mut settings.initial_refresh_delay_secs,
    );
    number("CONNECT_TIMEOUT_SECS", &mut settings.connect_timeout_secs);
    number("OPERATION_TIMEOUT_SECS", &mut settings.operation_timeout_secs);
    number("SHADOW_GET_TIMEOUT_SECS", &mut settings.shadow_get_timeout_secs);
    number(
        "SHADOW_UPDATE_TIMEOUT_SECS",
        &mut settings.shadow_update_timeout_secs,
    );

    if let Some(v) = var("DISPLAY_COLUMNS") {
        if let Ok(parsed) = v.trim().parse::<usize>() {
            settings.display_columns = parsed;
        }
    }
    if let Some(v) = var("DISPLAY_ROWS") {
        if let Ok(parsed) = v.trim().parse::<usize>() {
            settings.display_rows = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
