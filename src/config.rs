use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use log::{error, info, warn};
use serde::Deserialize;

use crate::source::{Product, ProductId};

/// Process environment, optionally seeded from a `.env` file.
#[derive(Debug, Deserialize)]
pub struct Env {
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
}

fn default_config_path() -> PathBuf {
    "config.json".into()
}

fn default_history_path() -> PathBuf {
    "precios_vistos.json".into()
}

fn default_log_path() -> PathBuf {
    "steam_tracker.log".into()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Env {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut env = envy::from_env::<Env>().wrap_err("failed to load environment")?;
        env.discord_webhook_url = non_blank(env.discord_webhook_url);
        Ok(env)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub min_discount_percent: u8,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            min_discount_percent: 10,
        }
    }
}

/// What to watch and how, read from the JSON settings file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub apps: BTreeMap<ProductId, String>,
    pub region: String,
    pub language: String,
    pub check_interval_hours: f64,
    pub notifications: NotificationSettings,
    pub pacing_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            apps: BTreeMap::from([
                ("1085660".into(), "Destiny 2 (Base)".into()),
                ("1090150".into(), "Destiny 2: Forsaken Pack".into()),
            ]),
            region: "co".into(),
            language: "spanish".into(),
            check_interval_hours: 6.0,
            notifications: NotificationSettings::default(),
            pacing_delay_ms: 2000,
        }
    }
}

impl Settings {
    /// Reads the settings file, falling back to the defaults when it is
    /// missing or unreadable. User apps are layered over the default apps.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using default settings", path.display());
                return Self::default();
            }
            Err(e) => {
                error!("Failed to read {}: {e}", path.display());
                return Self::default();
            }
        };

        match Self::from_json(&raw) {
            Ok(settings) => {
                info!(
                    "Loaded settings from {}: {} apps",
                    path.display(),
                    settings.apps.len()
                );
                settings
            }
            Err(e) => {
                error!("Malformed settings in {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    /// `apps` is read on its own so a bad value elsewhere in the file
    /// never drops the user's products.
    fn from_json(raw: &str) -> Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_str(raw).wrap_err("invalid settings JSON")?;

        let user_apps = match value.as_object_mut().and_then(|o| o.remove("apps")) {
            Some(apps) => serde_json::from_value::<BTreeMap<ProductId, String>>(apps)
                .unwrap_or_else(|e| {
                    error!("Ignoring malformed apps in settings: {e}");
                    BTreeMap::new()
                }),
            None => BTreeMap::new(),
        };

        let mut settings: Settings = serde_json::from_value(value).unwrap_or_else(|e| {
            error!("Malformed settings, keeping defaults besides apps: {e}");
            Self::default()
        });
        settings.apps.extend(user_apps);
        Ok(settings)
    }

    pub fn threshold(&self) -> u8 {
        self.notifications.min_discount_percent
    }

    pub fn products(&self) -> Vec<Product> {
        self.apps
            .iter()
            .map(|(id, name)| Product::new(id.clone(), name.clone()))
            .collect()
    }
}
