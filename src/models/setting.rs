//! Site settings and the derived web client configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_flag;

/// Scope used when none is resolved
pub const DEFAULT_SCOPE: &str = "default";

/// A single `(scope, key)` setting row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub id: Uuid,
    pub scope: String,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin payload for writing a setting
#[derive(Debug, Clone, Deserialize)]
pub struct SettingInput {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_group")]
    pub group_name: String,
}

fn default_group() -> String {
    "general".to_string()
}

/// Web client configuration materialized from all settings of one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub api_key: String,
    pub theme: String,
    pub enable_documentation: bool,
    pub maintenance_mode: bool,
    pub maintenance_message: String,
    pub source_logo_favicon: String,
    pub histats_tracking_code: String,
    pub google_analytics_code: String,
    pub play_store_app_url: String,
    pub app_store_app_url: String,
}

impl WebConfig {
    /// Map flat key/value rows onto the config fields; unknown keys are ignored
    pub fn from_settings(settings: &[Setting]) -> Self {
        let mut config = Self::default();

        for setting in settings {
            let value = setting.value.trim();
            match setting.key.as_str() {
                "api_key" => config.api_key = value.to_string(),
                "theme" => config.theme = value.to_string(),
                "enable_documentation" => config.enable_documentation = parse_flag(value),
                "maintenance_mode" => config.maintenance_mode = parse_flag(value),
                "maintenance_message" => config.maintenance_message = value.to_string(),
                "source_logo_favicon" => config.source_logo_favicon = value.to_string(),
                "histats_tracking_code" => config.histats_tracking_code = value.to_string(),
                "google_analytics_code" => config.google_analytics_code = value.to_string(),
                "play_store_app_url" => config.play_store_app_url = value.to_string(),
                "app_store_app_url" => config.app_store_app_url = value.to_string(),
                _ => {}
            }
        }

        config
    }

    /// Message returned while the site is in maintenance
    pub fn maintenance_text(&self) -> &str {
        if self.maintenance_message.trim().is_empty() {
            "Maintenance"
        } else {
            &self.maintenance_message
        }
    }
}
