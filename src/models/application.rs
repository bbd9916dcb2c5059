//! Mobile application records and the derived app configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_flag;

/// A single `(package_name, key)` application row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    pub id: Uuid,
    pub package_name: String,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin payload for registering application rows
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationInput {
    pub package_name: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_group")]
    pub group_name: String,
}

/// Admin payload for updating rows of a known package
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationValue {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_group")]
    pub group_name: String,
}

impl ApplicationValue {
    pub fn into_input(self, package_name: &str) -> ApplicationInput {
        ApplicationInput {
            package_name: package_name.to_string(),
            key: self.key,
            value: self.value,
            description: self.description,
            group_name: self.group_name,
        }
    }
}

fn default_group() -> String {
    "application".to_string()
}

/// Mobile client configuration materialized from all rows of one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub api_key: String,
    pub package_name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub app_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    pub is_active: bool,
}

impl AppConfig {
    /// Map flat key/value rows onto the config fields
    ///
    /// `package_name` is always the owning package; a row keyed
    /// `package_name` is ignored.
    pub fn from_rows(package_name: &str, rows: &[Application]) -> Self {
        let mut config = Self {
            package_name: package_name.to_string(),
            ..Self::default()
        };

        for row in rows {
            let value = row.value.trim();
            match row.key.as_str() {
                "name" => config.name = value.to_string(),
                "api_key" => config.api_key = value.to_string(),
                "version" => config.version = value.to_string(),
                "type" => config.app_type = value.to_string(),
                "store_url" if !value.is_empty() => config.store_url = Some(value.to_string()),
                "is_active" => config.is_active = parse_flag(value),
                _ => {}
            }
        }

        config
    }
}
