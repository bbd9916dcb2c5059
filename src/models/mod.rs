//! Data models for the API edge.
//!
//! This module contains the persisted entities, the configs derived from
//! them, and the response envelope shared by every handler.

mod application;
mod response;
mod setting;
mod user;

pub use application::*;
pub use response::*;
pub use setting::*;
pub use user::*;

use std::collections::BTreeMap;

/// Keys never exposed by the public read endpoints
pub const SECRET_KEYS: &[&str] = &["api_key", "smtp_user", "smtp_password"];

/// Rows grouped as `{ group_name: { key: value } }`
pub type GroupedValues = BTreeMap<String, BTreeMap<String, String>>;

/// Group flat `(group, key, value)` rows for public display, dropping secrets
pub fn public_view<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> GroupedValues {
    let mut grouped = GroupedValues::new();
    for (group, key, value) in rows {
        if SECRET_KEYS.contains(&key) {
            continue;
        }
        grouped
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
    grouped
}

/// Parse a stored boolean flag; accepts `1` and `true` in any case
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}
