use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::{info, warn};

use barangay_db::Database;
use barangay_db::models::format_timestamp;
use barangay_types::api::{SettingQuery, UpsertSettingRequest};
use barangay_types::models::Setting;

use crate::auth::AppState;
use crate::error::{internal, run_blocking};

const MAX_NAME_LEN: usize = 64;
const MAX_VALUE_LEN: usize = 1000;

/// A setting-backed UI label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "title", rename_all = "lowercase")]
pub enum SettingLabel {
    /// Nothing fetched yet.
    #[default]
    Loading,
    /// The stored setting value.
    Resolved(String),
    /// The setting is missing or couldn't be read; the caller's default.
    Fallback(String),
}

impl SettingLabel {
    /// Text to render, if any.
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Loading => None,
            Self::Resolved(title) | Self::Fallback(title) => Some(title),
        }
    }
}

/// Look up `name`; any miss or failure resolves to `fallback`.
pub fn resolve_setting_label(db: &Database, name: &str, fallback: &str) -> SettingLabel {
    match db.get_setting(name) {
        Ok(Some(value)) => SettingLabel::Resolved(value),
        Ok(None) => SettingLabel::Fallback(fallback.to_string()),
        Err(e) => {
            warn!("Failed to read setting '{}': {:#}", name, e);
            SettingLabel::Fallback(fallback.to_string())
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub async fn get_setting_label(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SettingQuery>,
) -> Json<SettingLabel> {
    let db = state.db.clone();
    let fallback = query.fallback.clone();
    let label = run_blocking(move || resolve_setting_label(&db, &name, &query.fallback))
        .await
        .unwrap_or(SettingLabel::Fallback(fallback));

    Json(label)
}

pub async fn upsert_setting(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpsertSettingRequest>,
) -> Result<Json<Setting>, StatusCode> {
    if !is_valid_name(&name) || req.value.len() > MAX_VALUE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let setting = Setting { name, value: req.value.trim().to_string() };
    let stored = setting.clone();
    run_blocking(move || {
        db.upsert_setting(&stored.name, &stored.value, &format_timestamp(&chrono::Utc::now()))
    })
    .await?
    .map_err(internal)?;

    info!("Setting '{}' updated", setting.name);
    Ok(Json(setting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_key_resolves_value() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_setting("barangay_name", "Barangay San Roque", "2024-01-01T00:00:00+00:00").unwrap();

        let label = resolve_setting_label(&db, "barangay_name", "Barangay Portal");
        assert_eq!(label, SettingLabel::Resolved("Barangay San Roque".into()));
        assert_eq!(label.title(), Some("Barangay San Roque"));
    }

    #[test]
    fn test_missing_key_falls_back() {
        let db = Database::open_in_memory().unwrap();
        let label = resolve_setting_label(&db, "office_hours", "Mon-Fri");
        assert_eq!(label, SettingLabel::Fallback("Mon-Fri".into()));
    }

    #[test]
    fn test_store_error_falls_back() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE settings")?;
            Ok(())
        })
        .unwrap();

        let label = resolve_setting_label(&db, "barangay_name", "Barangay Portal");
        assert_eq!(label, SettingLabel::Fallback("Barangay Portal".into()));
    }

    #[test]
    fn test_label_starts_loading() {
        let label = SettingLabel::default();
        assert_eq!(label, SettingLabel::Loading);
        assert_eq!(label.title(), None);
        assert_eq!(
            serde_json::to_value(SettingLabel::Fallback("X".into())).unwrap(),
            serde_json::json!({ "state": "fallback", "title": "X" })
        );
    }

    #[test]
    fn test_setting_names() {
        assert!(is_valid_name("barangay_name"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Barangay Name"));
    }
}
