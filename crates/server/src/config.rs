use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// The consolidation hub outlet; transfers sourced anywhere else are
    /// pack-only.
    pub hub_outlet_id: i64,
    pub auto_dispatch_on_pack: bool,
    pub auth_secret: String,
    pub auth_ttl_seconds: i64,
    pub vend_base_url: Option<String>,
    pub vend_api_token: String,
    pub vend_timeout_secs: u64,
    pub courier_service: Option<String>,
    pub courier_base_url: String,
    pub courier_api_key: String,
    pub courier_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/transfers.db".into(),
            hub_outlet_id: 1,
            auto_dispatch_on_pack: false,
            auth_secret: "devsecret".into(),
            auth_ttl_seconds: 8 * 3600,
            vend_base_url: None,
            vend_api_token: String::new(),
            vend_timeout_secs: 10,
            courier_service: None,
            courier_base_url: String::new(),
            courier_api_key: String::new(),
            courier_timeout_secs: 15,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr").and_then(|v| v.as_str()) {
                settings.server_bind = v.to_string();
            }
            if let Some(v) = file_cfg.get("database_url").and_then(|v| v.as_str()) {
                settings.database_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("hub_outlet_id").and_then(|v| v.as_integer()) {
                settings.hub_outlet_id = v;
            }
            if let Some(v) = file_cfg
                .get("auto_dispatch_on_pack")
                .and_then(|v| v.as_bool())
            {
                settings.auto_dispatch_on_pack = v;
            }
            if let Some(v) = file_cfg.get("auth_secret").and_then(|v| v.as_str()) {
                settings.auth_secret = v.to_string();
            }
            if let Some(v) = file_cfg.get("auth_ttl_seconds").and_then(|v| v.as_integer()) {
                settings.auth_ttl_seconds = v;
            }
            if let Some(v) = file_cfg.get("vend_base_url").and_then(|v| v.as_str()) {
                settings.vend_base_url = Some(v.to_string());
            }
            if let Some(v) = file_cfg.get("vend_api_token").and_then(|v| v.as_str()) {
                settings.vend_api_token = v.to_string();
            }
            if let Some(v) = file_cfg.get("courier_service").and_then(|v| v.as_str()) {
                settings.courier_service = Some(v.to_string());
            }
            if let Some(v) = file_cfg.get("courier_base_url").and_then(|v| v.as_str()) {
                settings.courier_base_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("courier_api_key").and_then(|v| v.as_str()) {
                settings.courier_api_key = v.to_string();
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__HUB_OUTLET_ID") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.hub_outlet_id = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__AUTO_DISPATCH_ON_PACK") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.auto_dispatch_on_pack = parsed;
        }
    }

    if let Ok(v) = std::env::var("AUTH_SECRET") {
        settings.auth_secret = v;
    }
    if let Ok(v) = std::env::var("APP__AUTH_SECRET") {
        settings.auth_secret = v;
    }
    if let Ok(v) = std::env::var("APP__AUTH_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.auth_ttl_seconds = parsed;
        }
    }

    if let Ok(v) = std::env::var("VEND_BASE_URL") {
        settings.vend_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("VEND_API_TOKEN") {
        settings.vend_api_token = v;
    }
    if let Ok(v) = std::env::var("APP__VEND_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.vend_timeout_secs = parsed;
        }
    }

    if let Ok(v) = std::env::var("COURIER_SERVICE") {
        settings.courier_service = Some(v);
    }
    if let Ok(v) = std::env::var("COURIER_BASE_URL") {
        settings.courier_base_url = v;
    }
    if let Ok(v) = std::env::var("COURIER_API_KEY") {
        settings.courier_api_key = v;
    }
    if let Ok(v) = std::env::var("APP__COURIER_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.courier_timeout_secs = parsed;
        }
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
    }

    #[test]
    fn leaves_memory_url_untouched() {
        assert_eq!(
            normalize_database_url("sqlite::memory:"),
            "sqlite::memory:"
        );
    }

    #[test]
    fn creates_parent_dir_for_relative_sqlite_url() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();

        let temp_root = env::temp_dir().join(format!("transfer_server_test_{suffix}"));
        fs::create_dir_all(&temp_root).expect("temp root");

        let original_dir = env::current_dir().expect("cwd");
        env::set_current_dir(&temp_root).expect("set cwd");

        prepare_database_url("./data/test.db").expect("prepare db url");
        assert!(temp_root.join("data").exists());

        env::set_current_dir(original_dir).expect("restore cwd");
        fs::remove_dir_all(temp_root).expect("cleanup");
    }
}
