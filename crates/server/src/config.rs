use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use sync_core::CoordinatorConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub repo_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub outbox_capacity: usize,
    pub echo_to_originator: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/boards.db".into(),
            repo_timeout_ms: 3_000,
            heartbeat_interval_secs: 30,
            outbox_capacity: 256,
            echo_to_originator: true,
        }
    }
}

impl Settings {
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            repo_timeout: Duration::from_millis(self.repo_timeout_ms),
            echo_to_originator: self.echo_to_originator,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            apply_file_settings(&mut settings, &file_cfg);
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: &HashMap<String, toml::Value>) {
    if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
        settings.server_bind = v.to_string();
    }
    if let Some(v) = file_cfg.get("database_url").and_then(toml::Value::as_str) {
        settings.database_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("repo_timeout_ms").and_then(toml::Value::as_integer) {
        settings.repo_timeout_ms = v.max(1) as u64;
    }
    if let Some(v) = file_cfg
        .get("heartbeat_interval_secs")
        .and_then(toml::Value::as_integer)
    {
        settings.heartbeat_interval_secs = v.max(1) as u64;
    }
    if let Some(v) = file_cfg.get("outbox_capacity").and_then(toml::Value::as_integer) {
        settings.outbox_capacity = v.max(1) as usize;
    }
    if let Some(v) = file_cfg
        .get("echo_to_originator")
        .and_then(toml::Value::as_bool)
    {
        settings.echo_to_originator = v;
    }
}

fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = var("APP__REPO_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.repo_timeout_ms = parsed.max(1);
        }
    }
    if let Some(v) = var("APP__HEARTBEAT_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.heartbeat_interval_secs = parsed.max(1);
        }
    }
    if let Some(v) = var("APP__OUTBOX_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.outbox_capacity = parsed.max(1);
        }
    }
    if let Some(v) = var("APP__ECHO_TO_ORIGINATOR") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.echo_to_originator = parsed;
        }
    }
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
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
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
#[path = "tests/config_tests.rs"]
mod tests;
