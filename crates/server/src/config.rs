use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use client_core::DEFAULT_SERVER_URL;
use relay_core::{retry, RetryPolicy};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub email: String,
    pub password: String,
    pub port: u16,
    pub bind_host: String,
    pub server_url: String,
    pub docs_url: String,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            port: 8080,
            bind_host: "0.0.0.0".into(),
            server_url: DEFAULT_SERVER_URL.into(),
            docs_url: "https://www.kahla.app".into(),
            retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    fn validate(&self, path: &Path) -> anyhow::Result<()> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            bail!(
                "email and password must be set in '{}' (or RELAY__EMAIL / RELAY__PASSWORD)",
                path.display()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: retry::DEFAULT_INITIAL_DELAY.as_millis() as u64,
            max_delay_ms: retry::DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter_ms: retry::DEFAULT_JITTER.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug)]
pub enum LoadedSettings {
    Ready(Settings),
    /// No config existed; a template was written here for the operator.
    TemplateWritten(PathBuf),
}

pub fn load_settings(path: &Path) -> anyhow::Result<LoadedSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<LoadedSettings> {
    if !path.exists() {
        write_template(path)?;
        return Ok(LoadedSettings::TemplateWritten(path.to_path_buf()));
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    let mut settings: Settings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config '{}'", path.display()))?;
    apply_env_overrides(&mut settings, env);
    settings.validate(path)?;
    Ok(LoadedSettings::Ready(settings))
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("RELAY__EMAIL") {
        settings.email = v;
    }
    if let Some(v) = env("RELAY__PASSWORD") {
        settings.password = v;
    }
    if let Some(v) = env("RELAY__PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.port = parsed;
        }
    }
    if let Some(v) = env("RELAY__BIND_HOST") {
        settings.bind_host = v;
    }
    if let Some(v) = env("RELAY__SERVER_URL") {
        settings.server_url = v;
    }
}

fn write_template(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create config directory '{}'", parent.display())
        })?;
    }
    let template = toml::to_string_pretty(&Settings::default())
        .context("failed to render config template")?;
    fs::write(path, template)
        .with_context(|| format!("failed to write config template '{}'", path.display()))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
