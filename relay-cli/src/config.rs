//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relay_core::HookConfig;
use serde::Deserialize;
use tracing::warn;

/// Harness configuration. File: --config, else ~/.config/bodyrelay/config.toml,
/// else /etc/bodyrelay/config.toml. Env overrides: BODYRELAY_AJAX_HOOK,
/// BODYRELAY_RELAY_MODE, BODYRELAY_ON_READ_FAILURE, BODYRELAY_MARKER_NAME,
/// BODYRELAY_ACK_DELAY_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Settings handed to the relay context.
    #[serde(default)]
    pub hook: HookConfig,
    /// Delay before the stand-in native host acknowledges (default 5 ms).
    #[serde(default = "default_ack_delay_ms")]
    pub ack_delay_ms: u64,
    /// Document location when the scenario does not set one.
    #[serde(default = "default_document_href")]
    pub document_href: String,
}

fn default_ack_delay_ms() -> u64 {
    5
}
fn default_document_href() -> String {
    "https://app.example.com/".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hook: HookConfig::default(),
            ack_delay_ms: default_ack_delay_ms(),
            document_href: default_document_href(),
        }
    }
}

/// Load config: default, then config file, then env vars. An explicit path must
/// exist and parse; the well-known paths are skipped when absent.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_default_paths().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn read_file(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("invalid config file: {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bodyrelay/config.toml"));
    }
    out.push(PathBuf::from("/etc/bodyrelay/config.toml"));
    out
}

fn load_default_paths() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&p) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "ignoring config file");
            None
        }
    }
}

/// Apply env overrides. Unparseable values are logged and skipped.
fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("BODYRELAY_AJAX_HOOK") {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => c.hook.ajax_hook = true,
            "0" | "false" | "off" => c.hook.ajax_hook = false,
            _ => warn!(value = %s, "BODYRELAY_AJAX_HOOK: expected a boolean"),
        }
    }
    if let Some(s) = var("BODYRELAY_RELAY_MODE") {
        match s.parse() {
            Ok(m) => c.hook.relay_mode = m,
            Err(e) => warn!(error = %e, "BODYRELAY_RELAY_MODE ignored"),
        }
    }
    if let Some(s) = var("BODYRELAY_ON_READ_FAILURE") {
        match s.parse() {
            Ok(p) => c.hook.on_read_failure = p,
            Err(e) => warn!(error = %e, "BODYRELAY_ON_READ_FAILURE ignored"),
        }
    }
    if let Some(s) = var("BODYRELAY_MARKER_NAME") {
        if !s.is_empty() {
            c.hook.marker_name = s;
        }
    }
    if let Some(s) = var("BODYRELAY_ACK_DELAY_MS") {
        match s.parse::<u64>() {
            Ok(ms) => c.ack_delay_ms = ms,
            Err(_) => warn!(value = %s, "BODYRELAY_ACK_DELAY_MS: expected milliseconds"),
        }
    }
}
