//! Configuration file management for transit-live.
//!
//! Reads/writes `~/.transit-live/config.yaml` with the public site and API
//! endpoints, the analytics script location, and decode worker limits.
//! Environment variables override file values. Every URL is an opaque
//! string; nothing here changes how messages are decoded.

use std::path::{Path, PathBuf};

use crate::pipeline::DEFAULT_MAX_MESSAGE_BYTES;
use crate::types::{FeedError, Result};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub site_url: String,
    pub api_url: String,
    /// Explicit realtime endpoint. Derived from `api_url` when unset.
    pub transport_url: Option<String>,
    pub analytics: AnalyticsConfig,
    pub worker: WorkerConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyticsConfig {
    pub script_url: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub queue_depth: usize,
    pub timeout_ms: u64,
    pub max_message_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            queue_depth: 64,
            timeout_ms: 5_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            site_url: "http://localhost:5173".into(),
            api_url: "http://localhost:3000".into(),
            transport_url: None,
            analytics: AnalyticsConfig::default(),
            worker: WorkerConfig::default(),
            log_level: None,
        }
    }
}

impl Config {
    /// Realtime feed endpoint: `transport_url`, or `<api_url>/v1/ws` with
    /// the scheme switched to its websocket counterpart.
    pub fn transport_endpoint(&self) -> String {
        if let Some(url) = &self.transport_url {
            return url.clone();
        }
        let base = self.api_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/v1/ws")
    }

    /// Overlay environment variables onto file values.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("PUBLIC_SITE_URL") {
            self.site_url = v;
        }
        if let Some(v) = get("API_URL") {
            self.api_url = v;
        }
        if let Some(v) = get("TRANSPORT_URL") {
            self.transport_url = Some(v);
        }
        if let Some(v) = get("PLAUSIBLE_SCRIPT_URL") {
            self.analytics.script_url = Some(v);
        }
        if let Some(v) = get("PLAUSIBLE_API_URL") {
            self.analytics.api_url = Some(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = Some(v);
        }
    }
}

/// Get the config directory path (`~/.transit-live/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".transit-live")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load `~/.transit-live/config.yaml` with the environment overlaid.
///
/// A missing file yields the defaults. A file that fails to read or parse
/// is an error rather than a silent fallback.
pub fn load_config() -> Result<Config> {
    load_config_at(&config_file())
}

/// Load `path`, then overlay the environment.
pub fn load_config_at(path: &Path) -> Result<Config> {
    let mut config = load_config_from(path).map_err(|e| match e {
        FeedError::Config(msg) => FeedError::Config(format!("{}: {msg}", path.display())),
        FeedError::Io(e) => FeedError::Config(format!("{}: {e}", path.display())),
        other => other,
    })?;
    config.apply_env();
    Ok(config)
}

/// Load a config file without the environment overlay.
///
/// A missing file yields the defaults; any other read failure or a bad
/// value is an error.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.transit-live/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FeedError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| FeedError::Config(e.to_string()))
}

/// Parse simple YAML-like config text.
fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
                continue;
            }
            current_section = None;
            match key {
                "site_url" => {
                    if let Some(v) = parse_string_value(val) {
                        config.site_url = v;
                    }
                }
                "api_url" => {
                    if let Some(v) = parse_string_value(val) {
                        config.api_url = v;
                    }
                }
                "transport_url" => config.transport_url = parse_string_value(val),
                "log_level" => config.log_level = parse_string_value(val),
                _ => {}
            }
        } else if let Some(ref section) = current_section {
            match (section.as_str(), key) {
                ("analytics", "script_url") => config.analytics.script_url = parse_string_value(val),
                ("analytics", "api_url") => config.analytics.api_url = parse_string_value(val),
                ("worker", "queue_depth") => {
                    config.worker.queue_depth = parse_number(val, key, lineno)?;
                }
                ("worker", "timeout_ms") => {
                    config.worker.timeout_ms = parse_number(val, key, lineno)?;
                }
                ("worker", "max_message_bytes") => {
                    config.worker.max_message_bytes = parse_number(val, key, lineno)?;
                }
                _ => {}
            }
        }
    }

    Ok(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_number<T: std::str::FromStr>(val: &str, key: &str, lineno: usize) -> Result<T> {
    val.parse().map_err(|_| {
        FeedError::Config(format!(
            "line {}: `{key}` expects a non-negative integer, got `{val}`",
            lineno + 1
        ))
    })
}

fn push_optional(lines: &mut Vec<String>, indent: &str, key: &str, value: &Option<String>) {
    match value {
        Some(v) => lines.push(format!("{indent}{key}: \"{v}\"")),
        None => lines.push(format!("{indent}{key}: null")),
    }
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# transit-live configuration".to_string(), String::new()];

    lines.push(format!("site_url: \"{}\"", config.site_url));
    lines.push(format!("api_url: \"{}\"", config.api_url));
    push_optional(&mut lines, "", "transport_url", &config.transport_url);
    push_optional(&mut lines, "", "log_level", &config.log_level);
    lines.push(String::new());

    lines.push("analytics:".into());
    push_optional(&mut lines, "  ", "script_url", &config.analytics.script_url);
    push_optional(&mut lines, "  ", "api_url", &config.analytics.api_url);
    lines.push(String::new());

    lines.push("worker:".into());
    lines.push(format!("  queue_depth: {}", config.worker.queue_depth));
    lines.push(format!("  timeout_ms: {}", config.worker.timeout_ms));
    lines.push(format!("  max_message_bytes: {}", config.worker.max_message_bytes));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
