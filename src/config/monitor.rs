// src/config/monitor.rs
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use chrono_tz::Tz;
use serde_json::Value;

use crate::detector::{parse_class_id, DEFAULT_TARGET_CLASS};
use crate::event::LocationMap;

pub const ENV_STORE_URL: &str = "STORE_URL";
/// Older deployments name the store variable `DB_URL`.
pub const ENV_STORE_URL_LEGACY: &str = "DB_URL";
pub const ENV_SOURCES: &str = "SOURCES";
pub const ENV_LOCATION_DICT: &str = "LOCATION_DICT";

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Kolkata;
pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8090/infer";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Malformed {var}: {reason}")]
    Malformed { var: &'static str, reason: String },
}

fn malformed(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Malformed {
        var,
        reason: reason.into(),
    }
}

/// Everything the monitor reads at startup. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub store_url: String,
    pub sources: Vec<String>,
    pub locations: LocationMap,
    pub timezone: Tz,
    pub target_class: u32,
    pub inference_url: String,
    pub reconnect_delay: Duration,
    pub store_timeout: Duration,
    pub frame_interval: Duration,
    /// Zero disables the display side channel.
    pub display_queue: usize,
    pub http_addr: SocketAddr,
}

impl MonitorConfig {
    /// Loads from the process environment (call `dotenvy::dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from any key lookup; `from_env` is this over `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_url = get(ENV_STORE_URL)
            .or_else(|| get(ENV_STORE_URL_LEGACY))
            .ok_or(ConfigError::Missing(ENV_STORE_URL))?
            .trim()
            .to_string();

        let sources = parse_sources(&get(ENV_SOURCES).ok_or(ConfigError::Missing(ENV_SOURCES))?)?;
        let locations = parse_locations(
            &get(ENV_LOCATION_DICT).ok_or(ConfigError::Missing(ENV_LOCATION_DICT))?,
        )?;

        let timezone = match get("TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| malformed("TIMEZONE", e.to_string()))?,
            None => DEFAULT_TIMEZONE,
        };

        let http_addr = match (get("HTTP_ADDR"), get("PORT")) {
            (Some(addr), _) => addr
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| malformed("HTTP_ADDR", e.to_string()))?,
            (None, Some(port)) => {
                let port: u16 = parse_num("PORT", &port)?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            (None, None) => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        Ok(Self {
            store_url,
            sources,
            locations,
            timezone,
            target_class: match get("TARGET_CLASS") {
                Some(raw) => parse_class_id(&raw).map_err(|e| malformed("TARGET_CLASS", e))?,
                None => DEFAULT_TARGET_CLASS,
            },
            inference_url: get("INFERENCE_URL")
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            reconnect_delay: Duration::from_secs(opt_num(&get, "RECONNECT_DELAY_SECS", 5)?),
            store_timeout: Duration::from_secs(opt_num::<u64, _>(&get, "STORE_TIMEOUT_SECS", 10)?.max(1)),
            frame_interval: Duration::from_millis(opt_num(&get, "FRAME_INTERVAL_MS", 200)?),
            display_queue: opt_num(&get, "DISPLAY_QUEUE", 32)?,
            http_addr,
        })
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| malformed(var, format!("{e} (got `{raw}`)")))
}

fn opt_num<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_num(var, &raw),
        None => Ok(default),
    }
}

/// JSON array of source ids. Numbers (webcam indices) are kept in their
/// string form; blanks are dropped; repeats keep their first position.
pub fn parse_sources(raw: &str) -> Result<Vec<String>, ConfigError> {
    let items: Vec<Value> = serde_json::from_str(raw).map_err(|e| malformed(ENV_SOURCES, e.to_string()))?;

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let id = match item {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => return Err(malformed(ENV_SOURCES, format!("unsupported entry {other}"))),
        };
        if id.is_empty() {
            continue;
        }
        if !seen.insert(id.clone()) {
            tracing::warn!(source = %id, "duplicate source ignored");
            continue;
        }
        out.push(id);
    }

    if out.is_empty() {
        return Err(malformed(ENV_SOURCES, "no sources configured"));
    }
    Ok(out)
}

/// JSON object `source -> location`.
pub fn parse_locations(raw: &str) -> Result<LocationMap, ConfigError> {
    let map: HashMap<String, Value> =
        serde_json::from_str(raw).map_err(|e| malformed(ENV_LOCATION_DICT, e.to_string()))?;

    map.into_iter()
        .map(|(source, label)| match label {
            Value::String(s) => Ok((source.trim().to_string(), s)),
            other => Err(malformed(
                ENV_LOCATION_DICT,
                format!("location for `{source}` must be a string, got {other}"),
            )),
        })
        .collect()
}
