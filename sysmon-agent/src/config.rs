//! Startup configuration
//!
//! Read once from the environment (after an optional `.env` is loaded by
//! `main`). Every value has a default; anything present but malformed is a
//! [`ConfigError`] and stops the agent before it spawns anything.

use crate::error::ConfigError;
use crate::metrics::SourceKind;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub agent_name: String,
    pub poll_interval: Duration,
    pub source_timeout: Duration,
    pub backend: SourceBackend,
    pub sources: SourcePaths,
    pub delivery: DeliveryMode,
}

/// How snapshots leave the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    Push(PushConfig),
    Pull(PullConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    pub endpoint: String,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullConfig {
    pub bind: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    /// Read producer files
    ProcFile,
    /// Sample the machine with sysinfo
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub cpu: PathBuf,
    pub ram: PathBuf,
    pub processes: PathBuf,
}

impl SourcePaths {
    pub fn path(&self, kind: SourceKind) -> &PathBuf {
        match kind {
            SourceKind::Cpu => &self.cpu,
            SourceKind::Ram => &self.ram,
            SourceKind::Processes => &self.processes,
        }
    }
}

const DEFAULT_AGENT_NAME: &str = "monitor-agent";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DELIVERY_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_API_URL: &str = "http://localhost:3000/api/data";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CPU_SOURCE: &str = "/proc/cpu_201708880";
const DEFAULT_RAM_SOURCE: &str = "/proc/ram_201708880";
const DEFAULT_PROCESSES_SOURCE: &str = "/proc/procesos_201708880";

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            backend: SourceBackend::ProcFile,
            sources: SourcePaths {
                cpu: DEFAULT_CPU_SOURCE.into(),
                ram: DEFAULT_RAM_SOURCE.into(),
                processes: DEFAULT_PROCESSES_SOURCE.into(),
            },
            delivery: DeliveryMode::Push(PushConfig {
                endpoint: DEFAULT_API_URL.to_string(),
                interval: DEFAULT_DELIVERY_INTERVAL,
                timeout: DEFAULT_DELIVERY_TIMEOUT,
            }),
        }
    }
}

impl AgentConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    ///
    /// Every key is parsed whichever delivery mode is selected, so a bad
    /// value for the inactive mode is still fatal. Blank values count as
    /// unset, except for the agent name and the source paths where a blank
    /// value is rejected by [`AgentConfig::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let text = |key: &str, default: &str| {
            lookup(key).map_or_else(|| default.to_string(), |v| v.trim().to_string())
        };

        let agent_name = text("AGENT_NAME", DEFAULT_AGENT_NAME);
        let poll_interval = duration(&get, "POLL_INTERVAL", DEFAULT_POLL_INTERVAL)?;
        let source_timeout = duration(&get, "SOURCE_TIMEOUT", DEFAULT_SOURCE_TIMEOUT)?;
        let delivery_interval = duration(&get, "DELIVERY_INTERVAL", DEFAULT_DELIVERY_INTERVAL)?;
        let delivery_timeout = duration(&get, "DELIVERY_TIMEOUT", DEFAULT_DELIVERY_TIMEOUT)?;

        let backend = match get("SOURCE_BACKEND").as_deref() {
            None | Some("procfile") => SourceBackend::ProcFile,
            Some("native") => SourceBackend::Native,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "SOURCE_BACKEND",
                    other,
                    "expected `procfile` or `native`",
                ))
            }
        };

        let sources = SourcePaths {
            cpu: text("CPU_SOURCE", DEFAULT_CPU_SOURCE).into(),
            ram: text("RAM_SOURCE", DEFAULT_RAM_SOURCE).into(),
            processes: text("PROCESSES_SOURCE", DEFAULT_PROCESSES_SOURCE).into(),
        };

        let endpoint = get("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "API_URL",
                endpoint,
                "expected an http:// or https:// URL",
            ));
        }
        let port = parsed(&get, "AGENT_PORT", DEFAULT_PORT)?;
        let bind = parsed(&get, "AGENT_BIND", IpAddr::from([0, 0, 0, 0]))?;

        let delivery = match get("DELIVERY_MODE").as_deref() {
            None | Some("push") => DeliveryMode::Push(PushConfig {
                endpoint,
                interval: delivery_interval,
                timeout: delivery_timeout,
            }),
            Some("pull") => DeliveryMode::Pull(PullConfig { bind, port }),
            Some(other) => {
                return Err(ConfigError::invalid(
                    "DELIVERY_MODE",
                    other,
                    "expected `push` or `pull`",
                ))
            }
        };

        let config = Self {
            agent_name,
            poll_interval,
            source_timeout,
            backend,
            sources,
            delivery,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_name.is_empty() {
            return Err(ConfigError::Missing("AGENT_NAME"));
        }
        if self.backend == SourceBackend::ProcFile {
            for (key, kind) in [
                ("CPU_SOURCE", SourceKind::Cpu),
                ("RAM_SOURCE", SourceKind::Ram),
                ("PROCESSES_SOURCE", SourceKind::Processes),
            ] {
                if self.sources.path(kind).as_os_str().is_empty() {
                    return Err(ConfigError::Missing(key));
                }
            }
        }
        Ok(())
    }

    pub fn mode_name(&self) -> &'static str {
        match self.delivery {
            DeliveryMode::Push(_) => "push",
            DeliveryMode::Pull(_) => "pull",
        }
    }
}

/// Parse a value with its `FromStr` impl, or fall back to `default` when unset
fn parsed<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string())),
    }
}

/// Parse a humantime duration (`500ms`, `2s`, `1m`); zero is rejected
fn duration<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else { return Ok(default) };
    let value = humantime::parse_duration(&raw)
        .map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string()))?;
    if value.is_zero() {
        return Err(ConfigError::invalid(key, raw, "must be greater than zero"));
    }
    Ok(value)
}
