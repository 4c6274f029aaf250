//! Engine configuration stored under `.conductor/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Edited by humans; missing fields default to sensible values and a missing
/// file is equivalent to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Inactivity timeout for interactive commands, in seconds. Suspended
    /// while the child terminal has echo disabled.
    pub command_timeout_secs: u64,

    /// Relay loop poll interval in milliseconds. Short enough that the first
    /// keystroke after a long silence is never misclassified as a timeout.
    pub poll_interval_ms: u64,

    /// Truncate command transcripts and collaborator output beyond this many
    /// bytes.
    pub output_limit_bytes: usize,

    /// Per-step attempt ceiling; reaching it forces a human-intervention
    /// dispatch instead of consulting the oracle again. 0 disables the
    /// ceiling.
    pub max_step_attempts: u32,

    /// Per-file byte budget for step file snapshots in oracle context.
    pub snapshot_limit_bytes: usize,

    /// Timeout for git subprocess calls, in seconds.
    pub git_timeout_secs: u64,

    /// Credentials available to the run (name -> value). Only the names ever
    /// reach oracle context or logs.
    pub credentials: BTreeMap<String, String>,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command to spawn for oracle round trips (e.g. `["oracle-cli"]`).
    /// Context goes in on stdin; one JSON document comes back on stdout.
    pub command: Vec<String>,
    /// Maximum time to wait for one oracle round trip, in seconds.
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["oracle".to_string()],
            timeout_secs: 600,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            poll_interval_ms: 100,
            output_limit_bytes: 100_000,
            max_step_attempts: 15,
            snapshot_limit_bytes: 20_000,
            git_timeout_secs: 60,
            credentials: BTreeMap::new(),
            oracle: OracleConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }
}

/// Load config from a TOML file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
