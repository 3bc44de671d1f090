//! Runtime configuration for offloading and the local worker pool.
//!
//! Built from the process environment ([`OffloadConfig::from_env`]), from
//! any key lookup ([`OffloadConfig::from_lookup`]), or from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OffloadError, Result};

pub const OFFLOAD_VAR: &str = "SOLVER_OFFLOAD";
pub const FIRMWARE_DIR_VAR: &str = "SOLVER_FIRMWARE_DIR";
pub const DEVICE_VAR: &str = "SOLVER_DEVICE";
pub const THREADS_VAR: &str = "SOLVER_THREADS";
pub const CHUNK_ROWS_VAR: &str = "SOLVER_CHUNK_ROWS";

pub const DEFAULT_DEVICE_PATH: &str = "/dev/solver_accel";
pub const DEFAULT_CHUNK_ROWS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Matrix rows handed to one job by the local solvers.
    pub chunk_rows: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers,
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    pub offload: bool,
    pub firmware_dir: Option<PathBuf>,
    pub device_path: PathBuf,
    /// Signal whose delivery during a device run triggers a firmware stop.
    pub interrupt_signal: i32,
    pub dispatch: DispatchConfig,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            offload: false,
            firmware_dir: None,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            interrupt_signal: libc::SIGINT,
            dispatch: DispatchConfig::default(),
        }
    }
}

fn parse_count(name: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(OffloadError::InvalidConfiguration(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
        Ok(n) => Ok(n),
    }
}

impl OffloadConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every setting through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(OFFLOAD_VAR) {
            let flag = raw.trim().parse::<i64>().map_err(|_| {
                OffloadError::InvalidConfiguration(format!(
                    "{OFFLOAD_VAR} must be an integer, got {raw:?}"
                ))
            })?;
            config.offload = flag != 0;
        }
        config.firmware_dir = lookup(FIRMWARE_DIR_VAR)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        if let Some(device) = lookup(DEVICE_VAR).filter(|d| !d.is_empty()) {
            config.device_path = PathBuf::from(device);
        }
        if let Some(raw) = lookup(THREADS_VAR) {
            config.dispatch.workers = parse_count(THREADS_VAR, &raw)?;
        }
        if let Some(raw) = lookup(CHUNK_ROWS_VAR) {
            config.dispatch.chunk_rows = parse_count(CHUNK_ROWS_VAR, &raw)?;
        }

        log::debug!("offload configuration: {:?}", config);
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OffloadError::InvalidConfiguration(format!("bad JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| OffloadError::InvalidConfiguration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.workers == 0 {
            return Err(OffloadError::InvalidConfiguration(
                "dispatch.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatch.chunk_rows == 0 {
            return Err(OffloadError::InvalidConfiguration(
                "dispatch.chunk_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_firmware_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.firmware_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Location of the firmware image `name`, which must exist.
    pub fn firmware_path(&self, name: &str) -> Result<PathBuf> {
        let dir = self
            .firmware_dir
            .as_ref()
            .ok_or(OffloadError::MissingConfiguration(FIRMWARE_DIR_VAR))?;
        let path = dir.join(name);
        if !path.is_file() {
            return Err(OffloadError::FirmwareNotFound(path));
        }
        Ok(path)
    }
}
