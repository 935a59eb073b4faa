/*
 * This file is part of Corewatch.
 *
 * Copyright (C) 2025 Corewatch contributors
 *
 * Corewatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corewatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corewatch. If not, see <https://www.gnu.org/licenses/>.
 */

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::{DEFAULT_MSR_ROOT, DEFAULT_PCI_ROOT};
use crate::error::{Result, TelemetryError};

pub const MIN_UPDATE_INTERVAL_MS: u64 = 500;
pub const MAX_UPDATE_INTERVAL_MS: u64 = 10_000;
pub const MAX_BUS_LOCK_TIMEOUT_MS: u64 = 1_000;
const MAX_PARAMETER_OVERRIDES: usize = 1024;
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

fn default_update_interval_ms() -> u64 { 1000 }
fn default_bus_lock_timeout_ms() -> u64 { 10 }
fn default_msr_device_root() -> PathBuf { PathBuf::from(DEFAULT_MSR_ROOT) }
fn default_pci_device_root() -> PathBuf { PathBuf::from(DEFAULT_PCI_ROOT) }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

/// A user value for one calibration parameter of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterOverride {
    /// Sensor identifier, e.g. `intelcpu/0/temperature/0`
    pub sensor: String,
    /// Parameter name, e.g. `TjMax [°C]`
    pub parameter: String,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Maximum wait for the side-band bus before a read is skipped
    #[serde(default = "default_bus_lock_timeout_ms")]
    pub bus_lock_timeout_ms: u64,
    #[serde(default = "default_msr_device_root")]
    pub msr_device_root: PathBuf,
    #[serde(default = "default_pci_device_root")]
    pub pci_device_root: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub load_sensors: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            update_interval_ms: default_update_interval_ms(),
            bus_lock_timeout_ms: default_bus_lock_timeout_ms(),
            msr_device_root: default_msr_device_root(),
            pci_device_root: default_pci_device_root(),
            log_level: default_log_level(),
            load_sensors: true,
            parameters: Vec::new(),
        }
    }
}

impl Config {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn bus_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_lock_timeout_ms)
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("corewatch").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("corewatch")
            .join("config.json");
    }
    system_config_path()
}

pub fn system_config_path() -> PathBuf { PathBuf::from("/etc/corewatch/config.json") }

pub fn is_safe_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 128 { return false; }
    s.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || c == '°'
            || matches!(c, '/' | '_' | '-' | '.' | ' ' | '#' | '(' | ')' | '[' | ']')
    })
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if !(MIN_UPDATE_INTERVAL_MS..=MAX_UPDATE_INTERVAL_MS).contains(&cfg.update_interval_ms) {
        return Err(TelemetryError::invalid_config(
            "update_interval_ms",
            format!("must be between {} and {}", MIN_UPDATE_INTERVAL_MS, MAX_UPDATE_INTERVAL_MS),
        ));
    }
    if !(1..=MAX_BUS_LOCK_TIMEOUT_MS).contains(&cfg.bus_lock_timeout_ms) {
        return Err(TelemetryError::invalid_config(
            "bus_lock_timeout_ms",
            format!("must be between 1 and {}", MAX_BUS_LOCK_TIMEOUT_MS),
        ));
    }
    if !cfg.msr_device_root.is_absolute() {
        return Err(TelemetryError::invalid_config("msr_device_root", "must be an absolute path"));
    }
    if !cfg.pci_device_root.is_absolute() {
        return Err(TelemetryError::invalid_config("pci_device_root", "must be an absolute path"));
    }
    if !LOG_LEVELS.contains(&cfg.log_level.to_ascii_lowercase().as_str()) {
        return Err(TelemetryError::invalid_config(
            "log_level",
            format!("must be one of {}", LOG_LEVELS.join(", ")),
        ));
    }

    if cfg.parameters.len() > MAX_PARAMETER_OVERRIDES {
        return Err(TelemetryError::invalid_config(
            "parameters",
            format!("too many overrides (max {})", MAX_PARAMETER_OVERRIDES),
        ));
    }
    for (i, p) in cfg.parameters.iter().enumerate() {
        if !(is_safe_label(&p.sensor) && p.sensor.contains('/')) {
            return Err(TelemetryError::invalid_config(
                "parameters",
                format!("override #{} has an invalid sensor identifier", i + 1),
            ));
        }
        if !is_safe_label(&p.parameter) {
            return Err(TelemetryError::invalid_config(
                "parameters",
                format!("override #{} has an invalid parameter name", i + 1),
            ));
        }
        if !p.value.is_finite() {
            return Err(TelemetryError::invalid_config(
                "parameters",
                format!("override #{} value must be finite", i + 1),
            ));
        }
    }
    Ok(())
}

/// Reads and validates the configuration at `path`.
pub fn try_load_config(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).map_err(|e| TelemetryError::file_read(path, e))?;
    let cfg: Config = serde_json::from_str(&data)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Loads the configuration from `explicit`, or the first existing file of
/// the user and system locations. No file at all yields the defaults; an
/// explicitly named file must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return try_load_config(path);
    }
    for path in [config_path(), system_config_path()] {
        match try_load_config(&path) {
            Ok(cfg) => return Ok(cfg),
            Err(TelemetryError::FileRead { source, .. }) if source.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Config::default())
}
