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

//! Error type shared by the setup paths of Corewatch.
//!
//! The periodic update cycle never fails; a read that does not succeed simply
//! leaves a sensor without a value. Everything that runs once (configuration,
//! topology discovery, opening the register channel, affinity syscalls) reports
//! through [`TelemetryError`].

use std::io;
use std::path::PathBuf;

/// Result type alias using TelemetryError
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Thread affinity error: {0}")]
    Affinity(String),

    #[error("Register channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl TelemetryError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn topology(msg: impl Into<String>) -> Self {
        Self::Topology(msg.into())
    }

    pub fn affinity(msg: impl Into<String>) -> Self {
        Self::Affinity(msg.into())
    }

    /// Wraps an I/O error together with the path that produced it.
    pub fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = TelemetryError::invalid_config("update_interval_ms", "must be at least 500");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for update_interval_ms: must be at least 500"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: TelemetryError = io_err.into();
        assert!(matches!(err, TelemetryError::Io(_)));
    }

    #[test]
    fn test_file_read_keeps_path() {
        let err = TelemetryError::file_read(
            "/proc/cpuinfo",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/proc/cpuinfo"));
    }
}
