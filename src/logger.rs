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
use std::io;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "COREWATCH_LOG";

/// Filter directive in effect: `COREWATCH_LOG` when set and non-empty,
/// otherwise `configured`.
pub fn resolve_filter(configured: &str) -> String {
    match env::var(LOG_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => configured.to_string(),
    }
}

/// Installs the global subscriber writing to stderr, keeping stdout for
/// readings. Returns false when a subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = resolve_filter(level);
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter.as_str())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolve_filter_uses_configured_level() {
        env::remove_var(LOG_ENV);
        assert_eq!(resolve_filter("debug"), "debug");
    }

    #[test]
    #[serial]
    fn test_resolve_filter_env_override() {
        env::set_var(LOG_ENV, "corewatch=trace");
        assert_eq!(resolve_filter("info"), "corewatch=trace");
        env::set_var(LOG_ENV, "  ");
        assert_eq!(resolve_filter("info"), "info");
        env::remove_var(LOG_ENV);
    }

    #[test]
    #[serial]
    fn test_second_init_is_refused() {
        env::remove_var(LOG_ENV);
        init_logging("warn");
        assert!(!init_logging("warn"));
    }
}
