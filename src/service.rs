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

use std::fmt::Write as _;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cpu::{CpuSnapshot, CpuTelemetry};
use crate::sensor::SensorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    /// One JSON array of package snapshots per line.
    Json,
}

fn format_value(kind: SensorKind, value: Option<f32>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) => match kind {
            SensorKind::Clock => format!("{:.0}", v),
            SensorKind::Voltage => format!("{:.3}", v),
            SensorKind::Factor => format!("{:.2}", v),
            _ => format!("{:.1}", v),
        },
    }
}

pub fn render_table(engine: &CpuTelemetry) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} [{}, {}]",
        engine.name(),
        engine.sensor_set().hardware(),
        engine.profile().microarchitecture
    );

    let mut current: Option<SensorKind> = None;
    for s in engine.sensors() {
        if current != Some(s.kind()) {
            current = Some(s.kind());
            let _ = writeln!(out, "  {} ({})", s.kind(), s.kind().unit());
        }
        let _ = writeln!(
            out,
            "    {:<28} {:>9}  min {:>9}  max {:>9}",
            s.name(),
            format_value(s.kind(), s.value()),
            format_value(s.kind(), s.min()),
            format_value(s.kind(), s.max()),
        );
    }
    out
}

pub fn render_json(engines: &[CpuTelemetry]) -> Result<String> {
    let snapshots: Vec<CpuSnapshot> = engines.iter().map(CpuTelemetry::snapshot).collect();
    serde_json::to_string(&snapshots).context("serialize snapshots")
}

fn emit(engines: &[CpuTelemetry], format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Table => {
            for engine in engines {
                writeln!(out, "{}", render_table(engine)).context("write readings")?;
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", render_json(engines)?).context("write readings")?;
        }
    }
    out.flush().context("flush readings")
}

/// Updates every engine once per `interval` and writes the readings to
/// `out`. Runs until `iterations` cycles have completed, or forever.
pub fn run_service(
    engines: &mut [CpuTelemetry],
    interval: Duration,
    format: OutputFormat,
    iterations: Option<usize>,
    out: &mut dyn Write,
) -> Result<()> {
    info!(
        packages = engines.len(),
        interval_ms = interval.as_millis() as u64,
        "Starting telemetry loop"
    );

    let mut last: Option<Instant> = None;
    let mut completed = 0usize;

    loop {
        if iterations.is_some_and(|n| completed >= n) {
            debug!(completed, "Telemetry loop finished");
            return Ok(());
        }

        let now = Instant::now();
        if last.is_some_and(|l| now.duration_since(l) < interval) {
            thread::sleep(Duration::from_millis(50).min(interval));
            continue;
        }
        last = Some(now);

        for engine in engines.iter_mut() {
            engine.update();
        }
        emit(engines, format, out)?;
        completed += 1;
    }
}
