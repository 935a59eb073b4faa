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

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use corewatch::access::LinuxRegisterChannel;
use corewatch::buslock::BusLock;
use corewatch::config::{load_config, validate_config, MAX_UPDATE_INTERVAL_MS, MIN_UPDATE_INTERVAL_MS};
use corewatch::cpu::{CpuTelemetry, Platform};
use corewatch::logger;
use corewatch::service::{self, OutputFormat};
use corewatch::topology::{read_performance_cores, read_topology};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default)]
struct Options {
    once: bool,
    json: bool,
    report: bool,
    config: Option<PathBuf>,
    interval_ms: Option<u64>,
}

fn print_help() {
    println!("corewatch {}", VERSION);
    println!("CPU register telemetry for Linux\n");
    println!("USAGE:");
    println!("    corewatch [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once             Read every sensor once and exit");
    println!("    --json             Print readings as JSON lines");
    println!("    --report           Print identity, calibration and raw registers, then exit");
    println!("    --config <PATH>    Configuration file (default: ~/.config/corewatch/config.json)");
    println!("    --interval <MS>    Update interval in milliseconds ({}-{})", MIN_UPDATE_INTERVAL_MS, MAX_UPDATE_INTERVAL_MS);
    println!("    -h, --help         Show this help");
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => opts.once = true,
            "--json" => opts.json = true,
            "--report" => opts.report = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| anyhow!("--config requires a path argument"))?;
                opts.config = Some(PathBuf::from(path));
            }
            "--interval" => {
                i += 1;
                let raw = args.get(i).ok_or_else(|| anyhow!("--interval requires a value in milliseconds"))?;
                let ms = raw.parse::<u64>().with_context(|| format!("invalid interval '{}'", raw))?;
                opts.interval_ms = Some(ms);
            }
            "-h" | "--help" => return Ok(None),
            arg => return Err(anyhow!("unknown argument: {}", arg)),
        }
        i += 1;
    }
    Ok(Some(opts))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(Some(opts)) => opts,
        Ok(None) => {
            print_help();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    let mut cfg = load_config(opts.config.as_deref()).context("load configuration")?;
    if let Some(ms) = opts.interval_ms {
        cfg.update_interval_ms = ms;
        validate_config(&cfg).context("--interval")?;
    }
    logger::init_logging(&cfg.log_level);
    info!("corewatch {} starting", VERSION);

    if unsafe { libc::geteuid() } != 0 {
        warn!("Not running as root; register reads will likely fail and sensors stay empty");
    }

    let packages = read_topology().context("read processor topology")?;
    let registers = LinuxRegisterChannel::with_roots(&cfg.msr_device_root, &cfg.pci_device_root);
    if let Some(first) = packages.first() {
        if let Err(e) = registers.probe(first.first_thread().affinity) {
            warn!(error = %e, "Register channel unavailable");
        }
    }

    let bus = Arc::new(BusLock::new(cfg.bus_lock_timeout()));
    let mut platform = Platform::new(Arc::new(registers), bus);
    if !cfg.load_sensors {
        platform.proc_stat = None;
    }
    platform.performance_cores = read_performance_cores();

    let mut engines: Vec<CpuTelemetry> = packages
        .into_iter()
        .map(|package| CpuTelemetry::new(package, &platform))
        .collect();

    if !cfg.parameters.is_empty() {
        let matched: usize = engines
            .iter_mut()
            .map(|e| e.apply_parameter_overrides(&cfg.parameters))
            .sum();
        if matched < cfg.parameters.len() {
            warn!(
                configured = cfg.parameters.len(),
                matched,
                "Some parameter overrides name no known sensor"
            );
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if opts.report {
        for engine in &engines {
            writeln!(out, "{}", engine.report()).context("write report")?;
        }
        return Ok(());
    }

    let format = if opts.json { OutputFormat::Json } else { OutputFormat::Table };
    let iterations = opts.once.then_some(1);
    let interval = if opts.once { Duration::ZERO } else { cfg.update_interval() };
    service::run_service(&mut engines, interval, format, iterations, &mut out)
}
