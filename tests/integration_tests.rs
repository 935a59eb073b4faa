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

//! End-to-end tests driving the public API with in-memory hardware.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corewatch::access::{IndexPort, PciAddress, RegisterAccess};
use corewatch::affinity::{AffinityControl, CpuMask};
use corewatch::buslock::BusLock;
use corewatch::calibrate::{CycleCounter, TimeSource};
use corewatch::catalog::Microarchitecture;
use corewatch::config::try_load_config;
use corewatch::cpu::{CpuTelemetry, Platform};
use corewatch::error::Result;
use corewatch::registers::msr;
use corewatch::sensor::{SensorKind, SensorState};
use corewatch::service::{self, OutputFormat};
use corewatch::topology::{parse_cpuinfo, Affinity, Package};
use tempfile::TempDir;

const SKYLAKE_CPUINFO: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 94
model name\t: Intel(R) Core(TM) i7-6700K CPU @ 4.00GHz
stepping\t: 3
physical id\t: 0
core id\t\t: 0
flags\t\t: fpu tsc msr constant_tsc nonstop_tsc dts pts

processor\t: 1
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 94
model name\t: Intel(R) Core(TM) i7-6700K CPU @ 4.00GHz
stepping\t: 3
physical id\t: 0
core id\t\t: 1
flags\t\t: fpu tsc msr constant_tsc nonstop_tsc dts pts

processor\t: 2
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 94
model name\t: Intel(R) Core(TM) i7-6700K CPU @ 4.00GHz
stepping\t: 3
physical id\t: 0
core id\t\t: 0
flags\t\t: fpu tsc msr constant_tsc nonstop_tsc dts pts

processor\t: 3
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 94
model name\t: Intel(R) Core(TM) i7-6700K CPU @ 4.00GHz
stepping\t: 3
physical id\t: 0
core id\t\t: 1
flags\t\t: fpu tsc msr constant_tsc nonstop_tsc dts pts
";

#[derive(Default)]
struct MsrBank {
    values: Mutex<HashMap<(usize, u32), u64>>,
}

impl MsrBank {
    fn set(&self, cpu: usize, address: u32, value: u64) {
        self.values.lock().unwrap().insert((cpu, address), value);
    }
}

impl RegisterAccess for MsrBank {
    fn read_msr(&self, cpu: Affinity, address: u32) -> Option<u64> {
        self.values.lock().unwrap().get(&(cpu.cpu(), address)).copied()
    }

    fn read_pci_config(&self, _device: PciAddress, _offset: u32) -> Option<u32> {
        None
    }

    fn read_indexed(&self, _port: IndexPort, _address: u32) -> Option<u32> {
        None
    }
}

struct TrackingAffinity {
    current: Mutex<CpuMask>,
    pins: AtomicU64,
}

impl TrackingAffinity {
    fn new(cpus: usize) -> Self {
        TrackingAffinity { current: Mutex::new(CpuMask::from_cpus(0..cpus)), pins: AtomicU64::new(0) }
    }
}

impl AffinityControl for TrackingAffinity {
    fn current(&self) -> Result<CpuMask> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn set(&self, mask: &CpuMask) -> Result<()> {
        if mask.cpus().len() == 1 {
            self.pins.fetch_add(1, Ordering::SeqCst);
        }
        *self.current.lock().unwrap() = mask.clone();
        Ok(())
    }
}

/// Nanosecond clock advancing one microsecond per read.
struct SteppingClock {
    now: AtomicU64,
}

impl SteppingClock {
    fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

impl TimeSource for SteppingClock {
    fn ticks(&self) -> u64 {
        self.now.fetch_add(1_000, Ordering::SeqCst)
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// Four cycles per clock nanosecond.
struct FourGigahertz(Arc<SteppingClock>);

impl CycleCounter for FourGigahertz {
    fn cycles(&self) -> Option<u64> {
        Some(self.0.now.load(Ordering::SeqCst) * 4)
    }
}

struct Machine {
    registers: Arc<MsrBank>,
    affinity: Arc<TrackingAffinity>,
    clock: Arc<SteppingClock>,
    platform: Platform,
}

fn create_machine(threads: usize) -> Machine {
    let registers = Arc::new(MsrBank::default());
    let affinity = Arc::new(TrackingAffinity::new(threads));
    let clock = Arc::new(SteppingClock { now: AtomicU64::new(0) });
    let platform = Platform {
        registers: registers.clone(),
        affinity: affinity.clone(),
        clock: clock.clone(),
        counter: Arc::new(FourGigahertz(clock.clone())),
        bus: Arc::new(BusLock::new(Duration::from_millis(5))),
        proc_stat: None,
        performance_cores: None,
    };
    Machine { registers, affinity, clock, platform }
}

fn skylake_package() -> Package {
    let mut packages = parse_cpuinfo(SKYLAKE_CPUINFO).unwrap();
    assert_eq!(packages.len(), 1);
    packages.remove(0)
}

fn program_skylake(registers: &MsrBank) {
    for cpu in 0..4 {
        registers.set(cpu, msr::IA32_TEMPERATURE_TARGET, 100 << 16);
    }
    registers.set(0, msr::MSR_PLATFORM_INFO, 40 << 8);
    // core 0 reads 100 - 45, core 1 reads 100 - 38
    registers.set(0, msr::IA32_THERM_STATUS, (1 << 31) | (45 << 16));
    registers.set(1, msr::IA32_THERM_STATUS, (1 << 31) | (38 << 16));
    registers.set(0, msr::IA32_PACKAGE_THERM_STATUS, (1 << 31) | (36 << 16));
    for cpu in 0..2 {
        registers.set(cpu, msr::IA32_PERF_STATUS, (0x2000 << 32) | (38 << 8));
    }
}

fn reading(engine: &CpuTelemetry, kind: SensorKind, name: &str) -> Option<f32> {
    engine
        .sensors()
        .into_iter()
        .find(|s| s.kind() == kind && s.name() == name)
        .and_then(|s| s.value())
}

#[test]
fn test_cpuinfo_to_readings() {
    let machine = create_machine(4);
    program_skylake(&machine.registers);
    let mut engine = CpuTelemetry::new(skylake_package(), &machine.platform);

    assert_eq!(engine.name(), "Intel Core i7-6700K");
    assert_eq!(engine.profile().microarchitecture, Microarchitecture::Skylake);
    assert!(engine.sensors().is_empty());

    engine.update();

    assert_eq!(reading(&engine, SensorKind::Temperature, "Core #1"), Some(55.0));
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core #2"), Some(62.0));
    assert_eq!(reading(&engine, SensorKind::Temperature, "CPU Package"), Some(64.0));
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core Max"), Some(62.0));
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core Average"), Some(58.5));

    let tsc = reading(&engine, SensorKind::Clock, "Time Stamp Counter").unwrap();
    assert!((tsc - 4000.0).abs() < 1.0, "tsc {}", tsc);
    let core = reading(&engine, SensorKind::Clock, "Core #2").unwrap();
    assert!((core - 3800.0).abs() < 1.0, "core {}", core);
    assert_eq!(reading(&engine, SensorKind::Voltage, "CPU Core"), Some(1.0));

    assert!(machine.affinity.pins.load(Ordering::SeqCst) > 0);
    assert_eq!(machine.affinity.current.lock().unwrap().cpus(), [0, 1, 2, 3]);
}

#[test]
fn test_lost_register_marks_value_missing() {
    let machine = create_machine(4);
    program_skylake(&machine.registers);
    let mut engine = CpuTelemetry::new(skylake_package(), &machine.platform);
    engine.update();

    machine.registers.values.lock().unwrap().remove(&(1, msr::IA32_THERM_STATUS));
    engine.update();

    let core2 = engine
        .sensor_set()
        .all()
        .iter()
        .find(|s| s.kind() == SensorKind::Temperature && s.name() == "Core #2")
        .map(|s| s.state());
    assert_eq!(core2, Some(SensorState::ValueMissing));
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core Max"), Some(55.0));
}

#[test]
fn test_config_overrides_and_load() {
    let dir = TempDir::new().unwrap();
    let config_file = dir.path().join("config.json");
    fs::write(
        &config_file,
        r#"{
            "update_interval_ms": 500,
            "parameters": [
                {"sensor": "intelcpu/0/temperature/1", "parameter": "TjMax [°C]", "value": 90.0},
                {"sensor": "intelcpu/9/temperature/0", "parameter": "TjMax [°C]", "value": 90.0}
            ]
        }"#,
    )
    .unwrap();
    let cfg = try_load_config(&config_file).unwrap();

    let stat = dir.path().join("stat");
    fs::write(
        &stat,
        "cpu  400 0 400 3200 0 0 0 0 0 0\n\
         cpu0 100 0 100 800 0 0 0 0 0 0\n\
         cpu1 100 0 100 800 0 0 0 0 0 0\n\
         cpu2 100 0 100 800 0 0 0 0 0 0\n\
         cpu3 100 0 100 800 0 0 0 0 0 0\n",
    )
    .unwrap();

    let mut machine = create_machine(4);
    machine.platform.proc_stat = Some(stat.clone());
    program_skylake(&machine.registers);
    let mut engine = CpuTelemetry::new(skylake_package(), &machine.platform);
    assert_eq!(engine.apply_parameter_overrides(&cfg.parameters), 1);

    engine.update();
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core #1"), Some(55.0));
    assert_eq!(reading(&engine, SensorKind::Temperature, "Core #2"), Some(52.0));

    fs::write(
        &stat,
        "cpu  800 0 800 5600 0 0 0 0 0 0\n\
         cpu0 200 0 200 1400 0 0 0 0 0 0\n\
         cpu1 200 0 200 1400 0 0 0 0 0 0\n\
         cpu2 200 0 200 1400 0 0 0 0 0 0\n\
         cpu3 200 0 200 1400 0 0 0 0 0 0\n",
    )
    .unwrap();
    machine.clock.advance(500_000_000);
    engine.update();

    let total = reading(&engine, SensorKind::Load, "CPU Total").unwrap();
    assert!((total - 25.0).abs() < 0.01, "total {}", total);
    let thread = reading(&engine, SensorKind::Load, "Core #2 Thread #2").unwrap();
    assert!((thread - 25.0).abs() < 0.01, "thread {}", thread);
}

#[test]
fn test_json_lines_from_service_loop() {
    let machine = create_machine(4);
    program_skylake(&machine.registers);
    let mut engines = vec![CpuTelemetry::new(skylake_package(), &machine.platform)];

    let mut out = Vec::new();
    service::run_service(&mut engines, Duration::from_millis(1), OutputFormat::Json, Some(2), &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(parsed[0]["hardware"], "intelcpu/0");
    assert_eq!(parsed[0]["name"], "Intel Core i7-6700K");
    let sensors = parsed[0]["sensors"].as_array().unwrap();
    assert!(sensors
        .iter()
        .any(|s| s["identifier"] == "intelcpu/0/temperature/0" && s["value"] == 55.0));
}

mockall::mock! {
    Channel {}
    impl RegisterAccess for Channel {
        fn read_msr(&self, cpu: Affinity, address: u32) -> Option<u64>;
        fn read_pci_config(&self, device: PciAddress, offset: u32) -> Option<u32>;
        fn read_indexed(&self, port: IndexPort, address: u32) -> Option<u32>;
    }
}

#[test]
fn test_unreadable_channel_leaves_only_counter_clock() {
    let mut channel = MockChannel::new();
    channel.expect_read_msr().returning(|_, _| None);
    channel.expect_read_pci_config().never();
    channel.expect_read_indexed().never();

    let mut machine = create_machine(4);
    machine.platform.registers = Arc::new(channel);
    let mut engine = CpuTelemetry::new(skylake_package(), &machine.platform);
    engine.update();
    engine.update();

    let visible: Vec<&str> = engine.sensors().iter().map(|s| s.name()).collect();
    assert_eq!(visible, ["Time Stamp Counter"]);
    assert!(engine.tsc_mhz().is_some());
    assert_eq!(engine.tsc_multiplier(), None);
}
