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

//! Per-package telemetry engine.
//!
//! A [`CpuTelemetry`] owns everything about one processor package: its decode
//! profile, calibration state, energy accumulators and sensors. Collaborators
//! that reach the hardware are shared through [`Platform`].
//!
//! Construction classifies the package, calibrates the time-stamp counter and
//! creates every sensor the profile allows. Sensors stay dormant until
//! [`CpuTelemetry::update`] first reads a value for them.

mod clocks;
mod power;
mod thermal;
mod voltage;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::access::{PciAddress, RegisterAccess};
use crate::affinity::{AffinityControl, AffinityGuard, CpuMask, ThreadAffinity};
use crate::buslock::BusLock;
use crate::calibrate::{
    estimate_frequency_on, CalibrationState, CycleCounter, MonotonicClock, TimeSource, TimeStampCounter,
};
use crate::catalog::{classify, DecodeProfile, Microarchitecture};
use crate::config::ParameterOverride;
use crate::load::{CpuLoad, PROC_STAT_PATH};
use crate::registers::pci;
use crate::sensor::{Sensor, SensorId, SensorKind, SensorSet};
use crate::topology::{Affinity, Package};

use clocks::Clocks;
use power::Power;
use thermal::Thermal;
use voltage::Voltages;

/// Shared collaborators of every engine in a process.
#[derive(Clone)]
pub struct Platform {
    pub registers: Arc<dyn RegisterAccess>,
    pub affinity: Arc<dyn AffinityControl>,
    pub clock: Arc<dyn TimeSource>,
    pub counter: Arc<dyn CycleCounter>,
    pub bus: Arc<BusLock>,
    /// Source of load samples; `None` disables load sensors.
    pub proc_stat: Option<PathBuf>,
    /// Performance-core cpus on hybrid parts.
    pub performance_cores: Option<CpuMask>,
}

impl Platform {
    /// Real thread affinity, monotonic clock and time-stamp counter.
    pub fn new(registers: Arc<dyn RegisterAccess>, bus: Arc<BusLock>) -> Self {
        Platform {
            registers,
            affinity: Arc::new(ThreadAffinity),
            clock: Arc::new(MonotonicClock::new()),
            counter: Arc::new(TimeStampCounter),
            bus,
            proc_stat: Some(PathBuf::from(PROC_STAT_PATH)),
            performance_cores: None,
        }
    }
}

/// Register reads on behalf of one package.
///
/// MSR reads pin the calling thread to the target processor for the duration
/// of the read. Side-band reads run under the shared bus lock.
pub(crate) struct RegisterReader {
    registers: Arc<dyn RegisterAccess>,
    affinity: Arc<dyn AffinityControl>,
    bus: Arc<BusLock>,
    cores: Vec<Affinity>,
}

impl RegisterReader {
    fn new(package: &Package, platform: &Platform) -> Self {
        RegisterReader {
            registers: Arc::clone(&platform.registers),
            affinity: Arc::clone(&platform.affinity),
            bus: Arc::clone(&platform.bus),
            cores: package
                .cores()
                .iter()
                .filter_map(|c| c.threads.first().map(|t| t.affinity))
                .collect(),
        }
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn msr(&self, cpu: Affinity, address: u32) -> Option<u64> {
        let _pinned = match AffinityGuard::pin(self.affinity.as_ref(), cpu) {
            Ok(guard) => guard,
            Err(e) => {
                trace!(%cpu, address, error = %e, "Cannot pin for register read");
                return None;
            }
        };
        self.registers.read_msr(cpu, address)
    }

    /// Reads an MSR on the first thread of core `core`.
    pub fn core_msr(&self, core: usize, address: u32) -> Option<u64> {
        self.msr(*self.cores.get(core)?, address)
    }

    pub fn package_msr(&self, address: u32) -> Option<u64> {
        self.core_msr(0, address)
    }

    /// Runs `read` while holding the side-band bus. A busy bus skips the read.
    pub fn sideband<T>(&self, read: impl FnOnce(&dyn RegisterAccess) -> Option<T>) -> Option<T> {
        let _bus = self.bus.acquire()?;
        read(self.registers.as_ref())
    }
}

/// The miscellaneous-control PCI function of an AMD package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MiscControl {
    address: PciAddress,
    device_id: u16,
}

impl MiscControl {
    pub fn new(package_index: usize, device_id: u16) -> Self {
        let device = pci::MISC_CONTROL_DEVICE_BASE.saturating_add(package_index as u8);
        MiscControl {
            address: PciAddress::new(0, device, pci::MISC_CONTROL_FUNCTION),
            device_id,
        }
    }

    /// Reads `offset` after checking the function is the expected device.
    /// Must be called under the bus lock.
    pub fn read(&self, registers: &dyn RegisterAccess, offset: u32) -> Option<u32> {
        let id = registers.read_pci_config(self.address, pci::DEVICE_VENDOR_ID)?;
        if (id & 0xFFFF) as u16 != pci::AMD_VENDOR_ID || (id >> 16) as u16 != self.device_id {
            trace!(device = %self.address, id, "Unexpected misc control device");
            return None;
        }
        registers.read_pci_config(self.address, offset)
    }
}

/// Display names of the cores of a package, in core order.
pub(crate) fn core_labels(
    package: &Package,
    microarchitecture: Microarchitecture,
    performance: Option<&CpuMask>,
) -> Vec<String> {
    if package.core_count() == 1 {
        return vec!["CPU Core".to_string()];
    }
    match performance.filter(|_| microarchitecture.has_hybrid_cores()) {
        Some(mask) => {
            let (mut p, mut e) = (0, 0);
            package
                .cores()
                .iter()
                .map(|core| {
                    let is_performance = core.threads.iter().any(|t| mask.contains(t.affinity.cpu()));
                    if is_performance {
                        p += 1;
                        format!("P-Core #{}", p)
                    } else {
                        e += 1;
                        format!("E-Core #{}", e)
                    }
                })
                .collect()
        }
        None => (1..=package.core_count()).map(|i| format!("Core #{}", i)).collect(),
    }
}

struct LoadSensors {
    sampler: CpuLoad,
    total: SensorId,
    max: Option<SensorId>,
    threads: Vec<(usize, SensorId)>,
}

impl LoadSensors {
    fn new(source: PathBuf, package: &Package, labels: &[String], sensors: &mut SensorSet) -> Self {
        let total = sensors.create("CPU Total", SensorKind::Load);
        let max = (package.core_count() > 1).then(|| sensors.create("CPU Core Max", SensorKind::Load));
        let mut threads = Vec::with_capacity(package.thread_count());
        for (core, label) in package.cores().iter().zip(labels) {
            for thread in &core.threads {
                let name = if core.threads.len() > 1 {
                    format!("{} Thread #{}", label, thread.thread + 1)
                } else {
                    label.clone()
                };
                threads.push((thread.affinity.cpu(), sensors.create(name, SensorKind::Load)));
            }
        }
        LoadSensors { sampler: CpuLoad::new(source), total, max, threads }
    }

    fn update(&mut self, sensors: &mut SensorSet) {
        let available = self.sampler.update();
        sensors.set_value(self.total, self.sampler.total().filter(|_| available));
        for &(cpu, id) in &self.threads {
            sensors.set_value(id, self.sampler.thread(cpu).filter(|_| available));
        }
        let ids: Vec<SensorId> = self.threads.iter().map(|&(_, id)| id).collect();
        sensors.update_derived(self.max, None, &ids);
    }
}

/// Serializable view of one engine.
#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub hardware: String,
    pub name: String,
    pub microarchitecture: Microarchitecture,
    pub tsc_mhz: Option<f64>,
    pub sensors: Vec<Sensor>,
}

/// Telemetry of one processor package.
pub struct CpuTelemetry {
    package: Package,
    profile: DecodeProfile,
    clock: Arc<dyn TimeSource>,
    counter: Arc<dyn CycleCounter>,
    reader: RegisterReader,
    sensors: SensorSet,
    calibration: CalibrationState,
    tsc_multiplier: Option<f64>,
    load: Option<LoadSensors>,
    thermal: Thermal,
    clocks: Clocks,
    voltages: Voltages,
    power: Power,
}

impl CpuTelemetry {
    pub fn new(package: Package, platform: &Platform) -> Self {
        let identity = package.first_thread().clone();
        let profile = classify(&identity, package.core_count());
        let reader = RegisterReader::new(&package, platform);

        let estimate = if identity.capabilities.time_stamp_counter {
            estimate_frequency_on(
                platform.affinity.as_ref(),
                identity.affinity,
                platform.clock.as_ref(),
                platform.counter.as_ref(),
            )
        } else {
            None
        };
        let calibration = CalibrationState::seeded(estimate);

        let labels = core_labels(&package, profile.microarchitecture, platform.performance_cores.as_ref());
        let mut sensors = SensorSet::new(format!("{}/{}", profile.hardware_kind(), package.index()));

        let load = platform
            .proc_stat
            .clone()
            .map(|source| LoadSensors::new(source, &package, &labels, &mut sensors));
        let thermal = Thermal::new(&profile, package.index(), &reader, &labels, &mut sensors);
        let clocks = Clocks::new(&profile, package.index(), &labels, &mut sensors);
        let tsc_multiplier = clocks.tsc_multiplier(&reader);
        let voltages = Voltages::new(&profile, &labels, &mut sensors);
        let power = Power::new(&profile, &reader, &labels, &mut sensors);

        info!(
            package = package.index(),
            name = %identity.name(),
            microarchitecture = %profile.microarchitecture,
            cores = package.core_count(),
            threads = package.thread_count(),
            tsc_mhz = calibration.frequency_mhz(),
            "Processor package initialized"
        );
        debug!(package = package.index(), tsc_multiplier = ?tsc_multiplier, "Resolved clock multipliers");

        CpuTelemetry {
            package,
            profile,
            clock: Arc::clone(&platform.clock),
            counter: Arc::clone(&platform.counter),
            reader,
            sensors,
            calibration,
            tsc_multiplier,
            load,
            thermal,
            clocks,
            voltages,
            power,
        }
    }

    pub fn name(&self) -> String {
        self.package.first_thread().name()
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn profile(&self) -> &DecodeProfile {
        &self.profile
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn tsc_multiplier(&self) -> Option<f64> {
        self.tsc_multiplier
    }

    /// Calibrated time-stamp counter frequency, if there is one.
    pub fn tsc_mhz(&self) -> Option<f64> {
        let f = self.calibration.frequency_mhz();
        (f.is_finite() && f > 0.0).then_some(f)
    }

    /// Visible sensors in kind/index order.
    pub fn sensors(&self) -> Vec<&Sensor> {
        self.sensors.sensors()
    }

    pub fn sensor_set(&self) -> &SensorSet {
        &self.sensors
    }

    /// Overrides a calibration parameter of a sensor. `None` restores the default.
    pub fn set_parameter(&mut self, id: SensorId, index: usize, value: Option<f32>) -> bool {
        self.sensors.set_parameter(id, index, value)
    }

    /// Applies configured overrides addressed to this package's sensors.
    /// Returns how many matched.
    pub fn apply_parameter_overrides(&mut self, overrides: &[ParameterOverride]) -> usize {
        let mut applied = 0;
        for o in overrides {
            if self.sensors.set_parameter_by_name(&o.sensor, &o.parameter, Some(o.value)) {
                debug!(sensor = %o.sensor, parameter = %o.parameter, value = o.value, "Applied parameter override");
                applied += 1;
            }
        }
        applied
    }

    /// Refreshes every sensor. Failed reads leave the affected sensors
    /// without a value; nothing here fails.
    pub fn update(&mut self) {
        if self.package.first_thread().capabilities.invariant_tsc {
            self.refresh_calibration();
        }
        if let Some(load) = self.load.as_mut() {
            load.update(&mut self.sensors);
        }
        self.thermal.update(&self.reader, &mut self.sensors);
        let tsc_mhz = self.tsc_mhz();
        self.clocks.update(&self.reader, &mut self.sensors, tsc_mhz, self.tsc_multiplier);
        self.voltages.update(&self.reader, &mut self.sensors);
        self.power.update(&self.reader, &mut self.sensors, self.clock.as_ref());
    }

    fn refresh_calibration(&mut self) {
        let cpu = self.package.first_thread().affinity;
        let _pinned = match AffinityGuard::pin(self.reader.affinity.as_ref(), cpu) {
            Ok(guard) => guard,
            Err(e) => {
                trace!(%cpu, error = %e, "Cannot pin for counter refresh");
                return;
            }
        };
        if self.calibration.refresh(self.clock.as_ref(), self.counter.as_ref()) {
            trace!(tsc_mhz = self.calibration.frequency_mhz(), "Refreshed counter frequency");
        }
    }

    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            hardware: self.sensors.hardware().to_string(),
            name: self.name(),
            microarchitecture: self.profile.microarchitecture,
            tsc_mhz: self.tsc_mhz(),
            sensors: self.sensors.sensors().into_iter().cloned().collect(),
        }
    }

    /// Human-readable dump of the identity, calibration and the profile's
    /// registers on every core.
    pub fn report(&self) -> String {
        let identity = self.package.first_thread();
        let mut r = String::new();
        let _ = writeln!(r, "Processor: {}", identity.name());
        let _ = writeln!(r, "Hardware: {}", self.sensors.hardware());
        let _ = writeln!(
            r,
            "Vendor: {:?}  Family: 0x{:X}  Model: 0x{:X}  Stepping: 0x{:X}",
            identity.vendor, identity.family, identity.model, identity.stepping
        );
        let _ = writeln!(r, "Microarchitecture: {}", self.profile.microarchitecture);
        let _ = writeln!(
            r,
            "Cores: {}  Threads: {}",
            self.package.core_count(),
            self.package.thread_count()
        );
        match self.calibration.estimate() {
            Some(e) => {
                let _ = writeln!(r, "Time Stamp Counter: {:.2} MHz (error {:.2e})", e.frequency_mhz, e.error);
            }
            None => {
                let _ = writeln!(r, "Time Stamp Counter: not calibrated");
            }
        }
        if let Some(m) = self.tsc_multiplier {
            let _ = writeln!(r, "Time Stamp Counter Multiplier: {:.2}", m);
        }

        let registers = self.profile.report_registers();
        if !registers.is_empty() {
            let _ = writeln!(r, "\nModel Specific Registers:");
            for (core, cpu) in self.reader.cores.iter().enumerate() {
                let _ = writeln!(r, " Core {} ({})", core, cpu);
                for &address in registers {
                    match self.reader.msr(*cpu, address) {
                        Some(v) => {
                            let _ = writeln!(r, "  {:08X}  {:016X}", address, v);
                        }
                        None => {
                            let _ = writeln!(r, "  {:08X}  <unavailable>", address);
                        }
                    }
                }
            }
        }
        r
    }
}
