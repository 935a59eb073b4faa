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

//! Clock and multiplier sensors.

use super::{MiscControl, RegisterReader};
use crate::catalog::{ClockLayout, DecodeProfile, ThermalLayout};
use crate::decode::MultiplierFormula;
use crate::registers::{msr, pci};
use crate::sensor::{SensorId, SensorKind, SensorSet};

/// Zen core clock reference in MHz when the bus clock is unknown.
const ZEN_REFERENCE_CLOCK: f64 = 100.0;

const K8_CURRENT_FID: MultiplierFormula = MultiplierFormula::AmdK8 { shift: 0 };
const K8_MAX_FID: MultiplierFormula = MultiplierFormula::AmdK8 { shift: 16 };

pub(super) struct Clocks {
    layout: ClockLayout,
    /// Family 14h keeps the main PLL frequency id in PCI space.
    misc: Option<MiscControl>,
    tsc: SensorId,
    bus: Option<SensorId>,
    cores: Vec<SensorId>,
    multipliers: Vec<SensorId>,
}

impl Clocks {
    pub fn new(profile: &DecodeProfile, package_index: usize, labels: &[String], sensors: &mut SensorSet) -> Self {
        let layout = profile.clocks;
        let tsc = sensors.create("Time Stamp Counter", SensorKind::Clock);
        if layout == ClockLayout::None {
            return Clocks { layout, misc: None, tsc, bus: None, cores: Vec::new(), multipliers: Vec::new() };
        }

        let misc = match (layout, profile.thermal) {
            (
                ClockLayout::AmdCofVid { core: MultiplierFormula::AmdBobcat },
                ThermalLayout::AmdReported { device_id, .. },
            ) => Some(MiscControl::new(package_index, device_id)),
            _ => None,
        };
        let bus = Some(sensors.create("Bus Speed", SensorKind::Clock));
        let cores = labels.iter().map(|l| sensors.create(l.clone(), SensorKind::Clock)).collect();
        let multipliers = if layout == ClockLayout::Zen {
            labels.iter().map(|l| sensors.create(l.clone(), SensorKind::Factor)).collect()
        } else {
            Vec::new()
        };

        Clocks { layout, misc, tsc, bus, cores, multipliers }
    }

    /// Raw COFVID-style register of `core`. On family 14h the main PLL
    /// frequency id is folded into the upper half.
    fn cofvid(&self, reader: &RegisterReader, core: usize, address: u32, formula: MultiplierFormula) -> Option<u64> {
        let raw = reader.core_msr(core, address)?;
        if formula != MultiplierFormula::AmdBobcat {
            return Some(raw);
        }
        let misc = self.misc?;
        let pll = reader.sideband(|regs| misc.read(regs, pci::CLOCK_POWER_TIMING_CONTROL_2))?;
        Some((raw & 0xFFFF_FFFF) | ((pll as u64) << 32))
    }

    /// Ratio between the time-stamp counter and the bus clock.
    pub fn tsc_multiplier(&self, reader: &RegisterReader) -> Option<f64> {
        match self.layout {
            ClockLayout::Intel { tsc_ratio, .. } => reader
                .package_msr(tsc_ratio.address)
                .and_then(|raw| tsc_ratio.formula.multiplier(raw)),
            ClockLayout::AmdCofVid { core } => self
                .cofvid(reader, 0, msr::PSTATE_0, core)
                .and_then(|raw| core.multiplier(raw)),
            ClockLayout::Zen => reader
                .package_msr(msr::PSTATE_0)
                .and_then(|raw| MultiplierFormula::AmdZen.multiplier(raw)),
            ClockLayout::AmdK8 | ClockLayout::None => None,
        }
    }

    pub fn update(
        &mut self,
        reader: &RegisterReader,
        sensors: &mut SensorSet,
        tsc_mhz: Option<f64>,
        tsc_multiplier: Option<f64>,
    ) {
        sensors.set_value(self.tsc, tsc_mhz.map(|f| f as f32));
        let bus_mhz = tsc_mhz.zip(tsc_multiplier).map(|(f, m)| f / m);

        match self.layout {
            ClockLayout::None => {}
            ClockLayout::Intel { core, .. } => {
                self.set_bus(sensors, bus_mhz);
                for (i, &id) in self.cores.iter().enumerate() {
                    let clock = reader
                        .core_msr(i, msr::IA32_PERF_STATUS)
                        .and_then(|raw| core.multiplier(raw))
                        .zip(bus_mhz)
                        .map(|(m, bus)| m * bus);
                    sensors.set_value(id, clock.map(|c| c as f32));
                }
            }
            ClockLayout::AmdK8 => {
                let mut bus = None;
                for (i, &id) in self.cores.iter().enumerate() {
                    let raw = reader.core_msr(i, msr::FIDVID_STATUS);
                    let current = raw.and_then(|r| K8_CURRENT_FID.multiplier(r));
                    let max = raw.and_then(|r| K8_MAX_FID.multiplier(r));
                    if i == 0 {
                        bus = tsc_mhz.zip(max).map(|(f, m)| f / m);
                    }
                    let clock = match (tsc_mhz, current, max) {
                        (Some(f), Some(c), Some(m)) => Some(c * f / m),
                        _ => None,
                    };
                    sensors.set_value(id, clock.map(|c| c as f32));
                }
                self.set_bus(sensors, bus);
            }
            ClockLayout::AmdCofVid { core } => {
                self.set_bus(sensors, bus_mhz);
                for (i, &id) in self.cores.iter().enumerate() {
                    let clock = self
                        .cofvid(reader, i, msr::COFVID_STATUS, core)
                        .and_then(|raw| core.multiplier(raw))
                        .zip(bus_mhz)
                        .map(|(m, bus)| m * bus);
                    sensors.set_value(id, clock.map(|c| c as f32));
                }
            }
            ClockLayout::Zen => {
                self.set_bus(sensors, bus_mhz);
                for (i, &id) in self.cores.iter().enumerate() {
                    let multiplier = reader
                        .core_msr(i, msr::HW_PSTATE_STATUS)
                        .and_then(|raw| MultiplierFormula::AmdZen.multiplier(raw));
                    let clock = multiplier
                        .zip(bus_mhz)
                        .map(|(m, bus)| m * bus)
                        .or(multiplier.map(|m| m * ZEN_REFERENCE_CLOCK));
                    sensors.set_value(id, clock.map(|c| c as f32));
                    if let Some(&factor) = self.multipliers.get(i) {
                        sensors.set_value(factor, multiplier.map(|m| m as f32));
                    }
                }
            }
        }
    }

    fn set_bus(&self, sensors: &mut SensorSet, bus_mhz: Option<f64>) {
        if let Some(id) = self.bus {
            sensors.set_value(id, bus_mhz.map(|b| b as f32));
        }
    }
}
