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

//! Voltage sensors.

use super::RegisterReader;
use crate::access::IndexPort;
use crate::catalog::{DecodeProfile, SviLayout, VoltageLayout};
use crate::decode::{BitField, VidEncoding, INTEL_CORE_VOLTAGE};
use crate::registers::{msr, smn};
use crate::sensor::{SensorId, SensorKind, SensorSet};

const COFVID_CORE_VID: BitField = BitField::new(9, 7);
/// Bit 7 of the SVI2 core VID, stored apart from the low seven bits.
const COFVID_CORE_VID_HIGH: BitField = BitField::new(20, 1);
const COFVID_NB_VID_SVI1: BitField = BitField::new(25, 7);
const COFVID_NB_VID_SVI2: BitField = BitField::new(24, 8);

const SVI_PLANE_VID: BitField = BitField::new(16, 8);
const SVI_TFN_CORE_ABSENT: u32 = 1 << 0;
const SVI_TFN_SOC_ABSENT: u32 = 1 << 1;

const HW_PSTATE_VID: BitField = BitField::new(14, 8);

pub(super) struct Voltages {
    layout: VoltageLayout,
    core: Option<SensorId>,
    /// Northbridge (K10) or SoC (Zen) rail.
    uncore: Option<SensorId>,
    cores: Vec<SensorId>,
}

impl Voltages {
    pub fn new(profile: &DecodeProfile, labels: &[String], sensors: &mut SensorSet) -> Self {
        let layout = profile.voltage;
        let per_core = |sensors: &mut SensorSet| -> Vec<SensorId> {
            labels
                .iter()
                .map(|l| sensors.create(format!("{} VID", l), SensorKind::Voltage))
                .collect()
        };
        let (core, uncore, cores) = match layout {
            VoltageLayout::None => (None, None, Vec::new()),
            VoltageLayout::IntelVid => {
                let core = sensors.create("CPU Core", SensorKind::Voltage);
                (Some(core), None, per_core(sensors))
            }
            VoltageLayout::AmdCofVid(_) => (
                Some(sensors.create("CPU Cores", SensorKind::Voltage)),
                Some(sensors.create("Northbridge", SensorKind::Voltage)),
                Vec::new(),
            ),
            VoltageLayout::ZenSvi(svi) => {
                let (core, soc) = match svi {
                    Some(_) => (
                        Some(sensors.create("Core (SVI2 TFN)", SensorKind::Voltage)),
                        Some(sensors.create("SoC (SVI2 TFN)", SensorKind::Voltage)),
                    ),
                    None => (None, None),
                };
                (core, soc, per_core(sensors))
            }
        };
        Voltages { layout, core, uncore, cores }
    }

    pub fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        match self.layout {
            VoltageLayout::None => {}
            VoltageLayout::IntelVid => self.update_intel(reader, sensors),
            VoltageLayout::AmdCofVid(encoding) => self.update_cofvid(reader, sensors, encoding),
            VoltageLayout::ZenSvi(svi) => self.update_zen(reader, sensors, svi),
        }
    }

    fn update_intel(&self, reader: &RegisterReader, sensors: &mut SensorSet) {
        let volts = |core: usize| {
            reader
                .core_msr(core, msr::IA32_PERF_STATUS)
                .and_then(|raw| INTEL_CORE_VOLTAGE.decode(raw))
                .map(|v| v as f32)
        };
        let mut package = None;
        for (i, &id) in self.cores.iter().enumerate() {
            let v = volts(i);
            if i == 0 {
                package = v;
            }
            sensors.set_value(id, v);
        }
        if let Some(id) = self.core {
            if self.cores.is_empty() {
                package = volts(0);
            }
            sensors.set_value(id, package);
        }
    }

    fn update_cofvid(&self, reader: &RegisterReader, sensors: &mut SensorSet, encoding: VidEncoding) {
        let mut core_max: Option<f64> = None;
        let mut northbridge = None;
        for core in 0..reader.core_count() {
            let Some(raw) = reader.core_msr(core, msr::COFVID_STATUS) else { continue };
            let (core_vid, nb_vid) = match encoding {
                VidEncoding::Svi1 => (COFVID_CORE_VID.extract(raw), COFVID_NB_VID_SVI1.extract(raw)),
                VidEncoding::Svi2 => (
                    COFVID_CORE_VID.extract(raw) | (COFVID_CORE_VID_HIGH.extract(raw) << 7),
                    COFVID_NB_VID_SVI2.extract(raw),
                ),
            };
            if let Some(v) = encoding.volts(core_vid) {
                core_max = Some(core_max.map_or(v, |m| m.max(v)));
            }
            if northbridge.is_none() {
                northbridge = encoding.volts(nb_vid);
            }
        }
        if let Some(id) = self.core {
            sensors.set_value(id, core_max.map(|v| v as f32));
        }
        if let Some(id) = self.uncore {
            sensors.set_value(id, northbridge.map(|v| v as f32));
        }
    }

    fn update_zen(&self, reader: &RegisterReader, sensors: &mut SensorSet, svi: Option<SviLayout>) {
        if let Some(layout) = svi {
            let planes = reader.sideband(|regs| {
                let mut tfn = regs.read_indexed(IndexPort::SMN, smn::SVI_TELEMETRY_BASE + smn::SVI_TFN_OFFSET)?;
                if layout.telemetry_absent {
                    tfn |= SVI_TFN_CORE_ABSENT | SVI_TFN_SOC_ABSENT;
                }
                let core = if tfn & SVI_TFN_CORE_ABSENT == 0 {
                    regs.read_indexed(IndexPort::SMN, smn::SVI_TELEMETRY_BASE + layout.core_plane)
                } else {
                    None
                };
                let soc = if layout.soc_always_present || tfn & SVI_TFN_SOC_ABSENT == 0 {
                    regs.read_indexed(IndexPort::SMN, smn::SVI_TELEMETRY_BASE + layout.soc_plane)
                } else {
                    None
                };
                Some((core, soc))
            });
            let (core, soc) = planes.unwrap_or((None, None));
            let volts = |plane: Option<u32>| {
                plane
                    .and_then(|raw| VidEncoding::Svi2.volts(SVI_PLANE_VID.extract(raw as u64)))
                    .map(|v| v as f32)
            };
            if let Some(id) = self.core {
                sensors.set_value(id, volts(core));
            }
            if let Some(id) = self.uncore {
                sensors.set_value(id, volts(soc));
            }
        }

        for (i, &id) in self.cores.iter().enumerate() {
            let vid = reader
                .core_msr(i, msr::HW_PSTATE_STATUS)
                .and_then(|raw| VidEncoding::Svi2.volts(HW_PSTATE_VID.extract(raw)));
            sensors.set_value(id, vid.map(|v| v as f32));
        }
    }
}
