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

//! Temperature sensors.

use tracing::debug;

use super::{MiscControl, RegisterReader};
use crate::access::IndexPort;
use crate::catalog::{CcdLayout, DecodeProfile, ThermalLayout, TjMaxSource, DEFAULT_TJMAX};
use crate::decode::{
    BitField, Conversion, FieldSpec, Validity, INTEL_DTS_DISTANCE, INTEL_DTS_TEMPERATURE, INTEL_TEMPERATURE_TARGET,
};
use crate::registers::{msr, pci, smn, smu};
use crate::sensor::{Parameter, SensorId, SensorKind, SensorSet};

/// K8 thermtrip reading, before the model offset.
const K8_THERMTRIP: FieldSpec = FieldSpec::new(BitField::new(16, 8), Validity::Always, Conversion::IDENTITY);

const K10_REPORTED_TEMPERATURE: FieldSpec = FieldSpec::new(
    BitField::new(21, 11),
    Validity::Always,
    Conversion::Linear { scale: 0.125, bias: 0.0 },
);

/// Family 15h model 00h-0Fh in the range-selected encoding: the two lowest
/// bits are not meaningful.
const K10_REPORTED_TEMPERATURE_COARSE: FieldSpec = FieldSpec::new(
    BitField::new(23, 9),
    Validity::Always,
    Conversion::Linear { scale: 0.5, bias: 0.0 },
);

const K10_RANGE_SELECT: u32 = 0x3_0000;

const ZEN_TCTL: FieldSpec = FieldSpec::new(
    BitField::new(21, 11),
    Validity::Always,
    Conversion::Linear { scale: 0.125, bias: 0.0 },
);

const ZEN_TCTL_RANGE_FLAG: u32 = 1 << 19;

const ZEN_CCD_TEMPERATURE: FieldSpec = FieldSpec::new(
    BitField::new(0, 12),
    Validity::NonZero,
    Conversion::Linear { scale: 0.125, bias: -305.0 },
);

/// CCD readings at or above this are not real.
const ZEN_CCD_LIMIT: f64 = 125.0;

const RANGE_SELECT_OFFSET: f64 = -49.0;

fn offset_parameter(default: f64) -> Vec<Parameter> {
    vec![Parameter::new(
        "Offset [°C]",
        "Temperature offset of the thermal sensor.\nTemperature = Value + Offset.",
        default as f32,
    )]
}

fn tjmax_parameters(tjmax: f64) -> Vec<Parameter> {
    vec![
        Parameter::new(
            "TjMax [°C]",
            "TjMax temperature of the core sensor.\nTemperature = TjMax - TSlope * Value.",
            tjmax as f32,
        ),
        Parameter::new(
            "TSlope [°C]",
            "Temperature slope of the digital thermal sensor.\nTemperature = TjMax - TSlope * Value.",
            1.0,
        ),
    ]
}

pub(super) enum Thermal {
    None,
    Intel(IntelThermal),
    K8(K8Thermal),
    K10(K10Thermal),
    Zen(ZenThermal),
}

impl Thermal {
    pub fn new(
        profile: &DecodeProfile,
        package_index: usize,
        reader: &RegisterReader,
        labels: &[String],
        sensors: &mut SensorSet,
    ) -> Self {
        match profile.thermal {
            ThermalLayout::None => Thermal::None,
            ThermalLayout::IntelDts { tjmax, per_core, package } => {
                Thermal::Intel(IntelThermal::new(tjmax, per_core, package, reader, labels, sensors))
            }
            ThermalLayout::AmdThermtrip { device_id, offset } => Thermal::K8(K8Thermal {
                misc: MiscControl::new(package_index, device_id),
                sensor: sensors.create_with_parameters("CPU Cores", SensorKind::Temperature, offset_parameter(offset)),
            }),
            ThermalLayout::AmdReported { device_id, via_smu, range_select, coarse } => Thermal::K10(K10Thermal {
                misc: MiscControl::new(package_index, device_id),
                via_smu,
                range_select,
                coarse,
                sensor: sensors.create_with_parameters("CPU Cores", SensorKind::Temperature, offset_parameter(0.0)),
            }),
            ThermalLayout::Zen { tdie_offset, ccd } => Thermal::Zen(ZenThermal::new(tdie_offset, ccd, sensors)),
        }
    }

    pub fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        match self {
            Thermal::None => {}
            Thermal::Intel(t) => t.update(reader, sensors),
            Thermal::K8(t) => t.update(reader, sensors),
            Thermal::K10(t) => t.update(reader, sensors),
            Thermal::Zen(t) => t.update(reader, sensors),
        }
    }
}

pub(super) struct IntelThermal {
    cores: Vec<SensorId>,
    distances: Vec<SensorId>,
    package: Option<SensorId>,
    core_max: Option<SensorId>,
    core_average: Option<SensorId>,
}

impl IntelThermal {
    fn new(
        tjmax: TjMaxSource,
        per_core: bool,
        package: bool,
        reader: &RegisterReader,
        labels: &[String],
        sensors: &mut SensorSet,
    ) -> Self {
        let targets: Vec<f64> = (0..reader.core_count())
            .map(|core| match tjmax {
                TjMaxSource::Fixed(t) => t,
                TjMaxSource::Register { fallback } => reader
                    .core_msr(core, msr::IA32_TEMPERATURE_TARGET)
                    .and_then(|raw| INTEL_TEMPERATURE_TARGET.decode(raw))
                    .unwrap_or(fallback),
                TjMaxSource::Table(_) => DEFAULT_TJMAX,
            })
            .collect();
        debug!(?targets, "Resolved TjMax");

        let cores: Vec<SensorId> = if per_core {
            labels
                .iter()
                .zip(&targets)
                .map(|(label, &t)| {
                    sensors.create_with_parameters(label.clone(), SensorKind::Temperature, tjmax_parameters(t))
                })
                .collect()
        } else {
            Vec::new()
        };
        let package = package.then(|| {
            let t = targets.first().copied().unwrap_or(DEFAULT_TJMAX);
            sensors.create_with_parameters("CPU Package", SensorKind::Temperature, tjmax_parameters(t))
        });
        let (core_max, core_average) = if package.is_some() && cores.len() > 1 {
            (
                Some(sensors.create("Core Max", SensorKind::Temperature)),
                Some(sensors.create("Core Average", SensorKind::Temperature)),
            )
        } else {
            (None, None)
        };
        let distances = if per_core {
            labels
                .iter()
                .map(|label| sensors.create(format!("{} Distance to TjMax", label), SensorKind::Temperature))
                .collect()
        } else {
            Vec::new()
        };

        IntelThermal { cores, distances, package, core_max, core_average }
    }

    fn dts(sensors: &SensorSet, id: SensorId, raw: Option<u64>) -> Option<f32> {
        let target = sensors.parameter(id, 0)? as f64;
        let slope = sensors.parameter(id, 1)? as f64;
        let spec = INTEL_DTS_TEMPERATURE.with_target(target, slope);
        raw.and_then(|r| spec.decode(r)).map(|t| t as f32)
    }

    fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        for (core, &id) in self.cores.iter().enumerate() {
            let raw = reader.core_msr(core, msr::IA32_THERM_STATUS);
            let value = Self::dts(sensors, id, raw);
            sensors.set_value(id, value);
            if let Some(&distance) = self.distances.get(core) {
                let delta = raw.and_then(|r| INTEL_DTS_DISTANCE.decode(r)).map(|d| d as f32);
                sensors.set_value(distance, delta);
            }
        }

        if let Some(id) = self.package {
            let raw = reader.package_msr(msr::IA32_PACKAGE_THERM_STATUS);
            let value = Self::dts(sensors, id, raw);
            sensors.set_value(id, value);
        }

        sensors.update_derived(self.core_max, self.core_average, &self.cores);
    }
}

pub(super) struct K8Thermal {
    misc: MiscControl,
    sensor: SensorId,
}

impl K8Thermal {
    fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        let misc = self.misc;
        let raw = reader.sideband(|regs| misc.read(regs, pci::THERMTRIP_STATUS));
        let offset = sensors.parameter(self.sensor, 0).unwrap_or(0.0);
        let value = raw.and_then(|r| K8_THERMTRIP.decode(r as u64)).map(|t| t as f32 + offset);
        sensors.set_value(self.sensor, value);
    }
}

pub(super) struct K10Thermal {
    misc: MiscControl,
    via_smu: bool,
    range_select: bool,
    coarse: bool,
    sensor: SensorId,
}

impl K10Thermal {
    fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        let misc = self.misc;
        let raw = if self.via_smu {
            reader.sideband(|regs| regs.read_indexed(IndexPort::SMU, smu::REPORTED_TEMPERATURE))
        } else {
            reader.sideband(|regs| misc.read(regs, pci::REPORTED_TEMPERATURE_CONTROL))
        };
        let offset = sensors.parameter(self.sensor, 0).unwrap_or(0.0) as f64;
        let value = raw.and_then(|r| {
            let selected = self.range_select && r & K10_RANGE_SELECT == K10_RANGE_SELECT;
            let t = match (selected, self.coarse) {
                (true, true) => K10_REPORTED_TEMPERATURE_COARSE.decode(r as u64)?,
                _ => K10_REPORTED_TEMPERATURE.decode(r as u64)?,
            };
            let range = if selected { RANGE_SELECT_OFFSET } else { 0.0 };
            Some((t + range + offset) as f32)
        });
        sensors.set_value(self.sensor, value);
    }
}

pub(super) struct ZenThermal {
    tdie_offset: f64,
    tctl: SensorId,
    tdie: Option<SensorId>,
    ccd_base: u32,
    ccds: Vec<SensorId>,
    ccd_max: Option<SensorId>,
    ccd_average: Option<SensorId>,
}

impl ZenThermal {
    fn new(tdie_offset: f64, ccd: Option<CcdLayout>, sensors: &mut SensorSet) -> Self {
        let (tctl, tdie) = if tdie_offset < 0.0 {
            (
                sensors.create("Core (Tctl)", SensorKind::Temperature),
                Some(sensors.create("Core (Tdie)", SensorKind::Temperature)),
            )
        } else {
            (sensors.create("Core (Tctl/Tdie)", SensorKind::Temperature), None)
        };

        let layout = ccd.unwrap_or(CcdLayout { base: 0, count: 0 });
        let ccds: Vec<SensorId> = (0..layout.count)
            .map(|i| sensors.create(format!("CCD{} (Tdie)", i + 1), SensorKind::Temperature))
            .collect();
        let (ccd_max, ccd_average) = if ccds.len() > 1 {
            (
                Some(sensors.create("CCDs Max (Tdie)", SensorKind::Temperature)),
                Some(sensors.create("CCDs Average (Tdie)", SensorKind::Temperature)),
            )
        } else {
            (None, None)
        };

        ZenThermal { tdie_offset, tctl, tdie, ccd_base: layout.base, ccds, ccd_max, ccd_average }
    }

    fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet) {
        let (base, count) = (self.ccd_base, self.ccds.len() as u32);
        let readings = reader.sideband(|regs| {
            let tctl = regs.read_indexed(IndexPort::SMN, smn::THM_TCON_CUR_TMP);
            let ccds: Vec<Option<u32>> = (0..count)
                .map(|i| regs.read_indexed(IndexPort::SMN, base + 4 * i))
                .collect();
            Some((tctl, ccds))
        });
        let (raw_tctl, raw_ccds) = readings.unwrap_or_else(|| (None, vec![None; count as usize]));

        let tctl = raw_tctl.and_then(|r| {
            let t = ZEN_TCTL.decode(r as u64)?;
            let range = if r & ZEN_TCTL_RANGE_FLAG != 0 { RANGE_SELECT_OFFSET } else { 0.0 };
            Some(t + range)
        });
        sensors.set_value(self.tctl, tctl.map(|t| t as f32));
        if let Some(id) = self.tdie {
            sensors.set_value(id, tctl.map(|t| (t + self.tdie_offset) as f32));
        }

        let mut active = 0;
        for (&id, raw) in self.ccds.iter().zip(raw_ccds) {
            let t = raw
                .and_then(|r| ZEN_CCD_TEMPERATURE.decode(r as u64))
                .filter(|&t| t < ZEN_CCD_LIMIT);
            if t.is_some() {
                active += 1;
            }
            sensors.set_value(id, t.map(|t| t as f32));
        }
        if active > 1 {
            sensors.update_derived(self.ccd_max, self.ccd_average, &self.ccds);
        } else {
            sensors.update_derived(self.ccd_max, self.ccd_average, &[]);
        }
    }
}
