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

//! Power sensors backed by energy counters.

use tracing::debug;

use super::RegisterReader;
use crate::calibrate::TimeSource;
use crate::catalog::{DecodeProfile, EnergyLayout, RaplUnit};
use crate::decode::ENERGY_STATUS_UNIT;
use crate::energy::EnergyAccumulator;
use crate::registers::msr;
use crate::sensor::{SensorId, SensorKind, SensorSet};

struct EnergyChannel {
    sensor: SensorId,
    core: usize,
    address: u32,
    accumulator: EnergyAccumulator,
}

pub(super) struct Power {
    channels: Vec<EnergyChannel>,
}

impl Power {
    pub fn new(profile: &DecodeProfile, reader: &RegisterReader, labels: &[String], sensors: &mut SensorSet) -> Self {
        let (unit_register, unit) = match profile.energy {
            EnergyLayout::None => return Power { channels: Vec::new() },
            EnergyLayout::IntelRapl { unit, .. } => (msr::MSR_RAPL_POWER_UNIT, unit),
            EnergyLayout::Zen => (msr::PWR_UNIT, RaplUnit::PowerOfHalf),
        };
        let Some(raw) = reader.package_msr(unit_register) else {
            debug!(register = unit_register, "Energy unit unavailable, no power sensors");
            return Power { channels: Vec::new() };
        };
        let joules = unit.joules(ENERGY_STATUS_UNIT.extract(raw));

        let mut channel = |name: String, core: usize, address: u32| EnergyChannel {
            sensor: sensors.create(name, SensorKind::Power),
            core,
            address,
            accumulator: EnergyAccumulator::new(joules),
        };
        let channels = match profile.energy {
            EnergyLayout::IntelRapl { domains, .. } => domains
                .iter()
                .map(|d| channel(d.name.to_string(), 0, d.address))
                .collect(),
            EnergyLayout::Zen => {
                let mut channels = vec![channel("Package".to_string(), 0, msr::PKG_ENERGY_STATUS)];
                channels.extend(
                    labels
                        .iter()
                        .enumerate()
                        .map(|(i, l)| channel(format!("{} (SMU)", l), i, msr::CORE_ENERGY_STATUS)),
                );
                channels
            }
            EnergyLayout::None => Vec::new(),
        };
        debug!(joules_per_count = joules, channels = channels.len(), "Energy counters configured");
        Power { channels }
    }

    /// A failed read clears the sensor. A sample the accumulator rejects
    /// leaves the previous value in place.
    pub fn update(&mut self, reader: &RegisterReader, sensors: &mut SensorSet, clock: &dyn TimeSource) {
        for ch in &mut self.channels {
            let Some(raw) = reader.core_msr(ch.core, ch.address) else {
                sensors.set_value(ch.sensor, None);
                continue;
            };
            let now = clock.seconds();
            if let Some(watts) = ch.accumulator.sample(raw as u32, now) {
                sensors.set_value(ch.sensor, Some(watts as f32));
            }
        }
    }
}
