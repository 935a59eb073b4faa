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

//! Named sensors and their lifecycle.
//!
//! A sensor is created for every feature a package might have, but stays
//! [`SensorState::Dormant`] (invisible) until its first successful reading.
//! After that it stays visible: a failed reading moves it to
//! [`SensorState::ValueMissing`], a later good one back to `Active`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Clock,
    Voltage,
    Power,
    Load,
    Factor,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Clock => "clock",
            SensorKind::Voltage => "voltage",
            SensorKind::Power => "power",
            SensorKind::Load => "load",
            SensorKind::Factor => "factor",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Clock => "MHz",
            SensorKind::Voltage => "V",
            SensorKind::Power => "W",
            SensorKind::Load => "%",
            SensorKind::Factor => "x",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable handle of a sensor: its kind and its index among sensors of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SensorId {
    pub kind: SensorKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    Dormant,
    Active,
    ValueMissing,
}

/// A user-adjustable calibration constant of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    name: String,
    description: String,
    default: f32,
    value: Option<f32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default: f32) -> Self {
        Parameter {
            name: name.into(),
            description: description.into(),
            default,
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn value(&self) -> f32 {
        self.value.unwrap_or(self.default)
    }

    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }

    /// `None` restores the default.
    pub fn set(&mut self, value: Option<f32>) {
        self.value = value.filter(|v| v.is_finite());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    id: SensorId,
    name: String,
    identifier: String,
    state: SensorState,
    value: Option<f32>,
    min: Option<f32>,
    max: Option<f32>,
    parameters: Vec<Parameter>,
}

impl Sensor {
    pub fn id(&self) -> SensorId {
        self.id
    }

    pub fn kind(&self) -> SensorKind {
        self.id.kind
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn min(&self) -> Option<f32> {
        self.min
    }

    pub fn max(&self) -> Option<f32> {
        self.max
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_visible(&self) -> bool {
        self.state != SensorState::Dormant
    }
}

/// All sensors of one hardware instance.
#[derive(Debug, Clone)]
pub struct SensorSet {
    hardware: String,
    sensors: Vec<Sensor>,
    positions: HashMap<SensorId, usize>,
    next_index: HashMap<SensorKind, usize>,
}

impl SensorSet {
    /// `hardware` prefixes every identifier, e.g. `intelcpu/0`.
    pub fn new(hardware: impl Into<String>) -> Self {
        SensorSet {
            hardware: hardware.into(),
            sensors: Vec::new(),
            positions: HashMap::new(),
            next_index: HashMap::new(),
        }
    }

    pub fn hardware(&self) -> &str {
        &self.hardware
    }

    pub fn create(&mut self, name: impl Into<String>, kind: SensorKind) -> SensorId {
        self.create_with_parameters(name, kind, Vec::new())
    }

    pub fn create_with_parameters(
        &mut self,
        name: impl Into<String>,
        kind: SensorKind,
        parameters: Vec<Parameter>,
    ) -> SensorId {
        let next = self.next_index.entry(kind).or_insert(0);
        let id = SensorId { kind, index: *next };
        *next += 1;
        let identifier = format!("{}/{}/{}", self.hardware, kind, id.index);
        self.positions.insert(id, self.sensors.len());
        self.sensors.push(Sensor {
            id,
            name: name.into(),
            identifier,
            state: SensorState::Dormant,
            value: None,
            min: None,
            max: None,
            parameters,
        });
        id
    }

    pub fn get(&self, id: SensorId) -> Option<&Sensor> {
        self.positions.get(&id).map(|&i| &self.sensors[i])
    }

    fn get_mut(&mut self, id: SensorId) -> Option<&mut Sensor> {
        match self.positions.get(&id) {
            Some(&i) => self.sensors.get_mut(i),
            None => None,
        }
    }

    /// Makes a dormant sensor visible.
    pub fn activate(&mut self, id: SensorId) {
        if let Some(s) = self.get_mut(id) {
            if s.state == SensorState::Dormant {
                s.state = SensorState::Active;
            }
        }
    }

    /// Drops the current reading. A visible sensor stays visible without a
    /// value; a dormant one stays dormant.
    pub fn deactivate(&mut self, id: SensorId) {
        if let Some(s) = self.get_mut(id) {
            s.value = None;
            if s.state == SensorState::Active {
                s.state = SensorState::ValueMissing;
            }
        }
    }

    /// Records a reading. `Some` activates the sensor, `None` (or a
    /// non-finite number) counts as a missing reading.
    pub fn set_value(&mut self, id: SensorId, value: Option<f32>) {
        let Some(v) = value.filter(|v| v.is_finite()) else {
            self.deactivate(id);
            return;
        };
        if let Some(s) = self.get_mut(id) {
            s.value = Some(v);
            s.min = Some(s.min.map_or(v, |m| m.min(v)));
            s.max = Some(s.max.map_or(v, |m| m.max(v)));
            if s.state == SensorState::ValueMissing {
                s.state = SensorState::Active;
            }
        }
        self.activate(id);
    }

    pub fn value(&self, id: SensorId) -> Option<f32> {
        self.get(id).and_then(|s| s.value)
    }

    pub fn state(&self, id: SensorId) -> Option<SensorState> {
        self.get(id).map(|s| s.state)
    }

    pub fn parameter(&self, id: SensorId, index: usize) -> Option<f32> {
        self.get(id)?.parameters.get(index).map(|p| p.value())
    }

    /// Overrides a parameter (`None` restores its default). Returns whether
    /// the parameter exists.
    pub fn set_parameter(&mut self, id: SensorId, index: usize, value: Option<f32>) -> bool {
        match self.get_mut(id).and_then(|s| s.parameters.get_mut(index)) {
            Some(p) => {
                p.set(value);
                true
            }
            None => false,
        }
    }

    /// Overrides a parameter addressed by sensor identifier and parameter name.
    pub fn set_parameter_by_name(&mut self, identifier: &str, parameter: &str, value: Option<f32>) -> bool {
        let Some(sensor) = self.sensors.iter_mut().find(|s| s.identifier == identifier) else {
            return false;
        };
        match sensor.parameters.iter_mut().find(|p| p.name == parameter) {
            Some(p) => {
                p.set(value);
                true
            }
            None => false,
        }
    }

    /// Visible sensors ordered by kind and index.
    pub fn sensors(&self) -> Vec<&Sensor> {
        let mut visible: Vec<&Sensor> = self.sensors.iter().filter(|s| s.is_visible()).collect();
        visible.sort_by_key(|s| s.id);
        visible
    }

    /// Every sensor, dormant ones included, in creation order.
    pub fn all(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Sets maximum and average over the sources that currently hold a value.
    /// With no such source both derived sensors lose their value.
    pub fn update_derived(&mut self, max: Option<SensorId>, average: Option<SensorId>, sources: &[SensorId]) {
        let values: Vec<f32> = sources.iter().filter_map(|&id| self.value(id)).collect();
        let (max_value, avg_value) = if values.is_empty() {
            (None, None)
        } else {
            let max_value = values.iter().copied().fold(f32::MIN, f32::max);
            let avg_value = values.iter().sum::<f32>() / values.len() as f32;
            (Some(max_value), Some(avg_value))
        };
        if let Some(id) = max {
            self.set_value(id, max_value);
        }
        if let Some(id) = average {
            self.set_value(id, avg_value);
        }
    }
}
