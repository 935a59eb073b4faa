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

//! Processor topology: packages, cores and hardware threads.
//!
//! The telemetry engine only consumes [`Package`] values. [`read_topology`]
//! builds them from `/proc/cpuinfo` for the binary.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use serde::Serialize;

use crate::affinity::CpuMask;
use crate::error::{Result, TelemetryError};

const CPUINFO_PATH: &str = "/proc/cpuinfo";
/// Logical processors of the performance cores on hybrid Intel parts.
const PERFORMANCE_CORES_PATH: &str = "/sys/devices/cpu_core/cpus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Intel,
    Amd,
    Unknown,
}

impl Vendor {
    pub fn from_vendor_id(id: &str) -> Self {
        match id.trim() {
            "GenuineIntel" => Vendor::Intel,
            "AuthenticAMD" => Vendor::Amd,
            _ => Vendor::Unknown,
        }
    }
}

/// Opaque handle naming one logical processor the scheduler can run us on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Affinity(usize);

impl Affinity {
    pub const fn new(cpu: usize) -> Self {
        Affinity(cpu)
    }

    pub const fn cpu(self) -> usize {
        self.0
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Feature flags reported by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub time_stamp_counter: bool,
    /// Counter ticks at a constant rate and keeps running in deep C-states.
    pub invariant_tsc: bool,
    pub model_specific_registers: bool,
    pub digital_thermal_sensor: bool,
    pub package_thermal_sensor: bool,
    /// K8 "ts" power management capability.
    pub amd_thermal_sensor: bool,
}

impl Capabilities {
    /// Builds the flags from the `flags` and `power management` lines of cpuinfo.
    pub fn from_flags(flags: &str, power_management: &str) -> Self {
        let has = |name: &str| flags.split_whitespace().any(|f| f == name);
        Capabilities {
            time_stamp_counter: has("tsc"),
            invariant_tsc: has("constant_tsc") && has("nonstop_tsc"),
            model_specific_registers: has("msr"),
            digital_thermal_sensor: has("dts"),
            package_thermal_sensor: has("pts"),
            amd_thermal_sensor: power_management.split_whitespace().any(|f| f == "ts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorIdentity {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub brand: String,
    pub package: u32,
    pub core: u32,
    /// Position of this thread within its core.
    pub thread: u32,
    pub affinity: Affinity,
    pub capabilities: Capabilities,
}

impl ProcessorIdentity {
    /// Brand string with trademark noise and the frequency suffix removed.
    pub fn name(&self) -> String {
        let mut name = self.brand.clone();
        for noise in [
            "(R)",
            "(TM)",
            "(tm)",
            "CPU",
            "Dual-Core Processor",
            "Triple-Core Processor",
            "Quad-Core Processor",
            "Six-Core Processor",
            "Eight-Core Processor",
            "12-Core Processor",
            "16-Core Processor",
            "24-Core Processor",
            "32-Core Processor",
            "64-Core Processor",
            "Processor",
        ] {
            name = name.replace(noise, " ");
        }
        if let Some(at) = name.find('@') {
            name.truncate(at);
        }
        let collapsed: Vec<&str> = name.split_whitespace().collect();
        let name = collapsed.join(" ");
        if name.is_empty() {
            match self.vendor {
                Vendor::Intel => "Intel CPU".to_string(),
                Vendor::Amd => "AMD CPU".to_string(),
                Vendor::Unknown => "Unknown CPU".to_string(),
            }
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Core {
    pub id: u32,
    pub threads: Vec<ProcessorIdentity>,
}

/// One physical processor package. Always holds at least one core with at
/// least one thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    index: usize,
    cores: Vec<Core>,
}

impl Package {
    pub fn new(index: usize, cores: Vec<Core>) -> Result<Self> {
        if cores.is_empty() {
            return Err(TelemetryError::topology(format!("package {} has no cores", index)));
        }
        if let Some(core) = cores.iter().find(|c| c.threads.is_empty()) {
            return Err(TelemetryError::topology(format!(
                "core {} of package {} has no threads",
                core.id, index
            )));
        }
        Ok(Package { index, cores })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn thread_count(&self) -> usize {
        self.cores.iter().map(|c| c.threads.len()).sum()
    }

    /// Thread 0 of core 0, the identity used for classification.
    pub fn first_thread(&self) -> &ProcessorIdentity {
        &self.cores[0].threads[0]
    }
}

#[derive(Default)]
struct CpuinfoBlock {
    processor: Option<usize>,
    vendor_id: String,
    family: u32,
    model: u32,
    stepping: u32,
    model_name: String,
    physical_id: u32,
    core_id: Option<u32>,
    flags: String,
    power_management: String,
}

fn parse_number(key: &str, val: &str) -> Result<u32> {
    val.parse::<u32>()
        .map_err(|_| TelemetryError::topology(format!("invalid {} value '{}'", key, val)))
}

fn finish_block(block: CpuinfoBlock, out: &mut BTreeMap<u32, BTreeMap<u32, Vec<ProcessorIdentity>>>) {
    let Some(cpu) = block.processor else { return };
    let core_id = block.core_id.unwrap_or(cpu as u32);
    let threads = out
        .entry(block.physical_id)
        .or_default()
        .entry(core_id)
        .or_default();
    threads.push(ProcessorIdentity {
        vendor: Vendor::from_vendor_id(&block.vendor_id),
        family: block.family,
        model: block.model,
        stepping: block.stepping,
        brand: block.model_name,
        package: block.physical_id,
        core: core_id,
        thread: threads.len() as u32,
        affinity: Affinity::new(cpu),
        capabilities: Capabilities::from_flags(&block.flags, &block.power_management),
    });
}

/// Parses the text of `/proc/cpuinfo` into packages ordered by physical id.
pub fn parse_cpuinfo(text: &str) -> Result<Vec<Package>> {
    let mut tree: BTreeMap<u32, BTreeMap<u32, Vec<ProcessorIdentity>>> = BTreeMap::new();
    let mut block = CpuinfoBlock::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            finish_block(std::mem::take(&mut block), &mut tree);
            continue;
        }
        let Some((k, v)) = line.split_once(':') else { continue };
        let key = k.trim().to_ascii_lowercase();
        let val = v.trim();
        match key.as_str() {
            "processor" => {
                // A new block without a separating blank line
                if block.processor.is_some() {
                    finish_block(std::mem::take(&mut block), &mut tree);
                }
                block.processor = Some(parse_number(&key, val)? as usize);
            }
            "vendor_id" => block.vendor_id = val.to_string(),
            "cpu family" => block.family = parse_number(&key, val)?,
            "model" => block.model = parse_number(&key, val)?,
            "stepping" => block.stepping = parse_number(&key, val).unwrap_or(0),
            "model name" => block.model_name = val.to_string(),
            "physical id" => block.physical_id = parse_number(&key, val)?,
            "core id" => block.core_id = Some(parse_number(&key, val)?),
            "flags" => block.flags = val.to_string(),
            "power management" => block.power_management = val.to_string(),
            _ => {}
        }
    }
    finish_block(block, &mut tree);

    if tree.is_empty() {
        return Err(TelemetryError::topology("no processors found in cpuinfo"));
    }

    tree.into_iter()
        .enumerate()
        .map(|(index, (_, cores))| {
            let cores = cores
                .into_iter()
                .map(|(id, threads)| Core { id, threads })
                .collect();
            Package::new(index, cores)
        })
        .collect()
}

pub fn read_topology() -> Result<Vec<Package>> {
    let text = fs::read_to_string(CPUINFO_PATH)
        .map_err(|e| TelemetryError::file_read(CPUINFO_PATH, e))?;
    parse_cpuinfo(&text)
}

/// Performance-core cpus of a hybrid processor, `None` on uniform designs.
pub fn read_performance_cores() -> Option<CpuMask> {
    let text = fs::read_to_string(PERFORMANCE_CORES_PATH).ok()?;
    CpuMask::parse_list(&text).ok().filter(|m| !m.is_empty())
}
