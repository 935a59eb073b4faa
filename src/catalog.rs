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

//! Microarchitecture catalog.
//!
//! [`RULES`] is an ordered table of (vendor, family, model, stepping) matches.
//! The first matching rule names a [`ProfileTemplate`]; [`classify`] resolves
//! the identity-dependent parts of that template (temperature target tables,
//! brand offsets, capability gates) into an immutable [`DecodeProfile`].
//! Processors no rule matches get [`DecodeProfile::degraded`].

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use serde::Serialize;
use tracing::debug;

use crate::decode::{BitField, MultiplierFormula, VidEncoding};
use crate::registers::{msr, smn};
use crate::topology::{ProcessorIdentity, Vendor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Microarchitecture {
    Unknown,
    // Intel
    NetBurst,
    Core,
    Atom,
    Nehalem,
    SandyBridge,
    IvyBridge,
    Haswell,
    Broadwell,
    Silvermont,
    Airmont,
    Skylake,
    KabyLake,
    Goldmont,
    GoldmontPlus,
    CannonLake,
    IceLake,
    CometLake,
    Tremont,
    TigerLake,
    JasperLake,
    RocketLake,
    AlderLake,
    RaptorLake,
    MeteorLake,
    // AMD
    K8,
    K10,
    Llano,
    Bobcat,
    Bulldozer,
    Piledriver,
    Steamroller,
    Excavator,
    Jaguar,
    Puma,
    Zen,
    Zen2,
    Zen3,
    Zen4,
    Zen5,
}

impl Microarchitecture {
    /// Mixed performance/efficiency core designs.
    pub fn has_hybrid_cores(self) -> bool {
        matches!(
            self,
            Microarchitecture::AlderLake | Microarchitecture::RaptorLake | Microarchitecture::MeteorLake
        )
    }
}

impl fmt::Display for Microarchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One row of a temperature-target table. `None` matches anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TjMaxEntry {
    pub stepping: Option<u32>,
    pub cores: Option<usize>,
    pub tjmax: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TjMaxSource {
    Fixed(f64),
    /// First matching row wins; tables end with a catch-all row.
    Table(&'static [TjMaxEntry]),
    /// Read `IA32_TEMPERATURE_TARGET` per core at construction.
    Register { fallback: f64 },
}

impl TjMaxSource {
    fn resolve(self, stepping: u32, cores: usize) -> TjMaxSource {
        match self {
            TjMaxSource::Table(rows) => rows
                .iter()
                .find(|r| {
                    r.stepping.map_or(true, |s| s == stepping) && r.cores.map_or(true, |c| c == cores)
                })
                .map(|r| TjMaxSource::Fixed(r.tjmax))
                .unwrap_or(TjMaxSource::Fixed(DEFAULT_TJMAX)),
            other => other,
        }
    }
}

pub const DEFAULT_TJMAX: f64 = 100.0;

/// Core 2 (65 nm): TjMax by stepping (B2, G0, M0) and core count.
const CORE2_65NM_TJMAX: &[TjMaxEntry] = &[
    TjMaxEntry { stepping: Some(0x06), cores: Some(2), tjmax: 90.0 },
    TjMaxEntry { stepping: Some(0x06), cores: Some(4), tjmax: 100.0 },
    TjMaxEntry { stepping: Some(0x06), cores: None, tjmax: 95.0 },
    TjMaxEntry { stepping: Some(0x0B), cores: None, tjmax: 100.0 },
    TjMaxEntry { stepping: Some(0x0D), cores: None, tjmax: 95.0 },
    TjMaxEntry { stepping: None, cores: None, tjmax: 95.0 },
];

/// Atom (45 nm): TjMax by stepping (C0, A0).
const ATOM_45NM_TJMAX: &[TjMaxEntry] = &[
    TjMaxEntry { stepping: Some(0x02), cores: None, tjmax: 90.0 },
    TjMaxEntry { stepping: Some(0x0A), cores: None, tjmax: 100.0 },
    TjMaxEntry { stepping: None, cores: None, tjmax: 90.0 },
];

/// Tctl reads above the die temperature on these parts by a fixed amount.
const ZEN_TDIE_OFFSETS: &[(&str, f64)] = &[
    ("1600X", -20.0),
    ("1700X", -20.0),
    ("1800X", -20.0),
    ("Threadripper 19", -27.0),
    ("Threadripper 29", -27.0),
    ("2700X", -10.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcdLayout {
    pub base: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalLayout {
    None,
    /// Intel digital thermal sensors, counting down from TjMax.
    IntelDts {
        tjmax: TjMaxSource,
        per_core: bool,
        package: bool,
    },
    /// K8 thermtrip register in D18F3xE4.
    AmdThermtrip { device_id: u16, offset: f64 },
    /// Reported temperature control, D18F3xA4 or its SMU mirror.
    AmdReported {
        device_id: u16,
        via_smu: bool,
        /// Range-select bits 17:16 shift the reading by -49 °C.
        range_select: bool,
        /// Only bits 31:23 carry the reading.
        coarse: bool,
    },
    /// Zen Tctl over SMN, optional Tdie offset and CCD sensors.
    Zen { tdie_offset: f64, ccd: Option<CcdLayout> },
}

/// Register and formula for the time-stamp counter multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioSource {
    pub address: u32,
    pub formula: MultiplierFormula,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockLayout {
    None,
    Intel { tsc_ratio: RatioSource, core: MultiplierFormula },
    /// Current and maximum FID both live in FIDVID_STATUS.
    AmdK8,
    /// Core multiplier from COFVID_STATUS, TSC multiplier from P-state 0.
    AmdCofVid { core: MultiplierFormula },
    Zen,
}

/// SVI2 telemetry plane offsets from the SVI base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SviLayout {
    pub core_plane: u32,
    pub soc_plane: u32,
    /// SoC plane is reported even when its "not present" flag is set.
    pub soc_always_present: bool,
    /// Telemetry readout does not work on this part.
    pub telemetry_absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageLayout {
    None,
    IntelVid,
    AmdCofVid(VidEncoding),
    /// Per-core VID from HW_PSTATE_STATUS plus optional SVI2 planes.
    ZenSvi(Option<SviLayout>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaplUnit {
    /// `1 / 2^esu` joules.
    PowerOfHalf,
    /// `2^esu` microjoules (Silvermont, Airmont).
    Microjoules,
}

impl RaplUnit {
    pub fn joules(self, esu: u64) -> f64 {
        let exponent = esu.min(31) as i32;
        match self {
            RaplUnit::PowerOfHalf => 1.0 / 2f64.powi(exponent),
            RaplUnit::Microjoules => 1.0e-6 * 2f64.powi(exponent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyDomain {
    pub name: &'static str,
    pub address: u32,
}

pub const INTEL_RAPL_DOMAINS: &[EnergyDomain] = &[
    EnergyDomain { name: "CPU Package", address: msr::MSR_PKG_ENERGY_STATUS },
    EnergyDomain { name: "CPU Cores", address: msr::MSR_PP0_ENERGY_STATUS },
    EnergyDomain { name: "CPU Graphics", address: msr::MSR_PP1_ENERGY_STATUS },
    EnergyDomain { name: "CPU Memory", address: msr::MSR_DRAM_ENERGY_STATUS },
    EnergyDomain { name: "CPU Platform", address: msr::MSR_PLATFORM_ENERGY_STATUS },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyLayout {
    None,
    IntelRapl { unit: RaplUnit, domains: &'static [EnergyDomain] },
    /// Package and per-core energy counters, unit from PWR_UNIT.
    Zen,
}

/// Per-rule profile data before identity-dependent resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileTemplate {
    pub microarchitecture: Microarchitecture,
    pub thermal: ThermalLayout,
    pub clocks: ClockLayout,
    pub voltage: VoltageLayout,
    pub energy: EnergyLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMatch {
    Any,
    List(&'static [u32]),
    /// Inclusive range.
    Range(u32, u32),
}

impl ModelMatch {
    fn matches(self, model: u32) -> bool {
        match self {
            ModelMatch::Any => true,
            ModelMatch::List(models) => models.contains(&model),
            ModelMatch::Range(lo, hi) => (lo..=hi).contains(&model),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogRule {
    pub vendor: Vendor,
    pub families: &'static [u32],
    pub models: ModelMatch,
    pub steppings: Option<&'static [u32]>,
    pub template: ProfileTemplate,
}

impl CatalogRule {
    fn matches(&self, identity: &ProcessorIdentity) -> bool {
        self.vendor == identity.vendor
            && self.families.contains(&identity.family)
            && self.models.matches(identity.model)
            && self.steppings.map_or(true, |s| s.contains(&identity.stepping))
    }
}

/// The fully resolved decode profile of one package.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeProfile {
    pub vendor: Vendor,
    pub microarchitecture: Microarchitecture,
    pub thermal: ThermalLayout,
    pub clocks: ClockLayout,
    pub voltage: VoltageLayout,
    pub energy: EnergyLayout,
}

impl DecodeProfile {
    /// Profile for processors the catalog does not know. Only the calibrated
    /// base clock is reported.
    pub fn degraded(vendor: Vendor) -> Self {
        DecodeProfile {
            vendor,
            microarchitecture: Microarchitecture::Unknown,
            thermal: ThermalLayout::None,
            clocks: ClockLayout::None,
            voltage: VoltageLayout::None,
            energy: EnergyLayout::None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.microarchitecture == Microarchitecture::Unknown
    }

    /// Prefix of sensor identifiers.
    pub fn hardware_kind(&self) -> &'static str {
        if self.is_degraded() {
            return "genericcpu";
        }
        match self.vendor {
            Vendor::Intel => "intelcpu",
            Vendor::Amd => "amdcpu",
            Vendor::Unknown => "genericcpu",
        }
    }

    /// MSRs worth dumping in a diagnostic report.
    pub fn report_registers(&self) -> &'static [u32] {
        if self.is_degraded() {
            return &[];
        }
        match self.vendor {
            Vendor::Intel => &[
                msr::MSR_PLATFORM_INFO,
                msr::IA32_PERF_STATUS,
                msr::IA32_THERM_STATUS,
                msr::IA32_TEMPERATURE_TARGET,
                msr::IA32_PACKAGE_THERM_STATUS,
                msr::MSR_RAPL_POWER_UNIT,
                msr::MSR_PKG_ENERGY_STATUS,
                msr::MSR_DRAM_ENERGY_STATUS,
                msr::MSR_PP0_ENERGY_STATUS,
                msr::MSR_PP1_ENERGY_STATUS,
            ],
            Vendor::Amd => match self.clocks {
                ClockLayout::AmdK8 => &[msr::FIDVID_STATUS],
                ClockLayout::Zen => &[
                    msr::PSTATE_0,
                    msr::HW_PSTATE_STATUS,
                    msr::PWR_UNIT,
                    msr::CORE_ENERGY_STATUS,
                    msr::PKG_ENERGY_STATUS,
                ],
                _ => &[msr::PSTATE_0, msr::COFVID_STATUS],
            },
            Vendor::Unknown => &[],
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

const PLATFORM_INFO_RATIO: RatioSource = RatioSource {
    address: msr::MSR_PLATFORM_INFO,
    formula: MultiplierFormula::IntelRatio(BitField::new(8, 8)),
};

const fn intel(
    microarchitecture: Microarchitecture,
    tjmax: TjMaxSource,
    tsc_ratio: RatioSource,
    core: MultiplierFormula,
    energy: EnergyLayout,
) -> ProfileTemplate {
    ProfileTemplate {
        microarchitecture,
        thermal: ThermalLayout::IntelDts { tjmax, per_core: true, package: true },
        clocks: ClockLayout::Intel { tsc_ratio, core },
        voltage: VoltageLayout::IntelVid,
        energy,
    }
}

/// NetBurst, Core and early Atom: half-step ratios in PERF_STATUS, no RAPL.
const fn intel_legacy(microarchitecture: Microarchitecture, tjmax: TjMaxSource) -> ProfileTemplate {
    intel(
        microarchitecture,
        tjmax,
        RatioSource {
            address: msr::IA32_PERF_STATUS,
            formula: MultiplierFormula::IntelHalfRatio { shift: 32 },
        },
        MultiplierFormula::IntelHalfRatio { shift: 0 },
        EnergyLayout::None,
    )
}

const fn intel_nehalem() -> ProfileTemplate {
    intel(
        Microarchitecture::Nehalem,
        TjMaxSource::Register { fallback: DEFAULT_TJMAX },
        PLATFORM_INFO_RATIO,
        MultiplierFormula::IntelRatio(BitField::new(0, 8)),
        EnergyLayout::None,
    )
}

const fn intel_modern(microarchitecture: Microarchitecture, unit: RaplUnit) -> ProfileTemplate {
    intel(
        microarchitecture,
        TjMaxSource::Register { fallback: DEFAULT_TJMAX },
        PLATFORM_INFO_RATIO,
        MultiplierFormula::IntelRatio(BitField::new(8, 8)),
        EnergyLayout::IntelRapl { unit, domains: INTEL_RAPL_DOMAINS },
    )
}

const fn amd_k8() -> ProfileTemplate {
    ProfileTemplate {
        microarchitecture: Microarchitecture::K8,
        thermal: ThermalLayout::AmdThermtrip { device_id: 0x1103, offset: 0.0 },
        clocks: ClockLayout::AmdK8,
        voltage: VoltageLayout::None,
        energy: EnergyLayout::None,
    }
}

const fn amd_k10(
    microarchitecture: Microarchitecture,
    device_id: u16,
    via_smu: bool,
    range_select: bool,
    coarse: bool,
    core: MultiplierFormula,
    vid: VidEncoding,
) -> ProfileTemplate {
    ProfileTemplate {
        microarchitecture,
        thermal: ThermalLayout::AmdReported { device_id, via_smu, range_select, coarse },
        clocks: ClockLayout::AmdCofVid { core },
        voltage: VoltageLayout::AmdCofVid(vid),
        energy: EnergyLayout::None,
    }
}

const fn zen(
    microarchitecture: Microarchitecture,
    svi: Option<SviLayout>,
    ccd: Option<CcdLayout>,
) -> ProfileTemplate {
    ProfileTemplate {
        microarchitecture,
        thermal: ThermalLayout::Zen { tdie_offset: 0.0, ccd },
        clocks: ClockLayout::Zen,
        voltage: VoltageLayout::ZenSvi(svi),
        energy: EnergyLayout::Zen,
    }
}

const ZEN_SVI: SviLayout =
    SviLayout { core_plane: 0xC, soc_plane: 0x10, soc_always_present: false, telemetry_absent: false };
const ZEN_RAVEN_SVI: SviLayout =
    SviLayout { core_plane: 0xC, soc_plane: 0x10, soc_always_present: true, telemetry_absent: false };
const ZEN2_TR_SVI: SviLayout =
    SviLayout { core_plane: 0x14, soc_plane: 0x10, soc_always_present: true, telemetry_absent: false };
const ZEN2_SVI: SviLayout =
    SviLayout { core_plane: 0x10, soc_plane: 0xC, soc_always_present: true, telemetry_absent: false };
const ZEN4_SVI: SviLayout =
    SviLayout { core_plane: 0x10, soc_plane: 0xC, soc_always_present: false, telemetry_absent: true };

const ZEN2_CCDS: CcdLayout = CcdLayout { base: smn::CCD_TEMP_ZEN2, count: 8 };
const ZEN4_CCDS: CcdLayout = CcdLayout { base: smn::CCD_TEMP_ZEN4, count: 8 };

const fn rule(
    vendor: Vendor,
    families: &'static [u32],
    models: ModelMatch,
    template: ProfileTemplate,
) -> CatalogRule {
    CatalogRule { vendor, families, models, steppings: None, template }
}

use Microarchitecture as M;
use ModelMatch::{Any, List, Range};
use MultiplierFormula::{AmdBobcat, AmdK10, AmdLlano};
use VidEncoding::{Svi1, Svi2};
use Vendor::{Amd, Intel};

/// Priority-ordered classification rules. Within a vendor and family the
/// first match wins, so family-wide fallbacks come last.
pub static RULES: &[CatalogRule] = &[
    // Intel family 6
    rule(Intel, &[0x06], List(&[0x0F]), intel_legacy(M::Core, TjMaxSource::Table(CORE2_65NM_TJMAX))),
    rule(Intel, &[0x06], List(&[0x17]), intel_legacy(M::Core, TjMaxSource::Fixed(100.0))),
    rule(Intel, &[0x06], List(&[0x1C]), intel_legacy(M::Atom, TjMaxSource::Table(ATOM_45NM_TJMAX))),
    rule(Intel, &[0x06], List(&[0x1A, 0x1E, 0x1F, 0x25, 0x2C, 0x2E, 0x2F]), intel_nehalem()),
    rule(Intel, &[0x06], List(&[0x2A, 0x2D]), intel_modern(M::SandyBridge, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x3A, 0x3E]), intel_modern(M::IvyBridge, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x3C, 0x3F, 0x45, 0x46]), intel_modern(M::Haswell, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x3D, 0x47, 0x4F, 0x56]), intel_modern(M::Broadwell, RaplUnit::PowerOfHalf)),
    rule(
        Intel,
        &[0x06],
        List(&[0x36]),
        intel_legacy(M::Atom, TjMaxSource::Register { fallback: DEFAULT_TJMAX }),
    ),
    rule(Intel, &[0x06], List(&[0x37, 0x4A, 0x4D, 0x5A, 0x5D]), intel_modern(M::Silvermont, RaplUnit::Microjoules)),
    rule(Intel, &[0x06], List(&[0x4E, 0x5E, 0x55]), intel_modern(M::Skylake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x4C]), intel_modern(M::Airmont, RaplUnit::Microjoules)),
    rule(Intel, &[0x06], List(&[0x8E, 0x9E]), intel_modern(M::KabyLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x5C, 0x5F]), intel_modern(M::Goldmont, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x7A]), intel_modern(M::GoldmontPlus, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x66]), intel_modern(M::CannonLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x7D, 0x7E, 0x6A, 0x6C]), intel_modern(M::IceLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0xA5, 0xA6]), intel_modern(M::CometLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x86]), intel_modern(M::Tremont, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x8C, 0x8D]), intel_modern(M::TigerLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x97, 0x9A, 0xBE]), intel_modern(M::AlderLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0xB7, 0xBA, 0xBF]), intel_modern(M::RaptorLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0xAC, 0xAA]), intel_modern(M::MeteorLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0x9C]), intel_modern(M::JasperLake, RaplUnit::PowerOfHalf)),
    rule(Intel, &[0x06], List(&[0xA7]), intel_modern(M::RocketLake, RaplUnit::PowerOfHalf)),
    // Intel family 0Fh
    rule(
        Intel,
        &[0x0F],
        List(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x06]),
        intel_legacy(M::NetBurst, TjMaxSource::Fixed(100.0)),
    ),
    // AMD family 0Fh
    rule(Amd, &[0x0F], Any, amd_k8()),
    // AMD families 10h to 16h
    rule(
        Amd,
        &[0x10],
        Any,
        amd_k10(M::K10, 0x1203, false, false, false, AmdK10, Svi1),
    ),
    rule(
        Amd,
        &[0x11],
        Any,
        amd_k10(M::K10, 0x1303, false, false, false, AmdK10, Svi1),
    ),
    rule(
        Amd,
        &[0x12],
        Any,
        amd_k10(M::Llano, 0x1703, false, false, false, AmdLlano, Svi1),
    ),
    rule(
        Amd,
        &[0x14],
        Any,
        amd_k10(M::Bobcat, 0x1703, false, false, false, AmdBobcat, Svi1),
    ),
    rule(
        Amd,
        &[0x15],
        Range(0x00, 0x0F),
        amd_k10(M::Bulldozer, 0x1603, false, true, true, AmdK10, Svi1),
    ),
    rule(
        Amd,
        &[0x15],
        Range(0x10, 0x1F),
        amd_k10(M::Piledriver, 0x1403, false, true, false, AmdK10, Svi2),
    ),
    rule(
        Amd,
        &[0x15],
        Range(0x30, 0x3F),
        amd_k10(M::Steamroller, 0x141D, false, true, false, AmdK10, Svi2),
    ),
    rule(
        Amd,
        &[0x15],
        Range(0x60, 0x6F),
        amd_k10(M::Excavator, 0x1573, true, true, false, AmdK10, Svi2),
    ),
    rule(
        Amd,
        &[0x15],
        Range(0x70, 0x7F),
        amd_k10(M::Excavator, 0x15B3, true, true, false, AmdK10, Svi2),
    ),
    rule(
        Amd,
        &[0x16],
        Range(0x00, 0x0F),
        amd_k10(M::Jaguar, 0x1533, false, true, false, AmdK10, Svi2),
    ),
    rule(
        Amd,
        &[0x16],
        Range(0x30, 0x3F),
        amd_k10(M::Puma, 0x1583, false, true, false, AmdK10, Svi2),
    ),
    // AMD family 17h
    rule(Amd, &[0x17], List(&[0x11]), zen(M::Zen, Some(ZEN_RAVEN_SVI), None)),
    rule(Amd, &[0x17], List(&[0x31]), zen(M::Zen2, Some(ZEN2_TR_SVI), Some(ZEN2_CCDS))),
    rule(Amd, &[0x17], List(&[0x71]), zen(M::Zen2, Some(ZEN2_SVI), Some(ZEN2_CCDS))),
    rule(Amd, &[0x17], Any, zen(M::Zen, Some(ZEN_SVI), None)),
    // AMD family 19h
    rule(Amd, &[0x19], List(&[0x21]), zen(M::Zen3, Some(ZEN2_SVI), Some(ZEN2_CCDS))),
    rule(Amd, &[0x19], List(&[0x61]), zen(M::Zen4, Some(ZEN4_SVI), Some(ZEN4_CCDS))),
    rule(Amd, &[0x19], Any, zen(M::Zen3, None, None)),
    // AMD family 1Ah
    rule(Amd, &[0x1A], List(&[0x44]), zen(M::Zen5, Some(ZEN4_SVI), Some(ZEN4_CCDS))),
    rule(Amd, &[0x1A], Any, zen(M::Zen5, None, None)),
];

struct Catalog {
    by_family: HashMap<(Vendor, u32), Vec<&'static CatalogRule>>,
}

impl Catalog {
    fn build(rules: &'static [CatalogRule]) -> Self {
        let mut by_family: HashMap<(Vendor, u32), Vec<&'static CatalogRule>> = HashMap::new();
        for rule in rules {
            for &family in rule.families {
                by_family.entry((rule.vendor, family)).or_default().push(rule);
            }
        }
        Catalog { by_family }
    }

    fn find(&self, identity: &ProcessorIdentity) -> Option<&'static CatalogRule> {
        self.by_family
            .get(&(identity.vendor, identity.family))?
            .iter()
            .copied()
            .find(|r| r.matches(identity))
    }
}

lazy_static! {
    static ref CATALOG: Catalog = Catalog::build(RULES);
}

fn k8_thermtrip_offset(model: u32) -> f64 {
    // AM2+ 65 nm parts report 21 °C higher
    if model >= 0x69 && !matches!(model, 0xC1 | 0x6C | 0x7C) {
        -49.0 + 21.0
    } else {
        -49.0
    }
}

fn zen_tdie_offset(brand: &str) -> f64 {
    ZEN_TDIE_OFFSETS
        .iter()
        .find(|(needle, _)| brand.contains(needle))
        .map(|(_, offset)| *offset)
        .unwrap_or(0.0)
}

/// Classifies a processor and resolves its decode profile. Deterministic and
/// total: the same identity always yields the same profile, and every
/// identity yields one.
pub fn classify(identity: &ProcessorIdentity, core_count: usize) -> DecodeProfile {
    let Some(rule) = CATALOG.find(identity) else {
        debug!(
            vendor = ?identity.vendor,
            family = identity.family,
            model = identity.model,
            "No catalog entry, using degraded profile"
        );
        return DecodeProfile::degraded(identity.vendor);
    };

    let caps = identity.capabilities;
    let t = rule.template;
    let thermal = match t.thermal {
        ThermalLayout::IntelDts { tjmax, per_core, package } => ThermalLayout::IntelDts {
            tjmax: tjmax.resolve(identity.stepping, core_count),
            per_core: per_core && caps.digital_thermal_sensor,
            package: package && caps.package_thermal_sensor,
        },
        ThermalLayout::AmdThermtrip { device_id, .. } if caps.amd_thermal_sensor => {
            ThermalLayout::AmdThermtrip { device_id, offset: k8_thermtrip_offset(identity.model) }
        }
        ThermalLayout::AmdThermtrip { .. } => ThermalLayout::None,
        ThermalLayout::Zen { ccd, .. } => {
            ThermalLayout::Zen { tdie_offset: zen_tdie_offset(&identity.brand), ccd }
        }
        other => other,
    };

    let profile = DecodeProfile {
        vendor: identity.vendor,
        microarchitecture: t.microarchitecture,
        thermal,
        clocks: t.clocks,
        voltage: t.voltage,
        energy: t.energy,
    };
    debug!(
        microarchitecture = %profile.microarchitecture,
        family = identity.family,
        model = identity.model,
        stepping = identity.stepping,
        "Classified processor"
    );
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{amd_identity, intel_identity};

    #[test]
    fn test_skylake_profile() {
        let profile = classify(&intel_identity(0x5E, 3), 4);
        assert_eq!(profile.microarchitecture, M::Skylake);
        assert_eq!(profile.hardware_kind(), "intelcpu");
        assert!(matches!(
            profile.thermal,
            ThermalLayout::IntelDts { tjmax: TjMaxSource::Register { .. }, per_core: true, package: true }
        ));
        assert!(matches!(
            profile.energy,
            EnergyLayout::IntelRapl { unit: RaplUnit::PowerOfHalf, .. }
        ));
    }

    #[test]
    fn test_core2_tjmax_table() {
        let tjmax = |stepping, cores| match classify(&intel_identity(0x0F, stepping), cores).thermal {
            ThermalLayout::IntelDts { tjmax: TjMaxSource::Fixed(t), .. } => t,
            other => panic!("unexpected thermal layout {:?}", other),
        };
        assert_eq!(tjmax(0x06, 2), 90.0);
        assert_eq!(tjmax(0x06, 4), 100.0);
        assert_eq!(tjmax(0x06, 1), 95.0);
        assert_eq!(tjmax(0x0B, 2), 100.0);
        assert_eq!(tjmax(0x0D, 2), 95.0);
        assert_eq!(tjmax(0x02, 2), 95.0);
    }

    #[test]
    fn test_atom_tjmax_table() {
        let profile = classify(&intel_identity(0x1C, 0x0A), 1);
        assert_eq!(profile.microarchitecture, M::Atom);
        assert!(matches!(
            profile.thermal,
            ThermalLayout::IntelDts { tjmax: TjMaxSource::Fixed(t), .. } if t == 100.0
        ));
        assert_eq!(profile.energy, EnergyLayout::None);
    }

    #[test]
    fn test_missing_dts_capability_disables_core_sensors() {
        let mut identity = intel_identity(0x9E, 9);
        identity.capabilities.digital_thermal_sensor = false;
        identity.capabilities.package_thermal_sensor = false;
        let profile = classify(&identity, 4);
        assert!(matches!(
            profile.thermal,
            ThermalLayout::IntelDts { per_core: false, package: false, .. }
        ));
    }

    #[test]
    fn test_silvermont_uses_microjoule_unit() {
        let profile = classify(&intel_identity(0x37, 8), 4);
        assert!(matches!(
            profile.energy,
            EnergyLayout::IntelRapl { unit: RaplUnit::Microjoules, .. }
        ));
        assert_eq!(RaplUnit::Microjoules.joules(5), 32e-6);
        assert_eq!(RaplUnit::PowerOfHalf.joules(14), 1.0 / 16384.0);
    }

    #[test]
    fn test_netburst_and_nehalem() {
        let mut id = intel_identity(0x04, 1);
        id.family = 0x0F;
        assert_eq!(classify(&id, 1).microarchitecture, M::NetBurst);
        let nehalem = classify(&intel_identity(0x1E, 5), 4);
        assert_eq!(nehalem.microarchitecture, M::Nehalem);
        assert_eq!(nehalem.energy, EnergyLayout::None);
    }

    #[test]
    fn test_hybrid_designs() {
        assert!(classify(&intel_identity(0x97, 2), 16).microarchitecture.has_hybrid_cores());
        assert!(!classify(&intel_identity(0xA7, 1), 8).microarchitecture.has_hybrid_cores());
    }

    #[test]
    fn test_unknown_intel_model_is_degraded() {
        let profile = classify(&intel_identity(0x01, 0), 2);
        assert!(profile.is_degraded());
        assert_eq!(profile, DecodeProfile::degraded(Vendor::Intel));
        assert_eq!(profile.hardware_kind(), "genericcpu");
        assert!(profile.report_registers().is_empty());
    }

    #[test]
    fn test_unknown_vendor_is_degraded() {
        let mut id = intel_identity(0x5E, 3);
        id.vendor = Vendor::Unknown;
        assert!(classify(&id, 4).is_degraded());
    }

    #[test]
    fn test_classification_is_deterministic() {
        for rule in RULES {
            for &family in rule.families {
                let model = match rule.models {
                    Any => 0x01,
                    List(models) => models[0],
                    Range(lo, _) => lo,
                };
                let mut id = match rule.vendor {
                    Vendor::Amd => amd_identity(family, model, "AMD Test"),
                    _ => intel_identity(model, 1),
                };
                id.family = family;
                let first = classify(&id, 4);
                let second = classify(&id, 4);
                assert_eq!(first, second);
                assert!(!first.is_degraded(), "family {:#x} model {:#x}", family, model);
            }
        }
    }

    #[test]
    fn test_zen_brand_offsets() {
        let tdie = |brand| match classify(&amd_identity(0x17, 0x01, brand), 8).thermal {
            ThermalLayout::Zen { tdie_offset, .. } => tdie_offset,
            other => panic!("unexpected thermal layout {:?}", other),
        };
        assert_eq!(tdie("AMD Ryzen 7 1800X Eight-Core Processor"), -20.0);
        assert_eq!(tdie("AMD Ryzen Threadripper 2950X 16-Core Processor"), -27.0);
        assert_eq!(tdie("AMD Ryzen 7 2700X Eight-Core Processor"), -10.0);
        assert_eq!(tdie("AMD Ryzen 5 1600 Six-Core Processor"), 0.0);
    }

    #[test]
    fn test_zen_model_rows() {
        let matisse = classify(&amd_identity(0x17, 0x71, "AMD Ryzen 9 3900X"), 12);
        assert_eq!(matisse.microarchitecture, M::Zen2);
        assert_eq!(matisse.voltage, VoltageLayout::ZenSvi(Some(ZEN2_SVI)));
        assert!(matches!(matisse.thermal, ThermalLayout::Zen { ccd: Some(c), .. } if c.base == smn::CCD_TEMP_ZEN2));

        let raphael = classify(&amd_identity(0x19, 0x61, "AMD Ryzen 9 7950X"), 16);
        assert_eq!(raphael.microarchitecture, M::Zen4);
        assert!(matches!(raphael.voltage, VoltageLayout::ZenSvi(Some(s)) if s.telemetry_absent));

        // Unknown family 19h models keep Tctl but drop model-specific layouts
        let other = classify(&amd_identity(0x19, 0x50, "AMD Ryzen 7 5800U"), 8);
        assert_eq!(other.voltage, VoltageLayout::ZenSvi(None));
        assert!(matches!(other.thermal, ThermalLayout::Zen { ccd: None, .. }));
    }

    #[test]
    fn test_amd_family_15h_model_groups() {
        let bulldozer = classify(&amd_identity(0x15, 0x01, "AMD FX-8150"), 4);
        assert_eq!(bulldozer.microarchitecture, M::Bulldozer);
        assert_eq!(bulldozer.voltage, VoltageLayout::AmdCofVid(VidEncoding::Svi1));
        assert!(matches!(bulldozer.thermal, ThermalLayout::AmdReported { coarse: true, .. }));

        let carrizo = classify(&amd_identity(0x15, 0x60, "AMD A10-8700P"), 2);
        assert!(matches!(carrizo.thermal, ThermalLayout::AmdReported { via_smu: true, device_id: 0x1573, .. }));
        assert_eq!(carrizo.voltage, VoltageLayout::AmdCofVid(VidEncoding::Svi2));

        // 15h model 20h-2Fh was never released
        assert!(classify(&amd_identity(0x15, 0x20, "AMD"), 2).is_degraded());
    }

    #[test]
    fn test_k8_offsets_and_capability() {
        let mut id = amd_identity(0x0F, 0x6B, "AMD Athlon 64 X2");
        id.capabilities.amd_thermal_sensor = true;
        assert!(matches!(
            classify(&id, 2).thermal,
            ThermalLayout::AmdThermtrip { offset, .. } if offset == -28.0
        ));
        id.model = 0x6C;
        assert!(matches!(
            classify(&id, 2).thermal,
            ThermalLayout::AmdThermtrip { offset, .. } if offset == -49.0
        ));
        id.capabilities.amd_thermal_sensor = false;
        assert_eq!(classify(&id, 2).thermal, ThermalLayout::None);
    }
}
