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

//! Bit-field extraction and unit conversion of raw register values.
//!
//! Decoding is pure. A field whose validity rule fails, or whose conversion
//! has no answer for the extracted value, decodes to `None`.

/// `width` bits starting at bit `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub offset: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(offset: u8, width: u8) -> Self {
        BitField { offset, width }
    }

    pub const fn extract(self, raw: u64) -> u64 {
        let shifted = if self.offset >= 64 { 0 } else { raw >> self.offset };
        if self.width >= 64 {
            shifted
        } else {
            shifted & ((1u64 << self.width) - 1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Always,
    /// The register carries a "reading valid" flag at this bit.
    Bit(u8),
    /// Zero in the extracted field means "not reported".
    NonZero,
}

impl Validity {
    pub fn check(self, raw: u64, field: u64) -> bool {
        match self {
            Validity::Always => true,
            Validity::Bit(bit) => BitField::new(bit, 1).extract(raw) == 1,
            Validity::NonZero => field != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// `field * scale + bias`
    Linear { scale: f64, bias: f64 },
    /// Field value looked up in a table; unknown ids have no value.
    Lookup(&'static [(u64, f64)]),
    /// `target - slope * field`, the Intel digital thermal sensor readout.
    TargetMinusDelta { target: f64, slope: f64 },
}

impl Conversion {
    pub const IDENTITY: Conversion = Conversion::Linear { scale: 1.0, bias: 0.0 };

    pub fn apply(&self, field: u64) -> Option<f64> {
        let value = match *self {
            Conversion::Linear { scale, bias } => field as f64 * scale + bias,
            Conversion::Lookup(table) => lookup(table, field)?,
            Conversion::TargetMinusDelta { target, slope } => target - slope * field as f64,
        };
        value.is_finite().then_some(value)
    }
}

fn lookup(table: &[(u64, f64)], key: u64) -> Option<f64> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// One decodable quantity inside a register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub field: BitField,
    pub validity: Validity,
    pub conversion: Conversion,
}

impl FieldSpec {
    pub const fn new(field: BitField, validity: Validity, conversion: Conversion) -> Self {
        FieldSpec { field, validity, conversion }
    }

    /// The extracted field, if the validity rule holds.
    pub fn raw(&self, raw: u64) -> Option<u64> {
        let field = self.field.extract(raw);
        self.validity.check(raw, field).then_some(field)
    }

    pub fn decode(&self, raw: u64) -> Option<f64> {
        self.raw(raw).and_then(|f| self.conversion.apply(f))
    }

    /// Replaces the target and slope of a target-minus-delta conversion with
    /// user-adjusted values. Other conversions are returned unchanged.
    pub fn with_target(self, target: f64, slope: f64) -> Self {
        match self.conversion {
            Conversion::TargetMinusDelta { .. } => FieldSpec {
                conversion: Conversion::TargetMinusDelta { target, slope },
                ..self
            },
            _ => self,
        }
    }
}

pub fn decode(raw: u64, spec: &FieldSpec) -> Option<f64> {
    spec.decode(raw)
}

/// Intel digital thermal sensor readout in `IA32_(PACKAGE_)THERM_STATUS`.
pub const INTEL_DTS_TEMPERATURE: FieldSpec = FieldSpec::new(
    BitField::new(16, 7),
    Validity::Bit(31),
    Conversion::TargetMinusDelta { target: 100.0, slope: 1.0 },
);

/// The same readout as a plain distance below TjMax.
pub const INTEL_DTS_DISTANCE: FieldSpec =
    FieldSpec::new(BitField::new(16, 7), Validity::Bit(31), Conversion::IDENTITY);

/// TjMax in `IA32_TEMPERATURE_TARGET`.
pub const INTEL_TEMPERATURE_TARGET: FieldSpec =
    FieldSpec::new(BitField::new(16, 8), Validity::NonZero, Conversion::IDENTITY);

/// Core voltage in `IA32_PERF_STATUS`, 2^-13 V per step.
pub const INTEL_CORE_VOLTAGE: FieldSpec = FieldSpec::new(
    BitField::new(32, 16),
    Validity::NonZero,
    Conversion::Linear { scale: 1.0 / 8192.0, bias: 0.0 },
);

/// Energy status unit exponent shared by Intel RAPL and AMD Zen power units.
pub const ENERGY_STATUS_UNIT: BitField = BitField::new(8, 5);

/// Voltage identifier encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VidEncoding {
    /// AMD SVI1, 12.5 mV steps below 1.55 V.
    Svi1,
    /// AMD SVI2, 6.25 mV steps below 1.55 V.
    Svi2,
}

impl VidEncoding {
    pub fn volts(self, vid: u64) -> Option<f64> {
        match self {
            VidEncoding::Svi1 => (vid < 0x7C).then(|| 1.55 - 0.0125 * vid as f64),
            VidEncoding::Svi2 => (vid < 0xF8).then(|| 1.55 - 0.00625 * vid as f64),
        }
    }
}

/// AMD family 12h CPU divisor ids.
pub const LLANO_DIVISORS: &[(u64, f64)] = &[
    (0, 1.0),
    (1, 1.5),
    (2, 2.0),
    (3, 3.0),
    (4, 4.0),
    (5, 6.0),
    (6, 8.0),
    (7, 12.0),
    (8, 16.0),
];

/// How a clock multiplier is computed from its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplierFormula {
    /// Core 2 / NetBurst / Atom: bits 12:8 plus a half step in bit 14 (from `shift`).
    IntelHalfRatio { shift: u8 },
    /// Plain ratio field.
    IntelRatio(BitField),
    /// K8 FID: `0.5 * (fid + 8)`, fid at `shift`.
    AmdK8 { shift: u8 },
    /// Families 10h/11h/15h/16h: `0.5 * (fid + 0x10) / 2^did`.
    AmdK10,
    /// Family 12h: `(fid + 0x10) / divisor[did]`.
    AmdLlano,
    /// Family 14h. COFVID in bits 31:0, D18F3xD4 in bits 63:32:
    /// `(fid + 0x10) / (msd + lsd / 4 + 1)`.
    AmdBobcat,
    /// Family 17h onwards: `2 * fid / dfs`.
    AmdZen,
}

impl MultiplierFormula {
    pub fn multiplier(self, raw: u64) -> Option<f64> {
        let value = match self {
            MultiplierFormula::IntelHalfRatio { shift } => {
                let r = raw >> shift;
                BitField::new(8, 5).extract(r) as f64 + 0.5 * BitField::new(14, 1).extract(r) as f64
            }
            MultiplierFormula::IntelRatio(field) => field.extract(raw) as f64,
            MultiplierFormula::AmdK8 { shift } => {
                0.5 * (BitField::new(shift, 6).extract(raw) as f64 + 8.0)
            }
            MultiplierFormula::AmdK10 => {
                let fid = BitField::new(0, 5).extract(raw) as f64;
                let did = BitField::new(6, 3).extract(raw) as i32;
                0.5 * (fid + 16.0) / 2f64.powi(did)
            }
            MultiplierFormula::AmdLlano => {
                let fid = BitField::new(4, 5).extract(raw) as f64;
                let divisor = lookup(LLANO_DIVISORS, BitField::new(0, 4).extract(raw))?;
                (fid + 16.0) / divisor
            }
            MultiplierFormula::AmdBobcat => {
                let fid = BitField::new(32, 5).extract(raw) as f64;
                let msd = BitField::new(4, 5).extract(raw) as f64;
                let lsd = BitField::new(0, 4).extract(raw) as f64;
                (fid + 16.0) / (msd + lsd * 0.25 + 1.0)
            }
            MultiplierFormula::AmdZen => {
                let fid = BitField::new(0, 8).extract(raw) as f64;
                let dfs = BitField::new(8, 6).extract(raw) as f64;
                if dfs == 0.0 {
                    return None;
                }
                2.0 * fid / dfs
            }
        };
        (value.is_finite() && value > 0.0).then_some(value)
    }
}
