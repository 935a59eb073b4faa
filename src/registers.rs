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

//! Register addresses.

/// Model-specific registers.
pub mod msr {
    // Intel
    pub const MSR_PLATFORM_INFO: u32 = 0xCE;
    pub const IA32_PERF_STATUS: u32 = 0x198;
    pub const IA32_THERM_STATUS: u32 = 0x19C;
    pub const IA32_TEMPERATURE_TARGET: u32 = 0x1A2;
    pub const IA32_PACKAGE_THERM_STATUS: u32 = 0x1B1;
    pub const MSR_RAPL_POWER_UNIT: u32 = 0x606;
    pub const MSR_PKG_ENERGY_STATUS: u32 = 0x611;
    pub const MSR_DRAM_ENERGY_STATUS: u32 = 0x619;
    pub const MSR_PP0_ENERGY_STATUS: u32 = 0x639;
    pub const MSR_PP1_ENERGY_STATUS: u32 = 0x641;
    pub const MSR_PLATFORM_ENERGY_STATUS: u32 = 0x64D;

    // AMD
    pub const FIDVID_STATUS: u32 = 0xC001_0042;
    pub const PSTATE_0: u32 = 0xC001_0064;
    pub const COFVID_STATUS: u32 = 0xC001_0071;
    pub const HW_PSTATE_STATUS: u32 = 0xC001_0293;
    pub const PWR_UNIT: u32 = 0xC001_0299;
    pub const CORE_ENERGY_STATUS: u32 = 0xC001_029A;
    pub const PKG_ENERGY_STATUS: u32 = 0xC001_029B;
}

/// AMD system management network addresses (through [`crate::access::IndexPort::SMN`]).
pub mod smn {
    pub const THM_TCON_CUR_TMP: u32 = 0x0005_9800;
    pub const SVI_TELEMETRY_BASE: u32 = 0x0005_A000;
    /// Offset of the telemetry-plane "not present" flags from the SVI base.
    pub const SVI_TFN_OFFSET: u32 = 0x8;
    pub const CCD_TEMP_ZEN2: u32 = 0x0005_9954;
    pub const CCD_TEMP_ZEN4: u32 = 0x0005_9B08;
}

/// Family 15h SMU register (through [`crate::access::IndexPort::SMU`]).
pub mod smu {
    pub const REPORTED_TEMPERATURE: u32 = 0xD820_0CA4;
}

/// Offsets in the AMD northbridge miscellaneous control function (D18F3).
pub mod pci {
    pub const MISC_CONTROL_DEVICE_BASE: u8 = 0x18;
    pub const MISC_CONTROL_FUNCTION: u8 = 3;
    pub const DEVICE_VENDOR_ID: u32 = 0x00;
    pub const REPORTED_TEMPERATURE_CONTROL: u32 = 0xA4;
    pub const CLOCK_POWER_TIMING_CONTROL_2: u32 = 0xD4;
    pub const THERMTRIP_STATUS: u32 = 0xE4;
    pub const AMD_VENDOR_ID: u16 = 0x1022;
}
