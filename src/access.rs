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

//! Privileged register access channel.
//!
//! Every read returns `None` when the register could not be read. Callers treat
//! that as "no value this cycle", never as a fatal error.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, TelemetryError};
use crate::topology::Affinity;

pub const DEFAULT_MSR_ROOT: &str = "/dev/cpu";
pub const DEFAULT_PCI_ROOT: &str = "/sys/bus/pci/devices";

/// Bus/device/function triple of a PCI function on segment 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// Host bridge / root complex, 00:00.0.
    pub const ROOT_COMPLEX: PciAddress = PciAddress::new(0, 0, 0);

    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        PciAddress { bus, device, function }
    }

    fn sysfs_name(&self) -> String {
        format!("0000:{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

/// An indirect address/data register pair in a PCI function's configuration
/// space. The address is written at `index_offset`, the data read four bytes
/// later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexPort {
    pub device: PciAddress,
    pub index_offset: u32,
}

impl IndexPort {
    /// AMD system management network, reached through the root complex.
    pub const SMN: IndexPort = IndexPort { device: PciAddress::ROOT_COMPLEX, index_offset: 0x60 };
    /// Family 15h SMU register window.
    pub const SMU: IndexPort = IndexPort { device: PciAddress::ROOT_COMPLEX, index_offset: 0xB8 };
}

#[cfg_attr(test, mockall::automock)]
pub trait RegisterAccess: Send + Sync {
    /// Reads a model-specific register on logical processor `cpu`. The caller
    /// is responsible for running on that processor.
    fn read_msr(&self, cpu: Affinity, address: u32) -> Option<u64>;

    /// Reads one dword of PCI configuration space.
    fn read_pci_config(&self, device: PciAddress, offset: u32) -> Option<u32>;

    /// Reads a side-band register through an index/data port pair. The caller
    /// must hold the side-band bus lock.
    fn read_indexed(&self, port: IndexPort, address: u32) -> Option<u32>;
}

/// Linux channel over the `msr` driver and PCI configuration files in sysfs.
pub struct LinuxRegisterChannel {
    msr_root: PathBuf,
    pci_root: PathBuf,
    msr_files: Mutex<HashMap<usize, File>>,
}

impl LinuxRegisterChannel {
    pub fn new() -> Self {
        Self::with_roots(DEFAULT_MSR_ROOT, DEFAULT_PCI_ROOT)
    }

    pub fn with_roots(msr_root: impl Into<PathBuf>, pci_root: impl Into<PathBuf>) -> Self {
        LinuxRegisterChannel {
            msr_root: msr_root.into(),
            pci_root: pci_root.into(),
            msr_files: Mutex::new(HashMap::new()),
        }
    }

    fn msr_path(&self, cpu: Affinity) -> PathBuf {
        self.msr_root.join(cpu.cpu().to_string()).join("msr")
    }

    fn config_path(&self, device: PciAddress) -> PathBuf {
        self.pci_root.join(device.sysfs_name()).join("config")
    }

    /// Checks that the MSR device of `cpu` can be opened.
    pub fn probe(&self, cpu: Affinity) -> Result<()> {
        let path = self.msr_path(cpu);
        match File::open(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TelemetryError::ChannelUnavailable(
                format!("{} not found (is the msr kernel module loaded?)", path.display()),
            )),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(
                TelemetryError::PermissionDenied(format!("{} requires root", path.display())),
            ),
            Err(e) => Err(TelemetryError::file_read(path, e)),
        }
    }

    fn read_config_dword(path: &Path, offset: u32) -> io::Result<u32> {
        let file = File::open(path)?;
        let mut buf = [0u8; 4];
        file.read_exact_at(&mut buf, offset as u64)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl Default for LinuxRegisterChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAccess for LinuxRegisterChannel {
    fn read_msr(&self, cpu: Affinity, address: u32) -> Option<u64> {
        let mut files = self.msr_files.lock();
        if !files.contains_key(&cpu.cpu()) {
            let path = self.msr_path(cpu);
            match File::open(&path) {
                Ok(f) => {
                    files.insert(cpu.cpu(), f);
                }
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "Failed to open msr device");
                    return None;
                }
            }
        }
        let file = files.get(&cpu.cpu())?;
        let mut buf = [0u8; 8];
        match file.read_exact_at(&mut buf, address as u64) {
            Ok(()) => Some(u64::from_le_bytes(buf)),
            Err(e) => {
                trace!(%cpu, address = format_args!("{:#x}", address), error = %e, "MSR read failed");
                None
            }
        }
    }

    fn read_pci_config(&self, device: PciAddress, offset: u32) -> Option<u32> {
        let path = self.config_path(device);
        match Self::read_config_dword(&path, offset) {
            Ok(v) => Some(v),
            Err(e) => {
                trace!(%device, offset = format_args!("{:#x}", offset), error = %e, "PCI config read failed");
                None
            }
        }
    }

    fn read_indexed(&self, port: IndexPort, address: u32) -> Option<u32> {
        let path = self.config_path(port.device);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to open index port");
                return None;
            }
        };
        if let Err(e) = file.write_all_at(&address.to_le_bytes(), port.index_offset as u64) {
            trace!(address = format_args!("{:#x}", address), error = %e, "Index write failed");
            return None;
        }
        let mut buf = [0u8; 4];
        match file.read_exact_at(&mut buf, (port.index_offset + 4) as u64) {
            Ok(()) => Some(u32::from_le_bytes(buf)),
            Err(e) => {
                trace!(address = format_args!("{:#x}", address), error = %e, "Data read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_msr_file(root: &Path, cpu: usize, address: u32, value: u64) {
        let dir = root.join(cpu.to_string());
        fs::create_dir_all(&dir).unwrap();
        let mut data = vec![0u8; address as usize + 8];
        data[address as usize..address as usize + 8].copy_from_slice(&value.to_le_bytes());
        fs::write(dir.join("msr"), data).unwrap();
    }

    #[test]
    fn test_read_msr_from_device_file() {
        let tmp = TempDir::new().unwrap();
        write_msr_file(tmp.path(), 1, 0x19C, 0x8843_0000);
        let channel = LinuxRegisterChannel::with_roots(tmp.path(), tmp.path());
        assert_eq!(channel.read_msr(Affinity::new(1), 0x19C), Some(0x8843_0000));
        // Past the end of the file
        assert_eq!(channel.read_msr(Affinity::new(1), 0x1000), None);
        // No device for this cpu
        assert_eq!(channel.read_msr(Affinity::new(7), 0x19C), None);
    }

    #[test]
    fn test_probe_reports_missing_driver() {
        let tmp = TempDir::new().unwrap();
        let channel = LinuxRegisterChannel::with_roots(tmp.path(), tmp.path());
        let err = channel.probe(Affinity::new(0)).unwrap_err();
        assert!(matches!(err, TelemetryError::ChannelUnavailable(_)));
    }

    #[test]
    fn test_read_pci_config_dword() {
        let tmp = TempDir::new().unwrap();
        let device = PciAddress::new(0, 0x18, 3);
        let dir = tmp.path().join("0000:00:18.3");
        fs::create_dir_all(&dir).unwrap();
        let mut config = vec![0u8; 256];
        config[0..4].copy_from_slice(&0x1203_1022u32.to_le_bytes());
        config[0xA4..0xA8].copy_from_slice(&0x2A80_0000u32.to_le_bytes());
        fs::write(dir.join("config"), config).unwrap();

        let channel = LinuxRegisterChannel::with_roots(tmp.path(), tmp.path());
        assert_eq!(channel.read_pci_config(device, 0), Some(0x1203_1022));
        assert_eq!(channel.read_pci_config(device, 0xA4), Some(0x2A80_0000));
        assert_eq!(channel.read_pci_config(PciAddress::new(0, 0x19, 3), 0), None);
    }

    #[test]
    fn test_read_indexed_writes_address_then_reads_data() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("0000:00:00.0");
        fs::create_dir_all(&dir).unwrap();
        let mut config = vec![0u8; 256];
        config[0x64..0x68].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        fs::write(dir.join("config"), config).unwrap();

        let channel = LinuxRegisterChannel::with_roots(tmp.path(), tmp.path());
        assert_eq!(channel.read_indexed(IndexPort::SMN, 0x0005_9800), Some(0xDEAD_BEEF));
        // The address landed in the index register
        let written = fs::read(dir.join("config")).unwrap();
        assert_eq!(&written[0x60..0x64], &0x0005_9800u32.to_le_bytes());
    }

    #[test]
    fn test_pci_address_display() {
        assert_eq!(PciAddress::new(0, 0x18, 3).to_string(), "00:18.3");
        assert_eq!(PciAddress::new(0, 0x18, 3).sysfs_name(), "0000:00:18.3");
    }
}
