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

//! Scoped pinning of the calling thread to one logical processor.

use tracing::warn;

use crate::error::{Result, TelemetryError};
use crate::topology::Affinity;

/// Set of logical processors, kept sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuMask(Vec<usize>);

impl CpuMask {
    pub fn single(cpu: Affinity) -> Self {
        CpuMask(vec![cpu.cpu()])
    }

    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut v: Vec<usize> = cpus.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        CpuMask(v)
    }

    pub fn cpus(&self) -> &[usize] {
        &self.0
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.0.binary_search(&cpu).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a kernel cpu list such as `0-7,16,18-19`.
    pub fn parse_list(list: &str) -> Result<Self> {
        let invalid = || TelemetryError::topology(format!("invalid cpu list '{}'", list.trim()));
        let mut cpus = Vec::new();
        for part in list.trim().split(',').filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.parse().map_err(|_| invalid())?;
                    let hi: usize = hi.parse().map_err(|_| invalid())?;
                    if hi < lo {
                        return Err(invalid());
                    }
                    cpus.extend(lo..=hi);
                }
                None => cpus.push(part.parse().map_err(|_| invalid())?),
            }
        }
        Ok(CpuMask::from_cpus(cpus))
    }
}

/// Reads and changes the affinity of the calling thread.
#[cfg_attr(test, mockall::automock)]
pub trait AffinityControl: Send + Sync {
    fn current(&self) -> Result<CpuMask>;
    fn set(&self, mask: &CpuMask) -> Result<()>;
}

/// Restores the previous affinity of the calling thread when dropped.
///
/// Restoring happens on every exit path of the pinned scope, including early
/// returns and unwinding.
pub struct AffinityGuard<'a> {
    control: &'a dyn AffinityControl,
    previous: CpuMask,
}

impl<'a> AffinityGuard<'a> {
    pub fn pin(control: &'a dyn AffinityControl, cpu: Affinity) -> Result<Self> {
        let previous = control.current()?;
        if let Err(e) = control.set(&CpuMask::single(cpu)) {
            // A partially applied mask must not outlive the failed pin
            if let Err(restore) = control.set(&previous) {
                warn!(%cpu, error = %restore, "Failed to restore thread affinity");
            }
            return Err(e);
        }
        Ok(AffinityGuard { control, previous })
    }

    pub fn previous(&self) -> &CpuMask {
        &self.previous
    }
}

impl Drop for AffinityGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.control.set(&self.previous) {
            warn!(error = %e, "Failed to restore thread affinity");
        }
    }
}

/// Affinity of the calling OS thread via `sched_getaffinity`/`sched_setaffinity`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadAffinity;

#[cfg(target_os = "linux")]
impl AffinityControl for ThreadAffinity {
    fn current(&self) -> Result<CpuMask> {
        // SAFETY: cpu_set_t is plain data and all zeroes is the empty set.
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        // SAFETY: pid 0 is the calling thread and `set` is large enough.
        let rc = unsafe {
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set)
        };
        if rc != 0 {
            return Err(TelemetryError::affinity(format!(
                "sched_getaffinity failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let cpus = (0..libc::CPU_SETSIZE as usize).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) });
        Ok(CpuMask::from_cpus(cpus))
    }

    fn set(&self, mask: &CpuMask) -> Result<()> {
        if mask.is_empty() {
            return Err(TelemetryError::affinity("refusing to apply an empty cpu mask"));
        }
        // SAFETY: see `current`.
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for &cpu in mask.cpus() {
            if cpu >= libc::CPU_SETSIZE as usize {
                return Err(TelemetryError::affinity(format!("cpu {} out of range", cpu)));
            }
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }
        // SAFETY: pid 0 is the calling thread and `set` is fully initialised.
        let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
        if rc != 0 {
            return Err(TelemetryError::affinity(format!(
                "sched_setaffinity({:?}) failed: {}",
                mask.cpus(),
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl AffinityControl for ThreadAffinity {
    fn current(&self) -> Result<CpuMask> {
        Err(TelemetryError::NotSupported("thread affinity".to_string()))
    }

    fn set(&self, _mask: &CpuMask) -> Result<()> {
        Err(TelemetryError::NotSupported("thread affinity".to_string()))
    }
}
