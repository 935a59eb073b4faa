/*
 * Test utilities and fakes for Corewatch
 *
 * This module provides processor identities, a manual clock, synthetic
 * counters and in-memory register channels shared by the unit tests.
 */

#[cfg(test)]
pub mod test_utils {
    use crate::access::{IndexPort, PciAddress, RegisterAccess};
    use crate::affinity::{AffinityControl, CpuMask};
    use crate::calibrate::{CycleCounter, TimeSource};
    use crate::error::{Result, TelemetryError};
    use crate::topology::{Affinity, Capabilities, Core, Package, ProcessorIdentity, Vendor};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Creates an Intel family 6 identity with every capability present
    pub fn intel_identity(model: u32, stepping: u32) -> ProcessorIdentity {
        ProcessorIdentity {
            vendor: Vendor::Intel,
            family: 0x06,
            model,
            stepping,
            brand: "Intel(R) Core(TM) Test CPU @ 3.00GHz".to_string(),
            package: 0,
            core: 0,
            thread: 0,
            affinity: Affinity::new(0),
            capabilities: Capabilities {
                time_stamp_counter: true,
                invariant_tsc: true,
                model_specific_registers: true,
                digital_thermal_sensor: true,
                package_thermal_sensor: true,
                amd_thermal_sensor: true,
            },
        }
    }

    /// Creates an AMD identity with an invariant TSC and no Intel thermal flags
    pub fn amd_identity(family: u32, model: u32, brand: &str) -> ProcessorIdentity {
        ProcessorIdentity {
            vendor: Vendor::Amd,
            family,
            model,
            stepping: 0,
            brand: brand.to_string(),
            package: 0,
            core: 0,
            thread: 0,
            affinity: Affinity::new(0),
            capabilities: Capabilities {
                time_stamp_counter: true,
                invariant_tsc: true,
                model_specific_registers: true,
                digital_thermal_sensor: false,
                package_thermal_sensor: false,
                amd_thermal_sensor: false,
            },
        }
    }

    /// Builds a package of `cores` cores with one thread each, numbered from 0
    pub fn create_package(identity: &ProcessorIdentity, cores: usize) -> Package {
        create_package_with_threads(identity, cores, 1)
    }

    pub fn create_package_with_threads(identity: &ProcessorIdentity, cores: usize, threads: usize) -> Package {
        let cores = (0..cores)
            .map(|c| Core {
                id: c as u32,
                threads: (0..threads)
                    .map(|t| ProcessorIdentity {
                        core: c as u32,
                        thread: t as u32,
                        affinity: Affinity::new(c * threads + t),
                        ..identity.clone()
                    })
                    .collect(),
            })
            .collect();
        Package::new(0, cores).unwrap()
    }

    /// A clock that only moves when read or advanced.
    ///
    /// Every `ticks()` returns the current value and then moves it forward by
    /// `step` nanoseconds, so busy-wait loops terminate.
    pub struct ManualClock {
        now: AtomicU64,
        step: u64,
    }

    impl ManualClock {
        pub fn with_step(step: u64) -> Self {
            ManualClock { now: AtomicU64::new(0), step }
        }

        pub fn peek(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }

        pub fn advance(&self, ticks: u64) {
            self.now.fetch_add(ticks, Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualClock {
        fn ticks(&self) -> u64 {
            self.now.fetch_add(self.step, Ordering::SeqCst)
        }

        fn ticks_per_second(&self) -> u64 {
            1_000_000_000
        }
    }

    /// A cycle counter running at exactly `hz` relative to a [`ManualClock`]
    pub struct SyntheticCounter {
        clock: Arc<ManualClock>,
        hz: f64,
    }

    impl SyntheticCounter {
        pub fn new(clock: Arc<ManualClock>, hz: f64) -> Self {
            SyntheticCounter { clock, hz }
        }
    }

    impl CycleCounter for SyntheticCounter {
        fn cycles(&self) -> Option<u64> {
            Some((self.clock.peek() as f64 * self.hz / 1e9) as u64)
        }
    }

    /// In-memory register channel. Unset registers read as `None`.
    #[derive(Default)]
    pub struct FakeRegisters {
        msrs: Mutex<HashMap<(usize, u32), u64>>,
        pci: Mutex<HashMap<(PciAddress, u32), u32>>,
        indexed: Mutex<HashMap<(u32, u32), u32>>,
        msr_reads: AtomicU64,
    }

    impl FakeRegisters {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_msr(&self, cpu: usize, address: u32, value: u64) {
            self.msrs.lock().insert((cpu, address), value);
        }

        /// Sets the same MSR value on every cpu in `cpus`
        pub fn set_msr_all(&self, cpus: std::ops::Range<usize>, address: u32, value: u64) {
            for cpu in cpus {
                self.set_msr(cpu, address, value);
            }
        }

        pub fn clear_msr(&self, cpu: usize, address: u32) {
            self.msrs.lock().remove(&(cpu, address));
        }

        pub fn set_pci(&self, device: PciAddress, offset: u32, value: u32) {
            self.pci.lock().insert((device, offset), value);
        }

        pub fn set_indexed(&self, port: IndexPort, address: u32, value: u32) {
            self.indexed.lock().insert((port.index_offset, address), value);
        }

        pub fn clear_indexed(&self, port: IndexPort, address: u32) {
            self.indexed.lock().remove(&(port.index_offset, address));
        }

        pub fn msr_reads(&self) -> u64 {
            self.msr_reads.load(Ordering::SeqCst)
        }
    }

    impl RegisterAccess for FakeRegisters {
        fn read_msr(&self, cpu: Affinity, address: u32) -> Option<u64> {
            self.msr_reads.fetch_add(1, Ordering::SeqCst);
            self.msrs.lock().get(&(cpu.cpu(), address)).copied()
        }

        fn read_pci_config(&self, device: PciAddress, offset: u32) -> Option<u32> {
            self.pci.lock().get(&(device, offset)).copied()
        }

        fn read_indexed(&self, port: IndexPort, address: u32) -> Option<u32> {
            self.indexed.lock().get(&(port.index_offset, address)).copied()
        }
    }

    /// Affinity control that records every mask it is asked to apply
    pub struct RecordingAffinity {
        current: Mutex<CpuMask>,
        applied: Mutex<Vec<CpuMask>>,
        refuse: Mutex<Option<usize>>,
    }

    impl RecordingAffinity {
        pub fn new(cpus: usize) -> Self {
            RecordingAffinity {
                current: Mutex::new(CpuMask::from_cpus(0..cpus)),
                applied: Mutex::new(Vec::new()),
                refuse: Mutex::new(None),
            }
        }

        /// Makes pinning to `cpu` fail
        pub fn refuse_cpu(&self, cpu: usize) {
            *self.refuse.lock() = Some(cpu);
        }

        pub fn current_mask(&self) -> CpuMask {
            self.current.lock().clone()
        }

        pub fn applied(&self) -> Vec<CpuMask> {
            self.applied.lock().clone()
        }
    }

    impl AffinityControl for RecordingAffinity {
        fn current(&self) -> Result<CpuMask> {
            Ok(self.current.lock().clone())
        }

        fn set(&self, mask: &CpuMask) -> Result<()> {
            self.applied.lock().push(mask.clone());
            if let Some(cpu) = *self.refuse.lock() {
                if mask.cpus() == [cpu] {
                    return Err(TelemetryError::affinity(format!("cpu {} is offline", cpu)));
                }
            }
            *self.current.lock() = mask.clone();
            Ok(())
        }
    }
}
