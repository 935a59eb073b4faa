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

//! Time-stamp counter frequency calibration.
//!
//! The startup estimate busy-waits for short, precisely bounded windows and
//! compares the counter against a monotonic clock. The error of each window is
//! how late the two boundary samples were taken, relative to the window. On
//! invariant counters a cheap sliding estimate then follows the clock on every
//! update cycle.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::affinity::{AffinityControl, AffinityGuard};
use crate::topology::Affinity;

/// Monotonic time in integer ticks.
pub trait TimeSource: Send + Sync {
    fn ticks(&self) -> u64;
    fn ticks_per_second(&self) -> u64;

    fn seconds(&self) -> f64 {
        self.ticks() as f64 / self.ticks_per_second() as f64
    }
}

/// A free-running cycle counter.
pub trait CycleCounter: Send + Sync {
    fn cycles(&self) -> Option<u64>;
}

/// Nanoseconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// The processor's time-stamp counter, read with `rdtsc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeStampCounter;

impl CycleCounter for TimeStampCounter {
    #[cfg(target_arch = "x86_64")]
    fn cycles(&self) -> Option<u64> {
        // SAFETY: rdtsc has no preconditions on x86_64.
        Some(unsafe { core::arch::x86_64::_rdtsc() })
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn cycles(&self) -> Option<u64> {
        None
    }
}

pub const MAX_ATTEMPTS: usize = 5;
pub const TARGET_ERROR: f64 = 1e-4;
pub const FIRST_WINDOW: Duration = Duration::from_millis(25);
pub const WINDOW_STEP: Duration = Duration::from_millis(5);

/// Longest clock-counter-clock round trip accepted by the sliding estimate.
pub const MAX_SAMPLE_LATENCY: f64 = 1e-4;
/// Sliding windows outside this range (seconds) are not used.
pub const SLIDING_WINDOW: (f64, f64) = (0.5, 2.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyEstimate {
    pub frequency_mhz: f64,
    /// Relative error bound of `frequency_mhz`.
    pub error: f64,
}

fn wait_until(clock: &dyn TimeSource, deadline: u64) {
    while clock.ticks() < deadline {
        std::hint::spin_loop();
    }
}

/// Measures the counter frequency over one window.
pub fn measure_window(
    clock: &dyn TimeSource,
    counter: &dyn CycleCounter,
    window: Duration,
) -> Option<FrequencyEstimate> {
    let tps = clock.ticks_per_second();
    let ticks = (window.as_secs_f64() * tps as f64) as u64;
    if ticks == 0 {
        return None;
    }
    // Start slightly in the future so the first boundary is a clean edge
    let time_begin = clock.ticks() + (0.001 * ticks as f64).ceil() as u64;
    let time_end = time_begin + ticks;

    wait_until(clock, time_begin);
    let count_begin = counter.cycles()?;
    let after_begin = clock.ticks();

    wait_until(clock, time_end);
    let count_end = counter.cycles()?;
    let after_end = clock.ticks();

    let window_ticks = ticks as f64;
    let cycles = count_end.wrapping_sub(count_begin) as f64;
    let frequency_mhz = 1e-6 * cycles * tps as f64 / window_ticks;
    let error = after_begin.saturating_sub(time_begin) as f64 / window_ticks
        + after_end.saturating_sub(time_end) as f64 / window_ticks;

    trace!(frequency_mhz, error, window_ms = window.as_millis() as u64, "Calibration window");
    Some(FrequencyEstimate { frequency_mhz, error })
}

/// Best of up to [`MAX_ATTEMPTS`] windows of growing length, stopping early
/// once a window is accurate to [`TARGET_ERROR`].
pub fn estimate_frequency(clock: &dyn TimeSource, counter: &dyn CycleCounter) -> Option<FrequencyEstimate> {
    let mut best: Option<FrequencyEstimate> = None;
    for attempt in 0..MAX_ATTEMPTS {
        let window = FIRST_WINDOW + WINDOW_STEP * attempt as u32;
        let Some(sample) = measure_window(clock, counter, window) else { continue };
        if best.map_or(true, |b| sample.error < b.error) {
            best = Some(sample);
        }
        if sample.error < TARGET_ERROR {
            break;
        }
    }
    if let Some(b) = best {
        debug!(frequency_mhz = b.frequency_mhz, error = b.error, "Estimated time-stamp counter frequency");
    }
    best
}

/// [`estimate_frequency`] pinned to one logical processor.
pub fn estimate_frequency_on(
    affinity: &dyn AffinityControl,
    cpu: Affinity,
    clock: &dyn TimeSource,
    counter: &dyn CycleCounter,
) -> Option<FrequencyEstimate> {
    let _pinned = match AffinityGuard::pin(affinity, cpu) {
        Ok(g) => g,
        Err(e) => {
            warn!(%cpu, error = %e, "Cannot pin for calibration");
            return None;
        }
    };
    estimate_frequency(clock, counter)
}

/// Counter frequency as tracked across update cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    estimate: Option<FrequencyEstimate>,
    frequency_mhz: f64,
    last_cycles: u64,
    last_ticks: Option<u64>,
}

impl CalibrationState {
    pub fn seeded(estimate: Option<FrequencyEstimate>) -> Self {
        CalibrationState {
            estimate,
            frequency_mhz: estimate.map_or(0.0, |e| e.frequency_mhz),
            last_cycles: 0,
            last_ticks: None,
        }
    }

    /// The startup estimate.
    pub fn estimate(&self) -> Option<FrequencyEstimate> {
        self.estimate
    }

    /// Current frequency in MHz, zero when unknown.
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_mhz
    }

    /// Sliding update. Returns whether the frequency changed.
    pub fn refresh(&mut self, clock: &dyn TimeSource, counter: &dyn CycleCounter) -> bool {
        let first = clock.ticks();
        let Some(cycles) = counter.cycles() else { return false };
        let now = clock.ticks();
        let tps = clock.ticks_per_second() as f64;

        if now.saturating_sub(first) as f64 / tps >= MAX_SAMPLE_LATENCY {
            trace!("Discarding slow counter sample");
            return false;
        }

        let mut updated = false;
        if let Some(last) = self.last_ticks {
            let delta = now.saturating_sub(last) as f64 / tps;
            if delta > SLIDING_WINDOW.0 && delta < SLIDING_WINDOW.1 {
                self.frequency_mhz = cycles.wrapping_sub(self.last_cycles) as f64 / (1e6 * delta);
                updated = true;
            }
        }
        self.last_cycles = cycles;
        self.last_ticks = Some(now);
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{ManualClock, SyntheticCounter};
    use std::sync::Arc;

    const GHZ3: f64 = 3.0e9;

    #[test]
    fn test_window_estimate_within_declared_error() {
        // Every clock read advances 1 µs; the counter reads the same virtual time.
        let clock = Arc::new(ManualClock::with_step(1_000));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let est = measure_window(clock.as_ref(), &counter, FIRST_WINDOW).unwrap();
        let relative = (est.frequency_mhz * 1e6 - GHZ3).abs() / GHZ3;
        assert!(est.error > 0.0);
        assert!(relative <= est.error + 1e-12, "relative {} error {}", relative, est.error);
    }

    #[test]
    fn test_estimate_keeps_lowest_error() {
        let clock = Arc::new(ManualClock::with_step(1_000));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let est = estimate_frequency(clock.as_ref(), &counter).unwrap();
        assert!(est.error < 2e-4);
        assert!((est.frequency_mhz - 3000.0).abs() <= 3000.0 * est.error + 1e-9);
    }

    #[test]
    fn test_coarse_clock_reports_larger_error() {
        // 50 µs per read: each boundary is missed by up to two steps
        let clock = Arc::new(ManualClock::with_step(50_000));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let est = estimate_frequency(clock.as_ref(), &counter).unwrap();
        assert!(est.error >= TARGET_ERROR);
        assert!((est.frequency_mhz - 3000.0).abs() <= 3000.0 * est.error + 1e-9);
    }

    #[test]
    fn test_no_counter_no_estimate() {
        struct Absent;
        impl CycleCounter for Absent {
            fn cycles(&self) -> Option<u64> {
                None
            }
        }
        let clock = ManualClock::with_step(1_000);
        assert_eq!(estimate_frequency(&clock, &Absent), None);
    }

    #[test]
    fn test_sliding_refresh_tracks_frequency() {
        let clock = Arc::new(ManualClock::with_step(0));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let mut state = CalibrationState::seeded(None);
        assert_eq!(state.frequency_mhz(), 0.0);

        assert!(!state.refresh(clock.as_ref(), &counter));
        clock.advance(1_000_000_000);
        assert!(state.refresh(clock.as_ref(), &counter));
        assert!((state.frequency_mhz() - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sliding_refresh_ignores_implausible_windows() {
        let clock = Arc::new(ManualClock::with_step(0));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let estimate = FrequencyEstimate { frequency_mhz: 2999.0, error: 1e-5 };
        let mut state = CalibrationState::seeded(Some(estimate));

        state.refresh(clock.as_ref(), &counter);
        clock.advance(100_000_000); // 0.1 s is too short
        assert!(!state.refresh(clock.as_ref(), &counter));
        assert_eq!(state.frequency_mhz(), 2999.0);

        clock.advance(5_000_000_000); // 5 s is too long
        assert!(!state.refresh(clock.as_ref(), &counter));
        assert_eq!(state.frequency_mhz(), 2999.0);

        // The long window still became the new baseline
        clock.advance(1_000_000_000);
        assert!(state.refresh(clock.as_ref(), &counter));
        assert!((state.frequency_mhz() - 3000.0).abs() < 1e-6);
        assert_eq!(state.estimate(), Some(estimate));
    }

    #[test]
    fn test_sliding_refresh_discards_slow_reads() {
        // 200 µs between the two clock reads
        let clock = Arc::new(ManualClock::with_step(200_000));
        let counter = SyntheticCounter::new(Arc::clone(&clock), GHZ3);
        let mut state = CalibrationState::seeded(None);
        assert!(!state.refresh(clock.as_ref(), &counter));
        clock.advance(1_000_000_000);
        assert!(!state.refresh(clock.as_ref(), &counter));
        assert_eq!(state.frequency_mhz(), 0.0);
    }
}
