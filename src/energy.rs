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

//! Power from 32-bit energy counters.

/// Samples closer together than this (seconds) are rejected.
pub const MIN_SAMPLE_INTERVAL: f64 = 0.01;

/// Converts successive readings of one wrapping energy counter into watts.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyAccumulator {
    joules_per_count: f64,
    last: Option<(u32, f64)>,
}

impl EnergyAccumulator {
    pub fn new(joules_per_count: f64) -> Self {
        EnergyAccumulator { joules_per_count, last: None }
    }

    pub fn unit(&self) -> f64 {
        self.joules_per_count
    }

    pub fn is_seeded(&self) -> bool {
        self.last.is_some()
    }

    /// Feeds one counter reading taken at `now` seconds.
    ///
    /// The first reading only seeds the baseline. A reading less than
    /// [`MIN_SAMPLE_INTERVAL`] after the baseline is ignored and leaves the
    /// baseline in place. A counter that wrapped once between readings is
    /// accounted for by the modular difference.
    pub fn sample(&mut self, counter: u32, now: f64) -> Option<f64> {
        let Some((previous, then)) = self.last else {
            self.last = Some((counter, now));
            return None;
        };
        let elapsed = now - then;
        if elapsed.is_nan() || elapsed < MIN_SAMPLE_INTERVAL {
            return None;
        }
        self.last = Some((counter, now));
        let delta = counter.wrapping_sub(previous);
        Some(self.joules_per_count * delta as f64 / elapsed)
    }

    /// Forgets the baseline; the next reading seeds again.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_only_seeds() {
        let mut acc = EnergyAccumulator::new(0.1);
        assert!(!acc.is_seeded());
        assert_eq!(acc.sample(1000, 0.0), None);
        assert!(acc.is_seeded());
    }

    #[test]
    fn test_power_from_delta() {
        let mut acc = EnergyAccumulator::new(0.1);
        acc.sample(1000, 0.0);
        let watts = acc.sample(1500, 10.0).unwrap();
        assert!((watts - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_wrap() {
        let mut acc = EnergyAccumulator::new(1.0);
        let previous = u32::MAX - 99;
        acc.sample(previous, 0.0);
        let watts = acc.sample(50, 1.0).unwrap();
        let expected = (4_294_967_296u64 - previous as u64 + 50) as f64;
        assert_eq!(watts, expected);
        assert!(watts >= 0.0);
    }

    #[test]
    fn test_short_interval_keeps_baseline() {
        let mut acc = EnergyAccumulator::new(1.0);
        acc.sample(0, 1.0);
        assert_eq!(acc.sample(10, 1.005), None);
        // Baseline is still the reading at t = 1.0
        let watts = acc.sample(100, 2.0).unwrap();
        assert!((watts - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_going_backwards_is_rejected() {
        let mut acc = EnergyAccumulator::new(1.0);
        acc.sample(0, 5.0);
        assert_eq!(acc.sample(10, 4.0), None);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut acc = EnergyAccumulator::new(1.0);
        acc.sample(0, 0.0);
        acc.reset();
        assert_eq!(acc.sample(500, 1.0), None);
        assert_eq!(acc.sample(600, 2.0), Some(100.0));
    }
}
