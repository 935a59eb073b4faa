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

//! Processor load from the kernel's accumulated idle and busy times.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Samples closer than this many clock ticks on any cpu are skipped.
pub const MIN_ELAPSED_TICKS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Aggregate and per-cpu times from the text of `/proc/stat`.
pub fn parse_proc_stat(text: &str) -> (Option<CpuTimes>, HashMap<usize, CpuTimes>) {
    let mut total = None;
    let mut per_cpu = HashMap::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        let Some(suffix) = label.strip_prefix("cpu") else { continue };
        let values: Vec<u64> = fields.map_while(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        // user nice system idle iowait irq softirq steal; guest time is
        // already included in user
        let idle = values[3];
        let times = CpuTimes { idle, total: values.iter().take(8).sum() };
        if suffix.is_empty() {
            total = Some(times);
        } else if let Ok(cpu) = suffix.parse::<usize>() {
            per_cpu.insert(cpu, times);
        }
    }
    (total, per_cpu)
}

fn load_between(previous: CpuTimes, current: CpuTimes) -> Option<f32> {
    let total = current.total.checked_sub(previous.total)?;
    let idle = current.idle.checked_sub(previous.idle)?;
    if total == 0 {
        return None;
    }
    let busy = 1.0 - (idle.min(total) as f64 / total as f64);
    Some((100.0 * busy) as f32)
}

/// Keeps the previous sample and turns the next one into load percentages.
#[derive(Debug, Clone)]
pub struct CpuLoad {
    source: PathBuf,
    previous_total: Option<CpuTimes>,
    previous: HashMap<usize, CpuTimes>,
    total: Option<f32>,
    threads: HashMap<usize, f32>,
}

impl CpuLoad {
    pub fn new(source: impl AsRef<Path>) -> Self {
        CpuLoad {
            source: source.as_ref().to_path_buf(),
            previous_total: None,
            previous: HashMap::new(),
            total: None,
            threads: HashMap::new(),
        }
    }

    /// Reads the source file. Returns false when it could not be read.
    pub fn update(&mut self) -> bool {
        match fs::read_to_string(&self.source) {
            Ok(text) => {
                self.update_from(&text);
                true
            }
            Err(e) => {
                trace!(path = %self.source.display(), error = %e, "Cannot read load source");
                self.total = None;
                self.threads.clear();
                false
            }
        }
    }

    /// Turns `text` into load values. A sample taken too soon after the
    /// previous one is ignored and the previous values stay.
    pub fn update_from(&mut self, text: &str) {
        let (total, per_cpu) = parse_proc_stat(text);

        let too_soon = per_cpu.iter().any(|(cpu, now)| {
            self.previous
                .get(cpu)
                .and_then(|before| now.total.checked_sub(before.total))
                .is_some_and(|elapsed| elapsed < MIN_ELAPSED_TICKS)
        });
        if too_soon {
            trace!("Skipping load sample, too little time elapsed");
            return;
        }

        self.total = match (self.previous_total, total) {
            (Some(p), Some(c)) => load_between(p, c),
            _ => None,
        };
        self.threads = per_cpu
            .iter()
            .filter_map(|(cpu, &now)| {
                let before = *self.previous.get(cpu)?;
                load_between(before, now).map(|l| (*cpu, l))
            })
            .collect();

        self.previous_total = total;
        self.previous = per_cpu;
    }

    pub fn total(&self) -> Option<f32> {
        self.total
    }

    pub fn thread(&self, cpu: usize) -> Option<f32> {
        self.threads.get(&cpu).copied()
    }
}
