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

//! Mutual exclusion for side-band register access.
//!
//! Index/data port pairs are shared by every core and every package, so two
//! interleaved readers would read each other's data. All engines of a process
//! share one [`BusLock`], handed out by the binary.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(10);

pub struct BusLock {
    mutex: Mutex<()>,
    timeout: Duration,
}

impl BusLock {
    pub fn new(timeout: Duration) -> Self {
        BusLock {
            mutex: Mutex::new(()),
            timeout,
        }
    }

    /// Waits at most the configured timeout. `None` means the bus stayed busy
    /// and the caller skips its side-band reads for this cycle.
    pub fn acquire(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.mutex.try_lock_for(self.timeout);
        if guard.is_none() {
            debug!(timeout_ms = self.timeout.as_millis() as u64, "Side-band bus busy, skipping read");
        }
        guard
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for BusLock {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_TIMEOUT)
    }
}
