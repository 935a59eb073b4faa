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

//! Corewatch - CPU register telemetry for Linux
//!
//! This library identifies the processor microarchitecture, calibrates the
//! time-stamp counter, and decodes temperatures, clocks, voltages, load and
//! package power from model-specific and PCI configuration registers.

pub mod access;
pub mod affinity;
pub mod buslock;
pub mod calibrate;
pub mod catalog;
pub mod config;
pub mod cpu;
pub mod decode;
pub mod energy;
pub mod error;
pub mod load;
pub mod logger;
pub mod registers;
pub mod sensor;
pub mod service;
pub mod topology;

#[cfg(test)]
pub mod test_utils;
