/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    VDPTEST is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    VDPTEST is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! VDPTEST measures the I/O and memory timing of MSX computers.
//!
//! Each test fills a code window with a single instruction repeated thousands of times, then
//! counts how many of them execute between two frame interrupts. The count is converted into an
//! observed per-instruction cost and compared with the declared cost.
//!
//! The engine talks to the machine through the interfaces in [platform]. The [msx] module
//! provides an emulated MSX2 implementing them, so the benchmark can be run on a host:
//!
//! ```
//! use vdptest::bench;
//! use vdptest::config::BenchConfig;
//! use vdptest::msx::MsxMachine;
//!
//! let mut msx = MsxMachine::default();
//! let config = BenchConfig {
//!     iterations: 1,
//!     long_run: false,
//!     calibration: msx.calibration(),
//!     ..BenchConfig::default()
//! };
//! let outcome = bench::run(&mut msx, &config).unwrap();
//! assert_eq!(outcome.report.tests.len(), vdptest::catalog::TESTS.len());
//! for line in msx.output() {
//!     println!("{}", line);
//! }
//! ```
pub use vdptest_core::{chip, clock, memory, z80emu};

pub mod analysis;
pub mod bench;
pub mod catalog;
pub mod config;
pub mod hook;
pub mod longrun;
pub mod materialize;
pub mod msx;
pub mod platform;
pub mod report;
pub mod runner;
pub mod stats;
