/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! The benchmark program.
use core::fmt;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::analysis::{analyze, MetricValue};
use crate::catalog::{self, CatalogError, TestDescriptor, TESTS};
use crate::chip::{CpuMode, MsxGeneration, RefreshRate};
use crate::config::{BenchConfig, BuildVariant, ConfigError};
use crate::longrun::{run_long, LongRun, RtcTimestamp};
use crate::materialize::{check_window, find_missing_bank, provider_for};
use crate::platform::{MachineInfo, Platform, TurboRCpu};
use crate::report::Report;
use crate::runner::{build_preamble, run_iteration};
use crate::stats::{Results, Statistics};

/// The message printed on machines older than MSX2.
pub const UNSUPPORTED_MESSAGE: &str = "MSX2 and above is required";

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum BenchError {
    /// The machine generation can not run the benchmark.
    UnsupportedPlatform(MsxGeneration),
    Catalog(CatalogError),
    Config(ConfigError),
    /// The cartridge does not provide the bank of a test in the banked variant.
    MissingCartridgeBank { test: &'static str, bank: u8 },
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BenchError::Catalog(err) => Some(err),
            BenchError::Config(err) => Some(err),
            _ => None
        }
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::UnsupportedPlatform(gen) => write!(f, "{} is not supported: {}", gen, UNSUPPORTED_MESSAGE),
            BenchError::Catalog(err) => write!(f, "invalid test catalog: {}", err),
            BenchError::Config(err) => write!(f, "invalid configuration: {}", err),
            BenchError::MissingCartridgeBank { test, bank } => write!(f,
                "the cartridge has no bank {} holding the test {}", bank, test),
        }
    }
}

impl From<CatalogError> for BenchError {
    fn from(err: CatalogError) -> Self {
        BenchError::Catalog(err)
    }
}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Config(err)
    }
}

impl BenchError {
    /// Returns the process exit code reporting this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::UnsupportedPlatform(..) => 1,
            _ => 2
        }
    }
}

pub type Result<T> = core::result::Result<T, BenchError>;

/// Everything a complete benchmark run produced.
#[derive(Clone, Debug)]
pub struct BenchOutcome {
    pub cpu_mode: CpuMode,
    pub results: Results,
    pub statistics: Statistics,
    pub metrics: Vec<MetricValue>,
    /// `None` if the long run was disabled or not supported in the CPU mode.
    pub long_run: Option<LongRun>,
    pub report: Report,
}

/// Returns the mode the CPU of the `platform` currently runs in.
pub fn detect_cpu_mode<P: MachineInfo + ?Sized>(platform: &P) -> CpuMode {
    if platform.generation() == MsxGeneration::TurboR {
        match platform.turbo_r_cpu() {
            TurboRCpu::Z80 => CpuMode::Z80,
            TurboRCpu::R800Rom => CpuMode::R800Rom,
            TurboRCpu::R800Dram => CpuMode::R800Dram,
        }
    }
    else if platform.has_turbo() && platform.is_turbo_enabled() {
        CpuMode::Z80Turbo
    }
    else {
        CpuMode::Z80
    }
}

/// Runs the benchmark with the default test catalog and prints the report.
///
/// # Errors
/// Returns an error if the configuration is invalid or the platform is older than MSX2. In the
/// latter case a message is printed before returning.
pub fn run<P: Platform>(platform: &mut P, config: &BenchConfig) -> Result<BenchOutcome> {
    run_tests(platform, config, &TESTS)
}

/// Runs the benchmark with the given `tests` and prints the report.
///
/// # Errors
/// See [run]. Additionally returns an error if `tests` is not a valid catalog.
pub fn run_tests<P: Platform>(
        platform: &mut P,
        config: &BenchConfig,
        tests: &[TestDescriptor]
    ) -> Result<BenchOutcome>
{
    config.validate()?;
    catalog::validate(tests, config.variant == BuildVariant::Banked)?;
    check_window(tests, &config.memory_map)?;
    let generation = platform.generation();
    if !generation.is_supported() {
        platform.print_line(UNSUPPORTED_MESSAGE);
        return Err(BenchError::UnsupportedPlatform(generation))
    }
    if config.variant == BuildVariant::Banked {
        if let Some((test, bank)) = find_missing_bank(tests, &*platform) {
            return Err(BenchError::MissingCartridgeBank { test, bank })
        }
    }
    let program_start = RtcTimestamp::read(platform);
    let saved_cpu = platform.turbo_r_cpu();
    if generation == MsxGeneration::TurboR && saved_cpu != TurboRCpu::Z80 {
        platform.set_turbo_r_cpu(TurboRCpu::Z80);
    }
    let cpu_mode = detect_cpu_mode(platform);
    info!("{} {}, CPU: {}, {} repeats", generation, config.variant, cpu_mode, config.iterations);

    let map = &config.memory_map;
    let results = run_all_iterations(platform, config, tests);

    let long_run = if !config.long_run {
        None
    }
    else if cpu_mode.is_z80() {
        let saved_rate = platform.refresh_rate();
        platform.set_refresh_rate(RefreshRate::Ntsc);
        let long_run = run_long(platform, map, &config.calibration, cpu_mode, program_start);
        platform.set_refresh_rate(saved_rate);
        Some(long_run)
    }
    else {
        info!("the long run is not supported in {} mode", cpu_mode);
        None
    };

    if saved_cpu != platform.turbo_r_cpu() {
        platform.set_turbo_r_cpu(saved_cpu);
    }

    let statistics = Statistics::reduce(&results, tests, &config.calibration, cpu_mode);
    let metrics = analyze(&statistics, tests).to_vec();
    let report = Report::new(config, cpu_mode, tests, &statistics, &metrics, long_run);
    report.print(platform);
    Ok(BenchOutcome { cpu_mode, results, statistics, metrics, long_run, report })
}

/// Runs all trials under each refresh rate, restoring the rate, the interrupt vector and the
/// palette afterwards.
fn run_all_iterations<P: Platform>(
        platform: &mut P,
        config: &BenchConfig,
        tests: &[TestDescriptor]
    ) -> Results
{
    let map = &config.memory_map;
    let provider = provider_for(config.variant, *map, config.unroll_blocks);
    let mut results = Results::new(tests.len(), config.iterations);

    platform.save_palette();
    let saved_rate = platform.refresh_rate();
    platform.load_code(map.preamble, &build_preamble(map));
    platform.install_hook(map);

    for rate in RefreshRate::ALL.iter().copied() {
        info!("refresh rate: {}", rate);
        platform.set_refresh_rate(rate);
        for (index, test) in tests.iter().enumerate() {
            let code = provider.provide(test, platform);
            for _ in 0..config.iterations {
                let trial = run_iteration(platform, test, &code, map);
                results.record(rate, index, trial);
            }
            debug!("{} {}: {:?}", rate, test.name, results.trials(rate, index));
        }
    }

    platform.map_ram_window();
    platform.set_refresh_rate(saved_rate);
    platform.restore_hook();
    platform.restore_palette();
    results
}
