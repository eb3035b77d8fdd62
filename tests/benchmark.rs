/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
use vdptest::analysis::{Metric, MetricValue};
use vdptest::bench::{self, BenchError, BenchOutcome};
use vdptest::catalog::TESTS;
use vdptest::chip::{CpuMode, MsxGeneration, RefreshRate};
use vdptest::config::{BenchConfig, BuildVariant, ConfigError};
use vdptest::materialize::build_rom_image;
use vdptest::msx::{MachineConfig, MsxMachine, DEFAULT_PALETTE, INTERRUPT_VECTOR};
use vdptest::platform::{MachineInfo, TimedExecution, TurboRCpu, VideoControl};

/// The long run is shortened ten times, the clock advances ten times faster.
const RTC_DIVISOR: u32 = 10;

fn machine(config: MachineConfig) -> MsxMachine {
    MsxMachine::new(MachineConfig { rtc_divisor: RTC_DIVISOR, ..config })
}

fn bench_config(msx: &MsxMachine, variant: BuildVariant) -> BenchConfig {
    let mut config = BenchConfig {
        iterations: 2,
        variant,
        calibration: msx.calibration(),
        ..BenchConfig::default()
    };
    config.calibration.long_run_out_count /= RTC_DIVISOR;
    config
}

fn run(msx: &mut MsxMachine, config: &BenchConfig) -> BenchOutcome {
    if config.variant == BuildVariant::Banked {
        let rom = build_rom_image(&TESTS, &config.memory_map);
        msx.insert_cartridge(&rom).unwrap();
    }
    bench::run(msx, config).unwrap()
}

fn metric(outcome: &BenchOutcome, metric: Metric) -> MetricValue {
    *outcome.metrics.iter().find(|m| m.metric == metric).unwrap()
}

#[test]
fn bench_measures_standard_msx2() {
    let mut msx = machine(MachineConfig::default());
    let config = bench_config(&msx, BuildVariant::Direct);
    let outcome = run(&mut msx, &config);
    assert_eq!(outcome.cpu_mode, CpuMode::Z80);
    assert!(outcome.results.is_complete());
    for test in outcome.report.tests.iter() {
        for line in test.rates.iter() {
            assert!(line.min <= line.max, "{}", test.name);
            assert!(line.min > 0, "{}", test.name);
            assert!(line.deviation.map_or(false, |d| d.abs() <= 1), "{}: {:?}", test.name, line);
        }
    }
    for frame in outcome.report.frames.iter() {
        assert!(frame.diff().abs() <= 1, "{:?}", frame);
    }
    for value in outcome.metrics.iter() {
        assert_eq!(value.value, Some(0), "{:?}", value);
    }
    let long_run = outcome.long_run.unwrap();
    assert!(long_run.working);
    assert!((0..=1).contains(&long_run.deviation), "{:?}", long_run);
    // the machine is left as it was found
    assert_eq!(msx.refresh_rate(), RefreshRate::Ntsc);
    assert_eq!(msx.bus.vdp.palette(), &DEFAULT_PALETTE);
    assert_eq!(msx.peek(INTERRUPT_VECTOR), 0xF5);
    assert!(!msx.bus.hook.is_installed());

    let output = msx.take_output();
    assert_eq!(output, outcome.report.lines());
    assert!(output[0].ends_with(" - 2 repeats, RAM, CPU: Z80"));
    assert_eq!(output.len(), TESTS.len() + 5 + outcome.metrics.len() + 2);
    assert!(output.iter().all(|line| line.len() <= 80));
    assert_eq!(output.last().unwrap(),
               "[EVALUATE] We have an issue if ~d is greater than 0 on any of the lines");
}

#[test]
fn bench_detects_slow_vdp_io() {
    let mut msx = machine(MachineConfig { vdp_io_wait: 2, ..MachineConfig::default() });
    let config = bench_config(&msx, BuildVariant::Direct);
    let outcome = run(&mut msx, &config);
    assert_eq!(metric(&outcome, Metric::VdpIo).value, Some(2));
    let out98 = outcome.report.tests.iter().find(|t| t.name == "out98").unwrap();
    assert_eq!(out98.rates[0].deviation, Some(2));
    assert_eq!(out98.rates[1].deviation, Some(2));
    let long_run = outcome.long_run.unwrap();
    assert!((2..=3).contains(&long_run.deviation), "{:?}", long_run);
    assert!(outcome.report.long_run_line().starts_with(" longtest  VDP I/O added wait: +"));
}

#[test]
fn bench_detects_slow_rom() {
    let mut msx = machine(MachineConfig { rom_wait: 1, ..MachineConfig::default() });
    let config = BenchConfig { long_run: false, ..bench_config(&msx, BuildVariant::Banked) };
    let outcome = run(&mut msx, &config);
    assert_eq!(metric(&outcome, Metric::VdpIo).value, Some(0));
    assert_eq!(metric(&outcome, Metric::RomSegment).value, Some(1));
    assert_eq!(metric(&outcome, Metric::RomReference).value, Some(2));
    let fundamental = metric(&outcome, Metric::RomFundamental).value.unwrap();
    assert!((2..=4).contains(&fundamental), "{}", fundamental);
    assert_eq!(outcome.long_run, None);
    let lines = msx.take_output();
    assert!(lines[0].contains(", ROM, CPU: Z80"));
    assert!(lines.iter().any(|l| l == " longtest  (skipped)"));
    // calibration tests never run from the cartridge
    let sync1 = &outcome.report.tests[0];
    assert_eq!(sync1.rates[0].deviation, Some(0));
}

#[test]
fn bench_reports_stopped_clock() {
    let mut msx = machine(MachineConfig { rtc_running: false, ..MachineConfig::default() });
    let config = BenchConfig { iterations: 1, ..bench_config(&msx, BuildVariant::Direct) };
    let outcome = run(&mut msx, &config);
    let long_run = outcome.long_run.unwrap();
    assert!(!long_run.working);
    assert_eq!(long_run.deviation(), None);
    assert!(msx.output().iter().any(|l|
        l == " longtest  (no result as internal clock is not working)"));
}

#[test]
fn bench_runs_in_turbo_mode() {
    let mut msx = machine(MachineConfig {
        generation: MsxGeneration::Msx2Plus, has_turbo: true, turbo_enabled: true,
        ..MachineConfig::default()
    });
    let config = BenchConfig { iterations: 1, ..bench_config(&msx, BuildVariant::Direct) };
    let outcome = run(&mut msx, &config);
    assert_eq!(outcome.cpu_mode, CpuMode::Z80Turbo);
    assert_eq!(metric(&outcome, Metric::VdpIo).value, Some(0));
    // the emulated turbo frame differs from the one measured on real hardware
    assert_eq!(outcome.report.frames[0].target, 89604);
    assert_eq!(outcome.report.frames[1].target, 107046);
    for frame in outcome.report.frames.iter() {
        assert!(frame.diff().abs() <= 1, "{:?}", frame);
    }
    assert!(outcome.long_run.unwrap().working);
    assert!(msx.output()[0].ends_with("CPU: Z80 turbo"));
}

#[test]
fn bench_switches_turbo_r_to_z80() {
    let mut msx = machine(MachineConfig {
        generation: MsxGeneration::TurboR, turbo_r_cpu: TurboRCpu::R800Dram,
        ..MachineConfig::default()
    });
    let config = BenchConfig { iterations: 1, long_run: false, ..bench_config(&msx, BuildVariant::Direct) };
    let outcome = run(&mut msx, &config);
    assert_eq!(outcome.cpu_mode, CpuMode::Z80);
    assert_eq!(msx.turbo_r_cpu(), TurboRCpu::R800Dram);
}

#[test]
fn bench_counts_rounds_of_small_window() {
    let mut msx = machine(MachineConfig::default());
    let config = BenchConfig {
        iterations: 1,
        long_run: false,
        unroll_blocks: Some(1000),
        ..bench_config(&msx, BuildVariant::Direct)
    };
    let outcome = run(&mut msx, &config);
    // sync1 loops over 1000 instructions 11 times in an NTSC frame and 14 times in a PAL one
    let sync1 = outcome.statistics.aggregate(RefreshRate::Ntsc, 0);
    assert_eq!(sync1.extra_rounds, 11);
    assert!((11000.0..12000.0).contains(&sync1.value), "{:?}", sync1);
    let sync1 = outcome.statistics.aggregate(RefreshRate::Pal, 0);
    assert_eq!(sync1.extra_rounds, 14);
    for frame in outcome.report.frames.iter() {
        assert!(frame.diff().abs() <= 4, "{:?}", frame);
    }
    for test in outcome.report.tests.iter() {
        for line in test.rates.iter() {
            assert_eq!(line.deviation, Some(0), "{}: {:?}", test.name, line);
        }
    }
}

#[test]
fn bench_requires_cartridge_in_banked_variant() {
    let mut msx = machine(MachineConfig::default());
    let config = bench_config(&msx, BuildVariant::Banked);
    let err = bench::run(&mut msx, &config).unwrap_err();
    assert_eq!(err, BenchError::MissingCartridgeBank { test: "out98", bank: 2 });
    assert_eq!(err.exit_code(), 2);
    assert!(msx.output().is_empty());
}

#[test]
fn bench_rejects_tiny_window() {
    let mut msx = machine(MachineConfig::default());
    let mut config = BenchConfig { long_run: false, ..bench_config(&msx, BuildVariant::Direct) };
    config.memory_map.window_size = 16;
    let err = bench::run(&mut msx, &config).unwrap_err();
    assert_eq!(err, BenchError::Config(ConfigError::InvalidWindow));
    assert_eq!(msx.elapsed_tstates(), 0);
}

#[test]
fn bench_refuses_msx1() {
    let mut msx = machine(MachineConfig { generation: MsxGeneration::Msx1, ..MachineConfig::default() });
    let config = bench_config(&msx, BuildVariant::Direct);
    let err = bench::run(&mut msx, &config).unwrap_err();
    assert_eq!(err, BenchError::UnsupportedPlatform(MsxGeneration::Msx1));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(msx.output(), ["MSX2 and above is required"]);
}

#[cfg(feature = "snapshot")]
#[test]
fn bench_report_serializes() {
    let mut msx = machine(MachineConfig::default());
    let config = BenchConfig { iterations: 1, long_run: false, ..bench_config(&msx, BuildVariant::Direct) };
    let outcome = run(&mut msx, &config);
    let json = serde_json::to_string(&outcome.report).unwrap();
    assert!(json.contains(r#""cpuMode":"Z80""#));
    assert!(json.contains(r#""name":"out98""#));
    let report: vdptest::report::Report = serde_json::from_str(&json).unwrap();
    assert_eq!(report.tests.len(), TESTS.len());
    assert_eq!(report.header(), outcome.report.header());
}
