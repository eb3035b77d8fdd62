/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! The benchmark report.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::analysis::MetricValue;
use crate::catalog::TestDescriptor;
use crate::chip::{CpuMode, RefreshRate, REFRESH_RATE_COUNT};
use crate::config::{BenchConfig, BuildVariant};
use crate::longrun::LongRun;
use crate::platform::TextOutput;
use crate::stats::{round_deviation, FrameBudget, Statistics};

/// The number of columns of the text screen.
pub const SCREEN_COLUMNS: usize = 80;

const TITLE: &str = concat!("VDP I/O Timing Test v", env!("CARGO_PKG_VERSION"));
const SPEED_HEADER: &str =
    "          ---------- 60 Hz NTSC ---------|----------- 50 Hz PAL ---------";
const SPLIT_LINE: &str =
    "                                         |";
const TABLE_HEADER: &str =
    "               avg   min   max  cost  ~d |      avg   min   max  cost  ~d";
const CLOCK_ERROR: &str = "(no result as internal clock is not working)";
const UNAVAILABLE: &str = "n/a";
const SUMMARY: &str = "[EVALUATE] We have an issue if ~d is greater than 0 on any of the lines";

/// Results of a single test at a single refresh rate.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateLine {
    pub avg: f64,
    pub min: u32,
    pub max: u32,
    /// The observed cost of a single instruction.
    pub cost: f64,
    /// The rounded difference between the observed and the declared cost, `None` if no
    /// instruction was counted.
    pub deviation: Option<i32>,
}

#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestLine {
    pub name: String,
    pub rates: [RateLine; REFRESH_RATE_COUNT],
}

/// The report data.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub iterations: u8,
    pub variant: BuildVariant,
    pub cpu_mode: CpuMode,
    pub frames: [FrameBudget; REFRESH_RATE_COUNT],
    pub tests: Vec<TestLine>,
    pub metrics: Vec<MetricValue>,
    /// `None` if the long run was not executed.
    pub long_run: Option<LongRun>,
}

/// Returns `line` limited to [SCREEN_COLUMNS] characters when the last column is printable.
///
/// A full line wraps the cursor by itself, so printing a line break after it would add an empty line.
pub fn clip_line(line: &str) -> &str {
    match line.as_bytes().get(SCREEN_COLUMNS - 1) {
        Some(&ch) if ch >= b' ' => line.get(..SCREEN_COLUMNS).unwrap_or(line),
        _ => line
    }
}

fn frame_part(frame: &FrameBudget) -> String {
    format!("{} vs {}, d:{:+}", frame.measured, frame.target, frame.diff())
}

fn rate_part(line: &RateLine) -> String {
    let deviation = match line.deviation {
        Some(d) => format!("{:+3}", d),
        None => format!("{:>3}", UNAVAILABLE),
    };
    format!("{:8.2} {:5} {:5} {:5.2} {}", line.avg, line.min, line.max, line.cost, deviation)
}

impl Report {
    /// Collects the report data.
    pub fn new(
            config: &BenchConfig,
            cpu_mode: CpuMode,
            tests: &[TestDescriptor],
            stats: &Statistics,
            metrics: &[MetricValue],
            long_run: Option<LongRun>
        ) -> Self
    {
        let mut frames = [FrameBudget::default(); REFRESH_RATE_COUNT];
        for rate in RefreshRate::ALL.iter().copied() {
            frames[rate.index()] = *stats.frame(rate);
        }
        let tests = tests.iter().enumerate().map(|(t, test)| {
            let mut rates = [RateLine::default(); REFRESH_RATE_COUNT];
            for rate in RefreshRate::ALL.iter().copied() {
                let agg = stats.aggregate(rate, t);
                rates[rate.index()] = RateLine {
                    avg: agg.value,
                    min: agg.min,
                    max: agg.max,
                    cost: stats.final_cost(rate, t),
                    deviation: round_deviation(stats.deviation(rate, t)),
                };
            }
            TestLine { name: test.name.to_string(), rates }
        }).collect();
        Report {
            iterations: config.iterations,
            variant: config.variant,
            cpu_mode,
            frames,
            tests,
            metrics: metrics.to_vec(),
            long_run,
        }
    }
    /// Returns the header line.
    pub fn header(&self) -> String {
        format!("{} - {} repeats, {}, CPU: {}", TITLE, self.iterations, self.variant, self.cpu_mode)
    }
    /// Returns the long run line.
    pub fn long_run_line(&self) -> String {
        let result = match self.long_run {
            Some(LongRun { working: true, deviation, .. }) => {
                format!("VDP I/O added wait: {:+} cycle(s)", deviation)
            }
            Some(_) => CLOCK_ERROR.to_string(),
            None => "(skipped)".to_string(),
        };
        format!(" longtest  {}", result)
    }
    /// Renders the text report, lines are not clipped.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.tests.len() + self.metrics.len() + 8);
        lines.push(self.header());
        lines.push(SPEED_HEADER.to_string());
        lines.push(format!("Framecycles: {:>27} | {:>30}",
                           frame_part(&self.frames[0]), frame_part(&self.frames[1])));
        lines.push(SPLIT_LINE.to_string());
        lines.push(TABLE_HEADER.to_string());
        for test in self.tests.iter() {
            lines.push(format!("{:>9} {} | {}", test.name, rate_part(&test.rates[0]), rate_part(&test.rates[1])));
        }
        for metric in self.metrics.iter() {
            let label = format!("{} added wait:", metric.metric);
            match metric.value {
                Some(value) => lines.push(format!("  {:<28} {:+} cycle(s)", label, value)),
                None => lines.push(format!("  {:<28} {}", label, UNAVAILABLE)),
            }
        }
        lines.push(self.long_run_line());
        lines.push(SUMMARY.to_string());
        lines
    }
    /// Prints the text report.
    pub fn print<T: TextOutput + ?Sized>(&self, out: &mut T) {
        for line in self.lines() {
            out.print_line(clip_line(&line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Metric;

    fn sample() -> Report {
        let frame = FrameBudget { no_tail: 59598.0, total: 59598.0, measured: 59736, target: 59736 };
        let frame_pal = FrameBudget { no_tail: 71225.0, total: 71225.0, measured: 71363, target: 71364 };
        let line = RateLine { avg: 4592.5, min: 4592, max: 4593, cost: 14.004, deviation: Some(2) };
        Report {
            iterations: 4,
            variant: BuildVariant::Direct,
            cpu_mode: CpuMode::Z80,
            frames: [frame, frame_pal],
            tests: vec![TestLine { name: "out98".into(), rates: [line, line] }],
            metrics: vec![MetricValue { metric: Metric::VdpIo, value: Some(2), effect: 2.0, baseline: 0.0 }],
            long_run: Some(LongRun { working: true, elapsed_seconds: 14, deviation: 2 }),
        }
    }

    struct Screen(Vec<String>);

    impl TextOutput for Screen {
        fn print_line(&mut self, line: &str) {
            self.0.push(line.to_string());
        }
    }

    #[test]
    fn report_renders() {
        let report = sample();
        let lines = report.lines();
        assert!(lines[0].starts_with("VDP I/O Timing Test v"));
        assert!(lines[0].ends_with(" - 4 repeats, RAM, CPU: Z80"));
        assert_eq!(lines[2], format!("Framecycles: {:>27} | {:>30}", "59736 vs 59736, d:+0", "71363 vs 71364, d:-1"));
        assert_eq!(lines[5], "    out98  4592.50  4592  4593 14.00  +2 |  4592.50  4592  4593 14.00  +2");
        assert_eq!(lines[5].find('|'), lines[4].find('|'));
        assert_eq!(lines[6], "  VDP I/O added wait:          +2 cycle(s)");
        assert_eq!(lines[7], " longtest  VDP I/O added wait: +2 cycle(s)");
        assert_eq!(lines.len(), 9);
        let mut screen = Screen(Vec::new());
        report.print(&mut screen);
        assert_eq!(screen.0, lines);
    }

    #[test]
    fn unmeasured_costs_render_unavailable() {
        let mut report = sample();
        let empty = RateLine { avg: 0.0, min: 0, max: 0, cost: f64::NAN, deviation: None };
        report.tests[0].rates[1] = empty;
        report.metrics[0] = MetricValue { value: None, effect: f64::NAN, ..report.metrics[0] };
        let lines = report.lines();
        assert_eq!(lines[5], "    out98  4592.50  4592  4593 14.00  +2 |     0.00     0     0   NaN n/a");
        assert_eq!(lines[5].len(), lines[4].len());
        assert_eq!(lines[6], "  VDP I/O added wait:          n/a");
    }

    #[test]
    fn long_run_fallback_renders() {
        let mut report = sample();
        report.long_run = Some(LongRun::unavailable());
        assert_eq!(report.long_run_line(), " longtest  (no result as internal clock is not working)");
        assert!(!report.lines().iter().any(|l| l.contains("added wait: +2 cycle(s)") && l.contains("longtest")));
        report.long_run = None;
        assert_eq!(report.long_run_line(), " longtest  (skipped)");
    }

    #[test]
    fn clip_line_works() {
        let short = "a".repeat(79);
        assert_eq!(clip_line(&short), short);
        let full = "b".repeat(80);
        assert_eq!(clip_line(&full), full);
        let long = "c".repeat(95);
        assert_eq!(clip_line(&long), &long[..80]);
        let mut ctrl = "d".repeat(79);
        ctrl.push_str("\r\n");
        assert_eq!(clip_line(&ctrl), ctrl);
    }
}
