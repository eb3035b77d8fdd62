/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Statistics reduction of trial results.
use arrayvec::ArrayVec;
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::catalog::{is_calibration, TestDescriptor, CALIBRATION_TESTS};
use crate::chip::{CpuMode, RefreshRate, REFRESH_RATE_COUNT};
use crate::config::{Calibration, MAX_ITERATIONS};
use crate::runner::Trial;

/// Trials of a single test at a single refresh rate.
pub type TrialSet = ArrayVec<Trial, MAX_ITERATIONS>;

/// Trial results of a whole run, indexed by test and refresh rate.
///
/// Created once by the orchestrator and filled by the iteration runner.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Results {
    iterations: u8,
    trials: Vec<[TrialSet; REFRESH_RATE_COUNT]>,
}

impl Results {
    /// Creates empty results of `test_count` tests with `iterations` trials each.
    ///
    /// # Panics
    /// Panics if `iterations` exceeds [MAX_ITERATIONS].
    pub fn new(test_count: usize, iterations: u8) -> Self {
        assert!(usize::from(iterations) <= MAX_ITERATIONS);
        let trials = (0..test_count).map(|_| Default::default()).collect();
        Results { iterations, trials }
    }

    pub fn test_count(&self) -> usize {
        self.trials.len()
    }

    pub fn iterations(&self) -> u8 {
        self.iterations
    }
    /// Records the next trial of the `test` at the refresh `rate`.
    ///
    /// # Panics
    /// Panics if all the trials of the test have already been recorded.
    pub fn record(&mut self, rate: RefreshRate, test: usize, trial: Trial) {
        let set = &mut self.trials[test][rate.index()];
        assert!(set.len() < usize::from(self.iterations), "too many trials of test {}", test);
        set.push(trial);
    }

    pub fn trials(&self, rate: RefreshRate, test: usize) -> &[Trial] {
        &self.trials[test][rate.index()]
    }
    /// Returns `true` if every trial has been recorded.
    pub fn is_complete(&self) -> bool {
        self.trials.iter().flatten().all(|set| set.len() == usize::from(self.iterations))
    }
}

/// Aggregated trials of a single test at a single refresh rate.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregate {
    /// The instruction count used by the derived costs.
    pub value: f64,
    pub mean: f64,
    pub min: u32,
    pub max: u32,
    /// The largest number of extra rounds observed.
    pub extra_rounds: u8,
}

/// Reduces a set of trials.
///
/// The `value` of a calibration test is the maximum count, since the interrupt latency may only
/// make a trial count less. Other tests use the arithmetic mean.
pub fn aggregate(trials: &[Trial], calibration: bool) -> Aggregate {
    if trials.is_empty() {
        return Aggregate::default()
    }
    let mut total = 0u64;
    let mut min = u32::MAX;
    let mut max = 0;
    let mut extra_rounds = 0;
    for trial in trials {
        total += u64::from(trial.instructions);
        min = min.min(trial.instructions);
        max = max.max(trial.instructions);
        extra_rounds = extra_rounds.max(trial.extra_rounds);
    }
    let mean = total as f64 / trials.len() as f64;
    let value = if calibration { f64::from(max) } else { mean };
    Aggregate { value, mean, min, max, extra_rounds }
}

/// The estimated number of CPU cycles in a single frame.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameBudget {
    /// Cycles spent executing the unrolled calibration instructions.
    pub no_tail: f64,
    /// [FrameBudget::no_tail] plus the cycles spent in tail sequences.
    pub total: f64,
    /// The whole frame including the interrupt handling and preamble overheads.
    pub measured: u32,
    /// The expected frame length.
    pub target: u32,
}

impl FrameBudget {
    /// Returns the difference between the measured and the expected frame length.
    pub fn diff(&self) -> i64 {
        i64::from(self.measured) - i64::from(self.target)
    }
}

/// Returns the per-frame cycles estimated from both calibration tests.
///
/// Each calibration count, raised by `add_up`, is multiplied by its instruction cost and both
/// estimates are averaged. The tail correction adds half of `tail_cycles` per extra round.
pub fn frame_budget(
        cal: [(&Aggregate, u32); CALIBRATION_TESTS],
        add_up: f64,
        tail_cycles: u32
    ) -> (f64, f64)
{
    let [(agg0, cost0), (agg1, cost1)] = cal;
    let no_tail = ((agg0.value + add_up) * f64::from(cost0)
                 + (agg1.value + add_up) * f64::from(cost1)) / 2.0;
    let extra = u32::from(agg0.extra_rounds) + u32::from(agg1.extra_rounds);
    let total = no_tail + f64::from(extra * tail_cycles / 2);
    (no_tail, total)
}

/// Returns the observed cost of a single instruction of a test.
///
/// `startup0` is the startup cost of the first calibration test. Yields `NaN` when nothing was
/// counted.
pub fn final_cost(no_tail: f64, startup0: u32, startup: u32, count: f64) -> f64 {
    if count > 0.0 {
        (no_tail + f64::from(startup0) - f64::from(startup)) / count
    }
    else {
        f64::NAN
    }
}

/// Rounds `f` half away from zero, with a slight bias towards positive values.
///
/// `NaN` rounds to 0.
pub fn signed_round(f: f64) -> i32 {
    if f < 0.0 {
        (f - 0.5) as i32
    }
    else {
        (f + 0.505) as i32
    }
}

/// Rounds a deviation with [signed_round], `None` if it could not be measured.
pub fn round_deviation(f: f64) -> Option<i32> {
    if f.is_nan() {
        None
    }
    else {
        Some(signed_round(f))
    }
}

/// Derived statistics of a whole run.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    aggregates: Vec<[Aggregate; REFRESH_RATE_COUNT]>,
    frames: [FrameBudget; REFRESH_RATE_COUNT],
    final_costs: Vec<[f64; REFRESH_RATE_COUNT]>,
    deviations: Vec<[f64; REFRESH_RATE_COUNT]>,
}

impl Statistics {
    /// Reduces the `results` of the `tests` run in the CPU `mode`.
    ///
    /// # Panics
    /// Panics if the results do not match the tests or there are no calibration tests.
    pub fn reduce(
            results: &Results,
            tests: &[TestDescriptor],
            calibration: &Calibration,
            mode: CpuMode
        ) -> Self
    {
        assert_eq!(results.test_count(), tests.len(), "results do not match tests");
        assert!(tests.len() >= CALIBRATION_TESTS, "calibration tests are missing");
        let aggregates: Vec<[Aggregate; REFRESH_RATE_COUNT]> = (0..tests.len()).map(|t| {
            let mut aggs = [Aggregate::default(); REFRESH_RATE_COUNT];
            for rate in RefreshRate::ALL.iter().copied() {
                aggs[rate.index()] = aggregate(results.trials(rate, t), is_calibration(t));
            }
            aggs
        }).collect();

        let startup0 = tests[0].startup_cost;
        let overhead = calibration.frame_overhead(mode, startup0);
        let mut frames = [FrameBudget::default(); REFRESH_RATE_COUNT];
        for rate in RefreshRate::ALL.iter().copied() {
            let r = rate.index();
            let (no_tail, total) = frame_budget(
                [(&aggregates[0][r], tests[0].single_cost), (&aggregates[1][r], tests[1].single_cost)],
                calibration.frame_count_add_up,
                calibration.tail_cycles(mode));
            let measured = (total + 0.5 + f64::from(overhead)) as u32;
            let target = calibration.frame_target(mode, rate);
            frames[r] = FrameBudget { no_tail, total, measured, target };
            debug!("{}: frame cycles: {:.3} total: {:.3} measured: {} target: {}",
                    rate, no_tail, total, measured, target);
        }

        let mut final_costs = Vec::with_capacity(tests.len());
        let mut deviations = Vec::with_capacity(tests.len());
        for (test, aggs) in tests.iter().zip(aggregates.iter()) {
            let mut costs = [0.0; REFRESH_RATE_COUNT];
            let mut devs = [0.0; REFRESH_RATE_COUNT];
            for r in 0..REFRESH_RATE_COUNT {
                costs[r] = final_cost(frames[r].no_tail, startup0, test.startup_cost, aggs[r].value);
                devs[r] = costs[r] - f64::from(test.single_cost);
            }
            trace!("{}: costs: {:?} deviations: {:?}", test.name, costs, devs);
            final_costs.push(costs);
            deviations.push(devs);
        }
        Statistics { aggregates, frames, final_costs, deviations }
    }

    pub fn test_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn aggregate(&self, rate: RefreshRate, test: usize) -> &Aggregate {
        &self.aggregates[test][rate.index()]
    }

    pub fn frame(&self, rate: RefreshRate) -> &FrameBudget {
        &self.frames[rate.index()]
    }
    /// Returns the observed cost of a single instruction of the `test`.
    pub fn final_cost(&self, rate: RefreshRate, test: usize) -> f64 {
        self.final_costs[test][rate.index()]
    }
    /// Returns the observed cost less the declared cost of a single instruction of the `test`.
    pub fn deviation(&self, rate: RefreshRate, test: usize) -> f64 {
        self.deviations[test][rate.index()]
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use super::*;
    use crate::catalog::TESTS;

    fn trials(counts: &[u32]) -> Vec<Trial> {
        counts.iter().map(|&instructions| Trial { instructions, extra_rounds: 0 }).collect()
    }

    #[test]
    fn aggregate_works() {
        let set = trials(&[100, 100, 100, 50]);
        let agg = aggregate(&set, true);
        assert_eq!(agg.value, 100.0);
        assert_eq!(agg.mean, 87.5);
        assert_eq!((agg.min, agg.max), (50, 100));
        let agg = aggregate(&set, false);
        assert_eq!(agg.value, 87.5);
        assert_eq!(aggregate(&[], true), Aggregate::default());

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..100 {
            let len = rng.gen_range(1..=MAX_ITERATIONS);
            let set: Vec<Trial> = (0..len).map(|_| Trial {
                instructions: rng.gen_range(9000..11000),
                extra_rounds: rng.gen_range(0..3)
            }).collect();
            let max = set.iter().map(|t| t.instructions).max().unwrap();
            let extra = set.iter().map(|t| t.extra_rounds).max().unwrap();
            let cal = aggregate(&set, true);
            assert_eq!(cal.value, f64::from(max));
            assert_eq!(cal.extra_rounds, extra);
            let agg = aggregate(&set, false);
            assert!(f64::from(agg.min) <= agg.value && agg.value <= f64::from(agg.max));
            assert_eq!(agg.max, max);
        }
    }

    #[test]
    fn frame_budget_works() {
        let cal0 = aggregate(&trials(&[11000, 10990]), true);
        let cal1 = aggregate(&trials(&[7900, 7899, 7900]), true);
        let (no_tail, total) = frame_budget([(&cal0, 5), (&cal1, 7)], 0.333, 57);
        assert!((no_tail - 55151.998).abs() < 1e-6);
        assert_eq!(no_tail, total);
        let cal0 = Aggregate { extra_rounds: 1, ..cal0 };
        let (no_tail1, total) = frame_budget([(&cal0, 5), (&cal1, 7)], 0.333, 57);
        assert_eq!(no_tail1, no_tail);
        assert_eq!(total, no_tail + 28.0);
        let cal1 = Aggregate { extra_rounds: 1, ..cal1 };
        let (_, total) = frame_budget([(&cal0, 5), (&cal1, 7)], 0.333, 57);
        assert_eq!(total, no_tail + 57.0);
    }

    #[test]
    fn signed_round_works() {
        assert_eq!(signed_round(0.0), 0);
        assert_eq!(signed_round(0.49), 0);
        assert_eq!(signed_round(0.495), 1);
        assert_eq!(signed_round(2.0), 2);
        assert_eq!(signed_round(2.7), 3);
        assert_eq!(signed_round(-0.49), 0);
        assert_eq!(signed_round(-0.5), -1);
        assert_eq!(signed_round(-2.2), -2);
        assert_eq!(signed_round(f64::NAN), 0);
        assert_eq!(round_deviation(f64::NAN), None);
        assert_eq!(round_deviation(-0.5), Some(-1));
        assert_eq!(round_deviation(0.0), Some(0));
    }

    #[test]
    fn final_cost_recovers_declared_cost() {
        let calibration = Calibration::default();
        let no_tail = ((11000.0 + 0.333) * 5.0 + (7900.0 + 0.333) * 7.0) / 2.0;
        let mut results = Results::new(TESTS.len(), 2);
        for rate in RefreshRate::ALL.iter().copied() {
            for (t, test) in TESTS.iter().enumerate() {
                let count = match t {
                    0 => 11000,
                    1 => 7900,
                    _ => ((no_tail - f64::from(test.startup_cost)) / f64::from(test.single_cost)).round() as u32
                };
                results.record(rate, t, Trial { instructions: count, extra_rounds: 0 });
                results.record(rate, t, Trial { instructions: count - 1, extra_rounds: 0 });
            }
        }
        assert!(results.is_complete());
        let stats = Statistics::reduce(&results, &TESTS, &calibration, CpuMode::Z80);
        for rate in RefreshRate::ALL.iter().copied() {
            let frame = stats.frame(rate);
            assert!((frame.no_tail - 55151.998).abs() < 1e-6);
            assert_eq!(frame.measured, 55152 + 51 + 37 + 49);
            assert_eq!(frame.target, calibration.frame_target(CpuMode::Z80, rate));
            assert_eq!(stats.aggregate(rate, 0).value, 11000.0);
            for (t, test) in TESTS.iter().enumerate().skip(CALIBRATION_TESTS) {
                assert_eq!(stats.aggregate(rate, t).min + 1, stats.aggregate(rate, t).max);
                let cost = stats.final_cost(rate, t);
                assert!((cost - f64::from(test.single_cost)).abs() < 0.01, "{}: {}", test.name, cost);
                assert_eq!(signed_round(stats.deviation(rate, t)), 0, "{}", test.name);
            }
        }
        assert_eq!(stats.test_count(), TESTS.len());
    }

    #[test]
    fn zero_count_yields_nan_cost() {
        assert!(final_cost(55000.0, 0, 0, 0.0).is_nan());
        assert_eq!(final_cost(55000.0, 0, 0, 11000.0), 5.0);
        assert_eq!(final_cost(55000.0, 10, 0, 11000.0), 55010.0 / 11000.0);
    }

    #[test]
    #[should_panic(expected = "too many trials")]
    fn results_reject_surplus_trials() {
        let mut results = Results::new(2, 1);
        results.record(RefreshRate::Pal, 1, Trial::default());
        assert!(!results.is_complete());
        results.record(RefreshRate::Pal, 1, Trial::default());
    }
}
