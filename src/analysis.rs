/*
    Copyright (C) 2023  The VDPTEST Authors

    This file is part of VDPTEST, a Rust library for measuring MSX VDP I/O timing.

    For the full copyright notice, see the lib.rs file.
*/
//! Differential cost analysis.
//!
//! A metric isolates the cost of a single mechanism by subtracting the average deviation of a
//! baseline group from the average deviation of a group of tests exhibiting the effect. Both
//! groups share any systematic bias, e.g. the common path overhead.
use core::fmt;
use arrayvec::ArrayVec;
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::catalog::{TestDescriptor, TestGroups};
use crate::chip::RefreshRate;
use crate::stats::{round_deviation, Statistics};

/// The number of differential metrics.
pub const METRIC_COUNT: usize = 4;

/// A source of per test deviations from the declared cost.
pub trait Deviations {
    /// Returns the observed cost less the declared cost of a single instruction of `test`.
    fn deviation(&self, rate: RefreshRate, test: usize) -> f64;
}

impl Deviations for Statistics {
    #[inline]
    fn deviation(&self, rate: RefreshRate, test: usize) -> f64 {
        Statistics::deviation(self, rate, test)
    }
}

/// A named differential metric.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Extra cycles of the VDP ports compared to a port without wait states.
    VdpIo,
    /// Extra cycles of opcode fetches from a cartridge bank.
    RomSegment,
    /// Extra cycles of diverse bus cycles executed from a cartridge bank.
    RomFundamental,
    /// Extra cycles of tests executed from a cartridge bank compared to their RAM twins.
    RomReference,
}

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::VdpIo, Metric::RomSegment, Metric::RomFundamental, Metric::RomReference
    ];
    /// Returns the effect and the baseline groups.
    pub fn groups(self) -> (TestGroups, TestGroups) {
        match self {
            Metric::VdpIo => (TestGroups::VDP_IO, TestGroups::PLAIN_IO),
            Metric::RomSegment => (TestGroups::ROM_SEGMENT, TestGroups::RAM_SEGMENT),
            Metric::RomFundamental => (TestGroups::ROM_FUNDAMENTAL, TestGroups::RAM_FUNDAMENTAL),
            Metric::RomReference => (TestGroups::ROM_REFERENCE, TestGroups::RAM_REFERENCE),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::VdpIo => "VDP I/O",
            Metric::RomSegment => "ROM segment",
            Metric::RomFundamental => "ROM fundamental",
            Metric::RomReference => "ROM reference",
        })
    }
}

/// The value of a differential metric.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricValue {
    pub metric: Metric,
    /// Extra cycles attributed to the mechanism, `None` if a group has no measured deviation.
    pub value: Option<i32>,
    /// The average deviation of the effect group.
    pub effect: f64,
    /// The average deviation of the baseline group.
    pub baseline: f64,
}

/// Returns the average deviation of every test in `group` at both refresh rates.
///
/// # Panics
/// Panics if no test belongs to the `group`.
pub fn group_deviation<D: Deviations + ?Sized>(
        deviations: &D,
        tests: &[TestDescriptor],
        group: TestGroups
    ) -> f64
{
    let mut total = 0.0;
    let mut count = 0u32;
    for (t, _) in tests.iter().enumerate().filter(|(_, test)| test.groups.intersects(group)) {
        for rate in RefreshRate::ALL.iter().copied() {
            total += deviations.deviation(rate, t);
            count += 1;
        }
    }
    assert!(count != 0, "no test belongs to the group {:?}", group);
    total / f64::from(count)
}

/// Computes a single differential metric.
///
/// # Panics
/// Panics if any of the metric's groups is empty.
pub fn metric<D: Deviations + ?Sized>(deviations: &D, tests: &[TestDescriptor], metric: Metric) -> MetricValue {
    let (effect_group, baseline_group) = metric.groups();
    let effect = group_deviation(deviations, tests, effect_group);
    let baseline = group_deviation(deviations, tests, baseline_group);
    let value = round_deviation(effect).zip(round_deviation(baseline)).map(|(e, b)| e - b);
    debug!("{}: effect: {:.3} baseline: {:.3} value: {:?}", metric, effect, baseline, value);
    MetricValue { metric, value, effect, baseline }
}

/// Computes all the differential metrics.
///
/// # Panics
/// Panics if any group is empty.
pub fn analyze<D: Deviations + ?Sized>(deviations: &D, tests: &[TestDescriptor]) -> ArrayVec<MetricValue, METRIC_COUNT> {
    Metric::ALL.iter().map(|&m| metric(deviations, tests, m)).collect()
}
