//! Kernel classification and per-build aggregation.
//!
//! Measurements are bucketed by problem volume (`M*N*K`) into small, medium
//! and large classes. Each class collapses to a geometric mean plus the number
//! of contributing kernels; the focus kernel is tracked separately.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Upper volume bound (inclusive) of the small class.
pub const SMALL_LIMIT: u64 = 13 * 13 * 13;
/// Upper volume bound (inclusive) of the medium class.
pub const MEDIUM_LIMIT: u64 = 23 * 23 * 23;

/// Problem size of a matrix-multiply kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mnk {
    pub m: u64,
    pub n: u64,
    pub k: u64,
}

impl Mnk {
    pub const fn new(m: u64, n: u64, k: u64) -> Self {
        Self { m, n, k }
    }

    pub fn volume(&self) -> u64 {
        self.m.saturating_mul(self.n).saturating_mul(self.k)
    }
}

impl fmt::Display for Mnk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

impl FromStr for Mnk {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims: Vec<u64> = s
            .trim()
            .split('x')
            .map(|d| d.trim().parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|_| Error::InvalidFocus(s.to_string()))?;
        match dims.as_slice() {
            [m, n, k] if *m > 0 && *n > 0 && *k > 0 => Ok(Self::new(*m, *n, *k)),
            _ => Err(Error::InvalidFocus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn of(mnk: &Mnk) -> Self {
        let size = mnk.volume();
        if size <= SMALL_LIMIT {
            SizeClass::Small
        } else if size <= MEDIUM_LIMIT {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }
}

/// Geometric mean of one size class and the number of kernels behind it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f64, u32)", into = "(f64, u32)")]
pub struct Bucket {
    pub geomean: f64,
    pub count: u32,
}

impl From<(f64, u32)> for Bucket {
    fn from((geomean, count): (f64, u32)) -> Self {
        Self { geomean, count }
    }
}

impl From<Bucket> for (f64, u32) {
    fn from(b: Bucket) -> Self {
        (b.geomean, b.count)
    }
}

type SampleRepr = (Bucket, Bucket, Bucket, f64, u64);

/// Aggregated measurements of one job in one build.
///
/// Serialised as `[[gm, n], [gm, n], [gm, n], focus, build]` to stay
/// compatible with existing cache files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "SampleRepr", into = "SampleRepr")]
pub struct Sample {
    pub small: Bucket,
    pub medium: Bucket,
    pub large: Bucket,
    pub focus: f64,
    pub build: u64,
}

impl From<SampleRepr> for Sample {
    fn from((small, medium, large, focus, build): SampleRepr) -> Self {
        Self {
            small,
            medium,
            large,
            focus,
            build,
        }
    }
}

impl From<Sample> for SampleRepr {
    fn from(s: Sample) -> Self {
        (s.small, s.medium, s.large, s.focus, s.build)
    }
}

impl Sample {
    pub fn buckets(&self) -> [Bucket; 3] {
        [self.small, self.medium, self.large]
    }

    pub fn bucket(&self, index: usize) -> Option<Bucket> {
        self.buckets().get(index).copied()
    }

    pub fn total_count(&self) -> u64 {
        self.buckets().iter().map(|b| u64::from(b.count)).sum()
    }

    /// Throughput over all kernels of the build: the bucket means are
    /// combined in log space, weighted by their kernel counts.
    pub fn combined(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        let log_sum: f64 = self
            .buckets()
            .iter()
            .filter(|b| b.count > 0 && b.geomean > 0.0)
            .map(|b| b.geomean.ln() * f64::from(b.count))
            .sum();
        (log_sum / total as f64).exp()
    }
}

/// Geometric mean over the strictly positive entries; 0 when there are none.
pub fn geomean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, n) = values
        .into_iter()
        .filter(|v| *v > 0.0)
        .fold((0.0f64, 0usize), |(sum, n), v| (sum + v.ln(), n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).exp()
    }
}

/// Rounds half-to-even at the given number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Why a job's measurements did not turn into a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The focus kernel was absent or reported a non-positive value.
    MissingFocus,
}

/// Kernel values sorted into size classes for one job.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Classified {
    pub small: Vec<f64>,
    pub medium: Vec<f64>,
    pub large: Vec<f64>,
    pub focus: Option<f64>,
}

impl Classified {
    fn bucket(values: &[f64]) -> Bucket {
        Bucket {
            geomean: round_to(geomean(values.iter().copied()), 1),
            count: values.len() as u32,
        }
    }

    /// Collapses the classes into a sample for `build`.
    pub fn into_sample(self, build: u64) -> Result<Sample, Rejection> {
        match self.focus {
            Some(focus) if focus > 0.0 => Ok(Sample {
                small: Self::bucket(&self.small),
                medium: Self::bucket(&self.medium),
                large: Self::bucket(&self.large),
                focus,
                build,
            }),
            _ => Err(Rejection::MissingFocus),
        }
    }
}

/// Sorts positive measurements into size classes and picks out the focus kernel.
/// When the focus kernel appears more than once, the last value wins.
pub fn classify(pairs: &[(Mnk, f64)], focus: &Mnk) -> Classified {
    let mut out = Classified::default();
    for (mnk, value) in pairs {
        if value.is_nan() || *value <= 0.0 {
            continue;
        }
        match SizeClass::of(mnk) {
            SizeClass::Small => out.small.push(*value),
            SizeClass::Medium => out.medium.push(*value),
            SizeClass::Large => out.large.push(*value),
        }
        if mnk == focus {
            out.focus = Some(*value);
        }
    }
    out
}

/// Classifies `pairs` and aggregates them into a sample for `build`.
pub fn aggregate(pairs: &[(Mnk, f64)], focus: &Mnk, build: u64) -> Result<Sample, Rejection> {
    classify(pairs, focus).into_sample(build)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOCUS: Mnk = Mnk::new(23, 23, 23);

    #[test]
    fn classifies_by_volume() {
        let pairs = [
            (Mnk::new(8, 8, 8), 50.0),
            (Mnk::new(23, 23, 23), 120.0),
            (Mnk::new(30, 30, 30), 80.0),
        ];
        let c = classify(&pairs, &FOCUS);
        assert_eq!(c.small, vec![50.0]);
        assert_eq!(c.medium, vec![120.0]);
        assert_eq!(c.large, vec![80.0]);
        assert_eq!(c.focus, Some(120.0));
    }

    #[test]
    fn class_boundaries_are_inclusive() {
        assert_eq!(SizeClass::of(&Mnk::new(13, 13, 13)), SizeClass::Small);
        assert_eq!(SizeClass::of(&Mnk::new(13, 13, 14)), SizeClass::Medium);
        assert_eq!(SizeClass::of(&Mnk::new(23, 23, 23)), SizeClass::Medium);
        assert_eq!(SizeClass::of(&Mnk::new(23, 23, 24)), SizeClass::Large);
    }

    #[test]
    fn non_positive_values_are_ignored() {
        let pairs = [(Mnk::new(4, 4, 4), 0.0), (Mnk::new(23, 23, 23), -3.0)];
        let c = classify(&pairs, &FOCUS);
        assert!(c.small.is_empty());
        assert!(c.medium.is_empty());
        assert_eq!(c.focus, None);
        assert_eq!(aggregate(&pairs, &FOCUS, 7), Err(Rejection::MissingFocus));
    }

    #[test]
    fn nan_values_are_ignored() {
        let pairs = [
            (Mnk::new(4, 4, 4), f64::NAN),
            (Mnk::new(23, 23, 23), 100.0),
            (Mnk::new(23, 23, 23), f64::NAN),
        ];
        let c = classify(&pairs, &FOCUS);
        assert!(c.small.is_empty());
        assert_eq!(c.medium, vec![100.0]);
        assert_eq!(c.focus, Some(100.0));

        let sample = aggregate(&pairs, &FOCUS, 3).unwrap();
        assert_eq!(sample.small.count, 0);
        assert_eq!(sample.medium, Bucket { geomean: 100.0, count: 1 });
    }

    #[test]
    fn geomean_of_empty_or_non_positive_is_zero() {
        assert_eq!(geomean(Vec::<f64>::new()), 0.0);
        assert_eq!(geomean([0.0, -1.0, -5.5]), 0.0);
    }

    #[test]
    fn geomean_skips_non_positive_entries() {
        let g = geomean([2.0, 8.0, 0.0]);
        assert!((g - 4.0).abs() < 1e-12, "got {g}");
    }

    #[test]
    fn sample_rounds_bucket_means_to_one_decimal() {
        let pairs = [
            (Mnk::new(4, 4, 4), 10.0),
            (Mnk::new(5, 5, 5), 20.0),
            (Mnk::new(23, 23, 23), 120.0),
        ];
        let sample = aggregate(&pairs, &FOCUS, 42).unwrap();
        assert_eq!(sample.small, Bucket { geomean: 14.1, count: 2 });
        assert_eq!(sample.medium, Bucket { geomean: 120.0, count: 1 });
        assert_eq!(sample.large, Bucket { geomean: 0.0, count: 0 });
        assert_eq!(sample.focus, 120.0);
        assert_eq!(sample.build, 42);
    }

    #[test]
    fn combined_weights_buckets_by_count() {
        let sample = Sample {
            small: Bucket { geomean: 10.0, count: 3 },
            medium: Bucket { geomean: 1000.0, count: 1 },
            large: Bucket::default(),
            focus: 1.0,
            build: 1,
        };
        let expected = ((10f64.ln() * 3.0 + 1000f64.ln()) / 4.0).exp();
        assert!((sample.combined() - expected).abs() < 1e-9);
    }

    #[test]
    fn focus_triple_parses_from_string() {
        assert_eq!("23x23x23".parse::<Mnk>().unwrap(), FOCUS);
        assert_eq!("4x5x6".parse::<Mnk>().unwrap().to_string(), "4x5x6");
        assert!("23x23".parse::<Mnk>().is_err());
        assert!("0x1x1".parse::<Mnk>().is_err());
        assert!("axbxc".parse::<Mnk>().is_err());
    }

    #[test]
    fn sample_uses_cache_array_layout() {
        let sample = Sample {
            small: Bucket { geomean: 1.5, count: 2 },
            medium: Bucket { geomean: 2.5, count: 1 },
            large: Bucket { geomean: 0.0, count: 0 },
            focus: 3.25,
            build: 9,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, "[[1.5,2],[2.5,1],[0.0,0],3.25,9]");
    }
}
