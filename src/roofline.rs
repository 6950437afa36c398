//! Roofline bounds: arithmetic intensity of the focus kernel and the
//! efficiency band used to reject implausible measurements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Mnk, Sample};
use crate::store::SeriesStore;

/// Size of a single-precision element in bytes.
const ELEMENT_BYTES: f64 = 4.0;

/// Peak rates of one device: `[GFLOPS/s, GB/s]` in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct PeakMetric {
    pub compute: f64,
    pub bandwidth: f64,
}

impl From<(f64, f64)> for PeakMetric {
    fn from((compute, bandwidth): (f64, f64)) -> Self {
        Self { compute, bandwidth }
    }
}

impl From<PeakMetric> for (f64, f64) {
    fn from(p: PeakMetric) -> Self {
        (p.compute, p.bandwidth)
    }
}

pub type MetricTable = BTreeMap<String, PeakMetric>;

/// FLOPs per byte of an `M x N x K` kernel, assuming C stays resident in
/// registers or cache (no read-for-ownership) and the size ratio `sprat`.
pub fn arithmetic_intensity(focus: &Mnk, sprat: f64) -> f64 {
    let (m, n, k) = (focus.m as f64, focus.n as f64, focus.k as f64);
    (2.0 * m * n * k) / (ELEMENT_BYTES * sprat * (k * (m + n)))
}

impl PeakMetric {
    /// Memory-bound throughput at intensity `fai`, the peak efficiencies are
    /// measured against. `compute` does not enter it.
    pub fn bandwidth_bound(&self, fai: f64) -> f64 {
        fai * self.bandwidth
    }
}

/// Accepted efficiency range in percent of the bandwidth bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyBand {
    pub vmin: f64,
    pub vmax: f64,
}

impl Default for EfficiencyBand {
    fn default() -> Self {
        Self {
            vmin: 0.0,
            vmax: 100.0,
        }
    }
}

impl EfficiencyBand {
    /// Inclusive on both ends.
    pub fn accepts(&self, sample: &Sample, fai: f64, peak: &PeakMetric) -> bool {
        let bound = peak.bandwidth_bound(fai);
        let scaled = sample.focus * 100.0;
        sample.total_count() > 0 && bound * self.vmin <= scaled && scaled <= bound * self.vmax
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RooflineFilter<'a> {
    pub fai: f64,
    pub metrics: &'a MetricTable,
    pub band: EfficiencyBand,
}

impl<'a> RooflineFilter<'a> {
    pub fn new(fai: f64, metrics: &'a MetricTable, band: EfficiencyBand) -> Self {
        Self { fai, metrics, band }
    }

    /// Copy of `store` holding only samples inside the band. Samples of
    /// devices without peak metrics are dropped.
    pub fn apply(&self, store: &SeriesStore) -> SeriesStore {
        store.filter_samples(|device, sample| match self.metrics.get(device) {
            Some(peak) => self.band.accepts(sample, self.fai, peak),
            None => false,
        })
    }
}
