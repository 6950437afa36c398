//! Configuration tables and run parameters.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::aggregate::Mnk;
use crate::error::{Error, Result};
use crate::roofline::{EfficiencyBand, MetricTable};
use crate::store::SeriesStore;

pub const DEVICES_FILE: &str = "buildkite-devs.json";
pub const METRICS_FILE: &str = "buildkite-metric.json";
pub const STEPS_FILE: &str = "buildkite-steps.json";

/// Configuration tables, as found in the working directory.
#[derive(Debug, Clone, Default)]
pub struct ConfigTables {
    /// Alias groups, e.g. `[["GPU1", "host1", "host2"], ["GPU2", "host3"]]`.
    pub devices: Vec<Vec<String>>,
    /// Device peaks, e.g. `{"GPU1": [15700, 900]}`.
    pub metrics: MetricTable,
    /// Step registry seed, e.g. `{"OpenCL DBCSR fp64": {}}`.
    pub steps: SeriesStore,
}

fn read_json<T: DeserializeOwned>(path: PathBuf) -> Result<T> {
    let raw = fs::read_to_string(&path).map_err(|e| Error::Config {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| Error::Config {
        path,
        reason: e.to_string(),
    })
}

impl ConfigTables {
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            devices: read_json(dir.join(DEVICES_FILE))?,
            metrics: read_json(dir.join(METRICS_FILE))?,
            steps: read_json(dir.join(STEPS_FILE))?,
        })
    }
}

/// Which throughput the rollup charts per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Count-weighted combination of all three buckets.
    Combined,
    /// One bucket: 0 small, 1 medium, 2 large.
    Bucket(usize),
}

impl Selection {
    pub fn from_index(index: i64) -> Self {
        match index {
            0..=2 => Selection::Bucket(index as usize),
            _ => Selection::Combined,
        }
    }
}

/// Parameters of one run after clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    /// Explicit starting watermark; 0 reads the cached one.
    pub watermark: u64,
    pub selection: Selection,
    pub focus: Mnk,
    /// Trailing window for summaries; 0 or negative covers the whole series.
    pub lastn: i64,
    /// Assumed size ratio of the arithmetic-intensity model.
    pub sprat: f64,
    /// Cap on charted samples per series (0 = unlimited).
    pub maxn: usize,
    /// Cap on samples trimmed to align series of unequal length.
    pub maxm: usize,
    pub band: EfficiencyBand,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            watermark: 0,
            selection: Selection::Combined,
            focus: Mnk::new(23, 23, 23),
            lastn: 5,
            sprat: 2.0,
            maxn: 0,
            maxm: 0,
            band: EfficiencyBand::default(),
        }
    }
}

/// Unclamped values straight from the command line.
#[derive(Debug, Clone)]
pub struct RawParams {
    pub watermark: i64,
    pub index: i64,
    pub focus: String,
    pub lastn: i64,
    pub sprat: f64,
    pub maxn: i64,
    pub maxm: i64,
    pub vmin: i64,
    pub vmax: i64,
}

impl RunParams {
    pub fn from_raw(raw: &RawParams) -> Result<Self> {
        let sprat = if raw.sprat.is_nan() { 0.0 } else { raw.sprat.max(0.0) };
        Ok(Self {
            watermark: raw.watermark.max(0) as u64,
            selection: Selection::from_index(raw.index),
            focus: raw.focus.parse()?,
            lastn: raw.lastn,
            sprat,
            maxn: raw.maxn.max(0) as usize,
            maxm: raw.maxm.max(0) as usize,
            band: EfficiencyBand {
                vmin: raw.vmin.clamp(0, 100) as f64,
                vmax: raw.vmax.clamp(0, 200) as f64,
            },
        })
    }

    /// Trailing window length, `None` for the whole series.
    pub fn window(&self) -> Option<usize> {
        (self.lastn > 0).then_some(self.lastn as usize)
    }
}
