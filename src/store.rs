//! Append-only time series of samples per (step, device).
//!
//! The store doubles as the step registry: its key set is the list of known
//! step names, seeded from configuration and extended as the cache is merged.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::aggregate::Sample;

/// Samples of one (step, device) pair, unique by build number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    samples: Vec<Sample>,
    builds: HashSet<u64>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `sample` unless a sample of the same build is already present.
    /// Returns whether the sample was added.
    pub fn append(&mut self, sample: Sample) -> bool {
        if !self.builds.insert(sample.build) {
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn contains(&self, build: u64) -> bool {
        self.builds.contains(&build)
    }

    /// Orders samples from oldest to latest build.
    pub fn finalize(&mut self) {
        self.samples.sort_by_key(|s| s.build);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Series holding only the samples accepted by `keep`.
    pub fn filtered(&self, mut keep: impl FnMut(&Sample) -> bool) -> Series {
        self.samples.iter().copied().filter(|s| keep(s)).collect()
    }
}

impl FromIterator<Sample> for Series {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut series = Series::new();
        for sample in iter {
            series.append(sample);
        }
        series
    }
}

impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.samples.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let samples = Vec::<Sample>::deserialize(deserializer)?;
        Ok(samples.into_iter().collect())
    }
}

pub type DeviceSeries = BTreeMap<String, Series>;

/// Step name → device → series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesStore {
    steps: BTreeMap<String, DeviceSeries>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` without any series.
    pub fn register_step(&mut self, step: &str) {
        self.steps.entry(step.to_string()).or_default();
    }

    pub fn is_known_step(&self, step: &str) -> bool {
        self.steps.contains_key(step)
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn steps(&self) -> impl Iterator<Item = (&str, &DeviceSeries)> {
        self.steps.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn series(&self, step: &str, device: &str) -> Option<&Series> {
        self.steps.get(step)?.get(device)
    }

    /// Existing series for (step, device), or a newly created empty one.
    pub fn ensure(&mut self, step: &str, device: &str) -> &mut Series {
        self.steps
            .entry(step.to_string())
            .or_default()
            .entry(device.to_string())
            .or_default()
    }

    /// Appends `sample` to (step, device); duplicate builds are ignored.
    pub fn append(&mut self, step: &str, device: &str, sample: Sample) -> bool {
        self.ensure(step, device).append(sample)
    }

    pub fn finalize(&mut self, step: &str, device: &str) {
        if let Some(series) = self.steps.get_mut(step).and_then(|d| d.get_mut(device)) {
            series.finalize();
        }
    }

    pub fn finalize_all(&mut self) {
        for series in self.steps.values_mut().flat_map(|d| d.values_mut()) {
            series.finalize();
        }
    }

    /// Merges another store, e.g. a cached one, into this registry. For steps
    /// present in both, `other`'s device map replaces the current one.
    pub fn merge(&mut self, other: SeriesStore) {
        self.steps.extend(other.steps);
    }

    /// Rebuilds the store keeping only samples accepted by `keep`.
    /// Every step and device key survives, possibly with an empty series.
    pub fn filter_samples(&self, mut keep: impl FnMut(&str, &Sample) -> bool) -> SeriesStore {
        let steps = self
            .steps
            .iter()
            .map(|(step, devices)| {
                let devices = devices
                    .iter()
                    .map(|(device, series)| {
                        (device.clone(), series.filtered(|s| keep(device.as_str(), s)))
                    })
                    .collect();
                (step.clone(), devices)
            })
            .collect();
        SeriesStore { steps }
    }

    pub fn sample_count(&self) -> usize {
        self.steps
            .values()
            .flat_map(|d| d.values())
            .map(Series::len)
            .sum()
    }
}
