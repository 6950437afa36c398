//! Rollup Producer: trailing-window and full-history summaries per
//! (step, device), grouped into charts for the external renderer.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::aggregate::{geomean, Sample};
use crate::cache::FILE_PREFIX;
use crate::config::{RunParams, Selection};
use crate::roofline::MetricTable;
use crate::store::SeriesStore;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-\w.]").expect("file name pattern"));

fn round_int(value: f64) -> i64 {
    value.round_ties_even() as i64
}

fn head<T>(values: &[T], window: Option<usize>) -> &[T] {
    match window {
        Some(n) => &values[..n.min(values.len())],
        None => values,
    }
}

/// Parts of a step name: `<runtime> <subject> <properties...>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepCaption {
    pub runtime: String,
    pub subject: String,
    pub props: String,
}

impl StepCaption {
    pub fn parse(step: &str) -> Self {
        let mut tokens = step.split_whitespace();
        let runtime = tokens.next().unwrap_or_default().to_string();
        let subject = tokens.next().unwrap_or_default().to_string();
        let props = tokens.collect::<Vec<_>>().join(" ");
        Self {
            runtime,
            subject,
            props,
        }
    }
}

/// File stem of the chart for `device` and step properties `props`.
pub fn chart_stem(device: &str, props: &str) -> String {
    let props = props.trim().replace(' ', "_");
    let props = UNSAFE_FILE_CHARS.replace_all(&props, "");
    format!(
        "{FILE_PREFIX}-{}-{}",
        device.to_lowercase(),
        props.to_lowercase()
    )
}

/// Summary of one step on one device. Sequences run newest build first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRollup {
    pub step: String,
    pub caption: StepCaption,
    /// Selected throughput per charted build.
    pub selected: Vec<f64>,
    /// Focus-kernel throughput per charted build.
    pub focus: Vec<f64>,
    /// Focus throughput relative to the roofline peak (fraction).
    pub efficiency: Vec<f64>,
    pub builds: Vec<u64>,
    /// Rounded geometric means: small, medium, large, selected.
    pub summary: [i64; 4],
    pub focus_summary: i64,
    /// Window efficiency in percent, rounded.
    pub efficiency_pct: i64,
    /// Largest kernel count per bucket seen in the window, summed.
    pub kernels: u64,
    window_label: String,
}

impl StepRollup {
    /// `last5=S..M..L=ALL GFLOPS/s`
    pub fn summary_label(&self) -> String {
        let [s, m, l, all] = self.summary;
        format!("{}{s}..{m}..{l}={all} GFLOPS/s", self.window_label)
    }

    /// `last5=FOCUS GFLOPS/s (EFF%)`
    pub fn focus_label(&self) -> String {
        format!(
            "{}{} GFLOPS/s ({}%)",
            self.window_label, self.focus_summary, self.efficiency_pct
        )
    }

    /// Newest and oldest charted build.
    pub fn build_range(&self) -> (u64, u64) {
        (
            self.builds.first().copied().unwrap_or_default(),
            self.builds.last().copied().unwrap_or_default(),
        )
    }

    /// Console line, e.g. `GPU1 OpenCL fp64: last5=1..2..3=2 GFLOPS/s (nbuilds=5)`.
    pub fn summary_line(&self, device: &str) -> String {
        format!(
            "{device} {} {}: {} (nbuilds={})",
            self.caption.runtime,
            self.caption.props,
            self.summary_label(),
            self.builds.len()
        )
    }
}

/// One plotted line: the selected or focus throughput of a step, padded with
/// `None` so every line of a chart has the same length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartLine {
    pub label: String,
    pub points: Vec<Option<f64>>,
}

/// Chart data for one (device, step properties) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSet {
    pub stem: String,
    pub device: String,
    pub title: String,
    pub summary_title: String,
    pub focus_title: String,
    pub summary_lines: Vec<ChartLine>,
    pub focus_lines: Vec<ChartLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRollup {
    pub device: String,
    pub steps: Vec<StepRollup>,
    pub charts: Vec<ChartSet>,
    /// Best window efficiency over all steps, in percent.
    pub efficiency_pct: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollup {
    pub fai: f64,
    pub devices: Vec<DeviceRollup>,
    /// Range of per-device efficiencies in percent (0 when nothing was charted).
    pub min_efficiency_pct: i64,
    pub max_efficiency_pct: i64,
}

impl Rollup {
    /// Closing summary: watermark progression plus the attainable range of
    /// every device with peak metrics.
    pub fn summary_lines(&self, metrics: &MetricTable, before: u64, latest: u64) -> Vec<String> {
        let progression = if latest > 0 {
            format!("{before}->{latest}")
        } else {
            before.to_string()
        };
        let mut lines = vec![format!("Common build number (lockstep): {progression}")];
        for (device, peak) in metrics {
            let pct = peak.bandwidth_bound(self.fai) / 100.0;
            lines.push(format!(
                "{device}: {}..{} GFLOPS/s",
                round_int(self.min_efficiency_pct as f64 * pct),
                round_int(self.max_efficiency_pct as f64 * pct)
            ));
        }
        lines
    }
}

pub struct RollupProducer<'a> {
    fai: f64,
    metrics: &'a MetricTable,
    params: &'a RunParams,
}

impl<'a> RollupProducer<'a> {
    pub fn new(fai: f64, metrics: &'a MetricTable, params: &'a RunParams) -> Self {
        Self {
            fai,
            metrics,
            params,
        }
    }

    fn window_label(&self) -> String {
        match self.params.window() {
            Some(n) => format!("last{n}="),
            None => String::new(),
        }
    }

    fn selected(&self, sample: &Sample) -> f64 {
        match self.params.selection {
            Selection::Combined => sample.combined(),
            Selection::Bucket(i) => sample.bucket(i).map(|b| b.geomean).unwrap_or_default(),
        }
    }

    /// Rolls up `store` (usually roofline-filtered) for `devices` in order.
    /// A device is charted only if every step has at least one sample for it.
    pub fn produce<'d>(
        &self,
        store: &SeriesStore,
        devices: impl IntoIterator<Item = &'d str>,
    ) -> Rollup {
        let mut seen = HashSet::new();
        let mut rollups = Vec::new();
        let (mut min_eff, mut max_eff) = (0, 0);

        for device in devices {
            if !seen.insert(device) {
                continue;
            }
            let Some(rollup) = self.produce_device(store, device) else {
                continue;
            };
            let eff = rollup.efficiency_pct;
            if min_eff > eff || min_eff == 0 {
                min_eff = eff;
            }
            if max_eff < eff {
                max_eff = eff;
            }
            rollups.push(rollup);
        }

        Rollup {
            fai: self.fai,
            devices: rollups,
            min_efficiency_pct: min_eff,
            max_efficiency_pct: max_eff,
        }
    }

    fn produce_device(&self, store: &SeriesStore, device: &str) -> Option<DeviceRollup> {
        let peak = self.metrics.get(device)?.bandwidth_bound(self.fai);
        let len_of = |step: &str| store.series(step, device).map_or(0, |s| s.len());

        let minlen = store.step_names().map(len_of).min()?;
        if minlen == 0 {
            return None;
        }
        let longest = store.step_names().map(len_of).max()?;
        let maxlen = match self.params.maxn {
            0 => longest,
            cap => longest.min(cap),
        };
        let spread = maxlen.saturating_sub(minlen);

        let mut steps = Vec::new();
        let mut charts: BTreeMap<String, ChartSet> = BTreeMap::new();
        let mut order = Vec::new();
        let mut best = 0;

        for (step, devices) in store.steps() {
            let Some(series) = devices.get(device) else {
                continue;
            };
            let newest_first: Vec<Sample> = series.samples().iter().rev().copied().collect();
            let taken = &newest_first[..maxlen.min(newest_first.len())];
            let keep = if taken.len() == maxlen {
                maxlen - self.params.maxm.min(spread)
            } else {
                taken.len()
            };
            let window = &taken[..keep];

            let rollup = self.step_rollup(step, window, peak);
            best = best.max(rollup.efficiency_pct);

            let stem = chart_stem(device, &rollup.caption.props);
            if !charts.contains_key(&stem) {
                order.push(stem.clone());
            }
            let chart = charts.entry(stem.clone()).or_insert_with(|| ChartSet {
                stem,
                device: device.to_string(),
                title: String::new(),
                summary_title: String::new(),
                focus_title: format!(
                    "Single Kernel: MNK={}, AI={} FLOPS/Byte, Roofline={} GFLOPS/s",
                    self.params.focus,
                    (self.fai * 1000.0).round_ties_even() / 1000.0,
                    round_int(peak)
                ),
                summary_lines: Vec::new(),
                focus_lines: Vec::new(),
            });
            chart.title = format!(
                "Performance of {} {} on {device}",
                rollup.caption.subject, rollup.caption.props
            );
            chart.summary_title = format!("Summary of {} SMM-kernels", rollup.kernels);

            let pad = maxlen - window.len();
            let padded = |values: &[f64]| -> Vec<Option<f64>> {
                values
                    .iter()
                    .copied()
                    .map(Some)
                    .chain(std::iter::repeat(None).take(pad))
                    .collect()
            };
            let (newest, oldest) = rollup.build_range();
            chart.summary_lines.push(ChartLine {
                label: format!("{}: {}", rollup.caption.runtime, rollup.summary_label()),
                points: padded(&rollup.selected),
            });
            chart.focus_lines.push(ChartLine {
                label: format!(
                    "{}: build={oldest}..{newest} {}",
                    rollup.caption.runtime,
                    rollup.focus_label()
                ),
                points: padded(&rollup.focus),
            });
            steps.push(rollup);
        }

        let charts = order
            .into_iter()
            .filter_map(|stem| charts.remove(&stem))
            .collect();
        Some(DeviceRollup {
            device: device.to_string(),
            steps,
            charts,
            efficiency_pct: best,
        })
    }

    fn step_rollup(&self, step: &str, window: &[Sample], peak: f64) -> StepRollup {
        let n = self.params.window();
        let recent = head(window, n);

        let bucket_summary =
            |i: usize| round_int(geomean(recent.iter().filter_map(|s| s.bucket(i)).map(|b| b.geomean)));
        let selected: Vec<f64> = window.iter().map(|s| self.selected(s)).collect();
        let focus: Vec<f64> = window.iter().map(|s| s.focus).collect();
        let efficiency: Vec<f64> = focus
            .iter()
            .map(|f| if peak > 0.0 { f / peak } else { 0.0 })
            .collect();

        let kernels = (0..3)
            .map(|i| {
                window
                    .iter()
                    .filter_map(|s| s.bucket(i))
                    .map(|b| u64::from(b.count))
                    .max()
                    .unwrap_or_default()
            })
            .sum();

        StepRollup {
            step: step.to_string(),
            caption: StepCaption::parse(step),
            summary: [
                bucket_summary(0),
                bucket_summary(1),
                bucket_summary(2),
                round_int(geomean(head(&selected, n).iter().copied())),
            ],
            focus_summary: round_int(geomean(head(&focus, n).iter().copied())),
            efficiency_pct: round_int(100.0 * geomean(head(&efficiency, n).iter().copied())),
            kernels,
            builds: window.iter().map(|s| s.build).collect(),
            selected,
            focus,
            efficiency,
            window_label: self.window_label(),
        }
    }
}
