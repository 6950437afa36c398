//! One complete pass: load state, ingest new builds, persist, filter, roll up.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::alias::AliasTable;
use crate::cache::Cache;
use crate::config::{ConfigTables, RunParams};
use crate::fetch::{Fetcher, IngestReport};
use crate::parser::LogParser;
use crate::provider::{BuildSource, HttpSource};
use crate::render::ChartSink;
use crate::rollup::{Rollup, RollupProducer};
use crate::roofline::{arithmetic_intensity, RooflineFilter};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub url: String,
    pub token: String,
    /// Directory holding configuration tables and the cache.
    pub dir: PathBuf,
    pub params: RunParams,
    /// Per HTTP request.
    pub timeout: Duration,
    /// Print one `.` per processed build.
    pub progress: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub watermark_before: u64,
    pub watermark_after: u64,
    pub report: IngestReport,
    pub rollup: Rollup,
}

/// Runs against the HTTP provider named in `opts`.
pub async fn run(opts: &RunOptions, sink: &mut dyn ChartSink, out: &mut dyn Write) -> Result<RunSummary> {
    let tables = ConfigTables::load(&opts.dir).context("loading configuration tables")?;
    let source = HttpSource::new(&opts.url, &opts.token, opts.timeout)
        .context("creating provider client")?;
    run_with_source(opts, tables, &source, sink, out).await
}

pub async fn run_with_source<S>(
    opts: &RunOptions,
    tables: ConfigTables,
    source: &S,
    sink: &mut dyn ChartSink,
    out: &mut dyn Write,
) -> Result<RunSummary>
where
    S: BuildSource + ?Sized,
{
    let params = &opts.params;
    let aliases = AliasTable::new(&tables.devices).context("compiling device aliases")?;
    let mut store = tables.steps;

    let cache = Cache::new(&opts.dir, &params.focus);
    let before = cache.load_into(params.watermark, &mut store);
    info!(watermark = before, steps = store.step_names().count(), "starting ingestion");

    let fetcher = Fetcher::new(LogParser::new(&aliases), params.focus).with_progress(opts.progress);
    let report = fetcher.ingest(source, &mut store, before).await;

    if report.work > 0 {
        writeln!(out)?;
        if report.has_errors() {
            writeln!(
                out,
                "Errors: steps={} vals={}",
                report.step_errors, report.value_errors
            )?;
        }
    }

    // Partial builds still append samples, so order is restored on every pass.
    store.finalize_all();
    let after = report.next_watermark(before);
    if report.latest > 0 {
        if let Err(err) = cache.save(&store, after) {
            warn!(
                path = %cache.series_path().display(),
                error = %err,
                "failed to persist cache"
            );
        }
    }

    let fai = arithmetic_intensity(&params.focus, params.sprat);
    let filtered = RooflineFilter::new(fai, &tables.metrics, params.band).apply(&store);
    info!(
        kept = filtered.sample_count(),
        total = store.sample_count(),
        fai,
        "applied roofline band"
    );

    let rollup = RollupProducer::new(fai, &tables.metrics, params)
        .produce(&filtered, aliases.canonical_names());
    for device in &rollup.devices {
        for step in &device.steps {
            writeln!(out, "{}", step.summary_line(&device.device))?;
        }
        for chart in &device.charts {
            if let Err(err) = sink.emit(chart) {
                warn!(chart = %chart.stem, error = %err, "failed to hand off chart");
            }
        }
    }
    for line in rollup.summary_lines(&tables.metrics, before, report.latest) {
        writeln!(out, "{line}")?;
    }

    Ok(RunSummary {
        watermark_before: before,
        watermark_after: after,
        report,
        rollup,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::fetch::tests::{build, job, log, FakeSource};
    use crate::render::NoCharts;
    use crate::roofline::PeakMetric;

    fn tables() -> ConfigTables {
        let mut tables = ConfigTables {
            devices: vec![vec!["GPU1".to_string(), "host1".to_string()]],
            ..Default::default()
        };
        tables.metrics.insert(
            "GPU1".to_string(),
            PeakMetric {
                compute: 0.0,
                bandwidth: 100.0,
            },
        );
        tables.steps.register_step("OpenCL DBCSR fp64");
        tables
    }

    fn options(dir: &std::path::Path) -> RunOptions {
        RunOptions {
            url: "http://unused".to_string(),
            token: "token".to_string(),
            dir: dir.to_path_buf(),
            params: RunParams::default(),
            timeout: Duration::from_secs(1),
            progress: false,
        }
    }

    fn source() -> FakeSource {
        // fai(23x23x23, 2) = 2.875 → bound 287.5 GFLOPS/s
        let kernels = [(8, 8, 8, 50.0), (23, 23, 23, 120.0), (30, 30, 30, 80.0)];
        FakeSource {
            pages: vec![vec![
                build(8, vec![job("OpenCL DBCSR fp64", 0, "l8")]),
                build(7, vec![job("OpenCL DBCSR fp64", 0, "l7")]),
            ]],
            logs: HashMap::from([
                ("l8".to_string(), log("host1", &kernels)),
                ("l7".to_string(), log("host1", &kernels)),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_pass_persists_and_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let opts = options(temp.path());
        let mut out = Vec::new();

        let summary = run_with_source(&opts, tables(), &source(), &mut NoCharts, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.watermark_before, 0);
        assert_eq!(summary.watermark_after, 8);
        let cache = Cache::new(temp.path(), &params_focus());
        assert_eq!(cache.read_watermark().unwrap(), 8);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("GPU1 OpenCL fp64: last5=50..120..80="), "output: {text}");
        assert!(text.contains("Common build number (lockstep): 0->8"), "output: {text}");
        // 120 / 287.5 → 42%
        assert_eq!(summary.rollup.max_efficiency_pct, 42);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let opts = options(temp.path());

        run_with_source(&opts, tables(), &source(), &mut NoCharts, &mut Vec::new())
            .await
            .unwrap();
        let cache = Cache::new(temp.path(), &params_focus());
        let first = cache.read_series().unwrap();

        let mut out = Vec::new();
        let summary = run_with_source(&opts, tables(), &source(), &mut NoCharts, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.watermark_before, 8);
        assert_eq!(summary.watermark_after, 8);
        assert_eq!(summary.report.work, 0);
        assert_eq!(cache.read_series().unwrap(), first);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Common build number (lockstep): 8\n"), "output: {text}");
    }

    #[tokio::test]
    async fn unreachable_provider_uses_cached_samples() {
        let temp = tempfile::tempdir().expect("tempdir");
        let opts = options(temp.path());
        run_with_source(&opts, tables(), &source(), &mut NoCharts, &mut Vec::new())
            .await
            .unwrap();

        let offline = FakeSource {
            fail_pages_from: Some(1),
            ..Default::default()
        };
        let mut out = Vec::new();
        let summary = run_with_source(&opts, tables(), &offline, &mut NoCharts, &mut out)
            .await
            .unwrap();

        assert!(summary.report.transport_error.is_some());
        assert_eq!(summary.watermark_after, 8);
        assert_eq!(summary.rollup.devices.len(), 1);
        assert_eq!(summary.rollup.devices[0].steps[0].builds, vec![8, 7]);
    }

    #[tokio::test]
    async fn band_rejects_implausible_samples() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut opts = options(temp.path());
        opts.params.band.vmin = 50.0;

        let summary = run_with_source(&opts, tables(), &source(), &mut NoCharts, &mut Vec::new())
            .await
            .unwrap();

        // ingested and persisted, but filtered out before the rollup
        assert_eq!(summary.watermark_after, 8);
        assert!(summary.rollup.devices.is_empty());
    }

    #[tokio::test]
    async fn partial_builds_reach_rollup_in_build_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let opts = options(temp.path());
        let cache = Cache::new(temp.path(), &params_focus());
        let mut cached = tables().steps;
        cached.append(
            "OpenCL DBCSR fp64",
            "GPU1",
            crate::aggregate::aggregate(
                &[(params_focus(), 120.0)],
                &params_focus(),
                5,
            )
            .unwrap(),
        );
        cache.save(&cached, 5).unwrap();

        // every build has one good job and one whose log is missing
        let kernels = [(8, 8, 8, 50.0), (23, 23, 23, 120.0), (30, 30, 30, 80.0)];
        let partial = |number: u64| {
            build(
                number,
                vec![
                    job("OpenCL DBCSR fp64", 0, &format!("l{number}")),
                    job("OpenCL DBCSR fp64", 0, "missing"),
                ],
            )
        };
        let source = FakeSource {
            pages: vec![vec![partial(10), partial(9), partial(8)]],
            logs: (8..=10)
                .map(|n| (format!("l{n}"), log("host1", &kernels)))
                .collect(),
            ..Default::default()
        };

        let summary = run_with_source(&opts, tables(), &source, &mut NoCharts, &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(summary.report.latest, 0);
        assert_eq!(summary.report.step_errors, 3);
        assert_eq!(summary.watermark_after, 5);
        assert_eq!(summary.rollup.devices[0].steps[0].builds, vec![10, 9, 8, 5]);
        // nothing completed, so the cache is untouched
        assert_eq!(cache.read_watermark().unwrap(), 5);
        assert_eq!(cache.read_series().unwrap().sample_count(), 1);
    }

    fn params_focus() -> crate::aggregate::Mnk {
        RunParams::default().focus
    }
}
