//! acc-trend: CI benchmark trends for small matrix-multiply kernels.
//!
//!   acc-trend URL TOKEN [WATERMARK [INDEX [FOCUS [LASTN [SPRAT [MAXN [MAXM [VMIN [VMAX]]]]]]]]]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use acc_trend::config::{RawParams, RunParams};
use acc_trend::logging::init_tracing;
use acc_trend::render::{ChartSink, JsonChartWriter, NoCharts};
use acc_trend::run::{run, RunOptions};

const AFTER_HELP: &str = "\
FILES (in --dir):
    buildkite-devs.json     Device alias groups, canonical name first
    buildkite-metric.json   Peak compute and bandwidth per device
    buildkite-steps.json    Pipeline steps to track
    buildkite-MxNxK.last    Watermark (written)
    buildkite-MxNxK.json    Time series (written)

ENVIRONMENT:
    ACC_TREND_URL           Builds endpoint, when URL is not given
    ACC_TREND_TOKEN         API token, when TOKEN is not given

EXAMPLES:
    acc-trend https://api.buildkite.com/v2/organizations/o/pipelines/p/builds $TOKEN
    acc-trend $URL $TOKEN 0 1 16x16x16 10 --chart-dir charts";

#[derive(Parser)]
#[command(
    name = "acc-trend",
    about = "Track CI benchmark results of SMM kernels against a roofline",
    after_help = AFTER_HELP,
    allow_negative_numbers = true
)]
struct Cli {
    /// Builds endpoint of the CI provider
    #[arg(env = "ACC_TREND_URL")]
    url: Option<String>,
    /// API token
    #[arg(env = "ACC_TREND_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Starting build number (0 reads the cached watermark)
    #[arg(default_value_t = 0)]
    watermark: i64,
    /// Charted throughput: 0 small, 1 medium, 2 large, otherwise combined
    #[arg(default_value_t = -1)]
    index: i64,
    /// Focus kernel as MxNxK
    #[arg(default_value = "23x23x23")]
    focus: String,
    /// Trailing window for summaries (0 or less: whole history)
    #[arg(default_value_t = 5)]
    lastn: i64,
    /// Size ratio of the arithmetic-intensity model
    #[arg(default_value_t = 2.0)]
    sprat: f64,
    /// Maximum charted samples per series (0: unlimited)
    #[arg(default_value_t = 0)]
    maxn: i64,
    /// Maximum samples trimmed to align series (0: none)
    #[arg(default_value_t = 0)]
    maxm: i64,
    /// Lower efficiency bound in percent of the roofline
    #[arg(default_value_t = 0)]
    vmin: i64,
    /// Upper efficiency bound in percent of the roofline
    #[arg(default_value_t = 100)]
    vmax: i64,

    /// Directory with configuration tables and cache files
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    /// Write chart data as JSON into this directory
    #[arg(long)]
    chart_dir: Option<PathBuf>,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// Do not print progress dots
    #[arg(long, short)]
    quiet: bool,
    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, default_value = "warn")]
    log_level: String,
    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log_level, &cli.log_format) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let (Some(url), Some(token)) = (cli.url.clone(), cli.token.clone()) else {
        eprintln!("error: please pass URL and TOKEN (or set ACC_TREND_URL and ACC_TREND_TOKEN)");
        return ExitCode::FAILURE;
    };

    let params = match RunParams::from_raw(&RawParams {
        watermark: cli.watermark,
        index: cli.index,
        focus: cli.focus.clone(),
        lastn: cli.lastn,
        sprat: cli.sprat,
        maxn: cli.maxn,
        maxm: cli.maxm,
        vmin: cli.vmin,
        vmax: cli.vmax,
    }) {
        Ok(params) => params,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let opts = RunOptions {
        url,
        token,
        dir: cli.dir.clone(),
        params,
        timeout: Duration::from_secs(cli.timeout_secs),
        progress: !cli.quiet,
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut sink: Box<dyn ChartSink> = match &cli.chart_dir {
        Some(dir) => Box::new(JsonChartWriter::new(dir)),
        None => Box::new(NoCharts),
    };
    let mut stdout = std::io::stdout().lock();

    if let Err(err) = rt.block_on(run(&opts, sink.as_mut(), &mut stdout)) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
