//! Build Fetcher: walks provider pages above the watermark and feeds
//! successful job logs through parsing and aggregation into the store.

use std::io::Write as _;

use tracing::{debug, warn};

use crate::aggregate::{aggregate, Mnk};
use crate::error::{Error, Result};
use crate::parser::{unescape_newlines, LogParser, ParsedLog};
use crate::provider::{Build, BuildSource, Job};
use crate::store::SeriesStore;

/// Counters of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Builds examined above the watermark.
    pub work: u64,
    /// Highest build whose every targeted job produced a sample (0 if none).
    pub latest: u64,
    /// Jobs whose log could not be retrieved.
    pub step_errors: u64,
    /// Measurements rejected while parsing or aggregating.
    pub value_errors: u64,
    /// Pages received from the provider.
    pub pages: u32,
    /// Set when the provider became unreachable and paging stopped early.
    pub transport_error: Option<String>,
}

impl IngestReport {
    pub fn has_errors(&self) -> bool {
        self.step_errors > 0 || self.value_errors > 0
    }

    /// Watermark to persist after this pass; never below `previous`.
    pub fn next_watermark(&self, previous: u64) -> u64 {
        previous.max(self.latest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Produced,
    Skipped,
    Rejected(u64),
}

pub struct Fetcher<'a> {
    parser: LogParser<'a>,
    focus: Mnk,
    progress: bool,
}

impl<'a> Fetcher<'a> {
    pub fn new(parser: LogParser<'a>, focus: Mnk) -> Self {
        Self {
            parser,
            focus,
            progress: false,
        }
    }

    /// Print one `.` per processed build on stdout.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Ingests every build above `watermark`. Provider failures end the pass
    /// early but keep everything ingested so far.
    pub async fn ingest<S>(&self, source: &S, store: &mut SeriesStore, watermark: u64) -> IngestReport
    where
        S: BuildSource + ?Sized,
    {
        let mut report = IngestReport::default();
        let mut page = 1;

        loop {
            let builds = match source.builds(page).await {
                Ok(builds) => builds,
                Err(err) => {
                    warn!(page, error = %err, "failed to fetch build page; continuing with cached results");
                    report.transport_error = Some(err.to_string());
                    break;
                }
            };
            report.pages += 1;
            if builds.is_empty() {
                break;
            }

            let mut reached = false;
            for build in &builds {
                if build.number <= watermark {
                    reached = true;
                    break;
                }
                self.ingest_build(source, store, build, &mut report).await;
                report.work += 1;
                if self.progress {
                    print!(".");
                    std::io::stdout().flush().ok();
                }
            }
            if reached {
                debug!(page, watermark, "reached watermark");
                break;
            }
            page += 1;
        }

        report
    }

    async fn ingest_build<S>(
        &self,
        source: &S,
        store: &mut SeriesStore,
        build: &Build,
        report: &mut IngestReport,
    ) where
        S: BuildSource + ?Sized,
    {
        let targeted: Vec<(&str, &Job)> = build
            .jobs
            .iter()
            .filter_map(|job| {
                let name = job.name.as_deref()?;
                store.is_known_step(name).then_some((name, job))
            })
            .collect();

        let mut produced = 0;
        for (step, job) in targeted.iter().filter(|(_, job)| job.succeeded()) {
            match self.ingest_job(source, store, step, job, build.number).await {
                Ok(JobOutcome::Produced) => produced += 1,
                Ok(JobOutcome::Skipped) => {
                    debug!(build = build.number, step, "no known device in log");
                }
                Ok(JobOutcome::Rejected(errors)) => report.value_errors += errors,
                Err(err) => {
                    warn!(build = build.number, step, error = %err, "job failed");
                    report.step_errors += 1;
                }
            }
        }

        debug!(
            build = build.number,
            targeted = targeted.len(),
            produced,
            "processed build"
        );
        if produced == targeted.len() && report.latest < build.number {
            report.latest = build.number;
        }
    }

    async fn ingest_job<S>(
        &self,
        source: &S,
        store: &mut SeriesStore,
        step: &str,
        job: &Job,
        build: u64,
    ) -> Result<JobOutcome>
    where
        S: BuildSource + ?Sized,
    {
        let url = job
            .log_url
            .as_deref()
            .ok_or_else(|| Error::MissingLog(step.to_string()))?;
        let text = unescape_newlines(&source.log(url).await?);

        match self.parser.parse(&text) {
            ParsedLog::NoDevice => Ok(JobOutcome::Skipped),
            ParsedLog::Invalid { device, errors } => {
                debug!(build, step, device = %device, errors, "measurement lists disagree");
                Ok(JobOutcome::Rejected(errors))
            }
            ParsedLog::Measurements { device, pairs } => {
                match aggregate(&pairs, &self.focus, build) {
                    Ok(sample) => {
                        store.append(step, &device, sample);
                        Ok(JobOutcome::Produced)
                    }
                    Err(_) => {
                        debug!(build, step, device = %device, focus = %self.focus, "focus kernel missing");
                        Ok(JobOutcome::Rejected(1))
                    }
                }
            }
        }
    }
}
