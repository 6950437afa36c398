//! Hand-off of chart data to an external renderer.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::rollup::ChartSet;

/// Receives finished charts. Image rendering happens outside this crate.
pub trait ChartSink {
    fn emit(&mut self, chart: &ChartSet) -> Result<()>;
}

/// Writes each chart as `<dir>/<stem>.json`.
#[derive(Debug, Clone)]
pub struct JsonChartWriter {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonChartWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ChartSink for JsonChartWriter {
    fn emit(&mut self, chart: &ChartSet) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", chart.stem));
        let mut json = serde_json::to_string_pretty(chart)?;
        json.push('\n');
        fs::write(&path, json)?;
        tracing::debug!(path = %path.display(), "wrote chart data");
        self.written.push(path);
        Ok(())
    }
}

/// Discards every chart.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCharts;

impl ChartSink for NoCharts {
    fn emit(&mut self, _chart: &ChartSet) -> Result<()> {
        Ok(())
    }
}
