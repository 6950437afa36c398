//! Persisted ingestion state per focus configuration.
//!
//! Two files live next to each other:
//!   buildkite-<focus>.last  → watermark, one integer plus newline
//!   buildkite-<focus>.json  → step → device → samples

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::aggregate::Mnk;
use crate::error::Result;
use crate::store::SeriesStore;

pub const FILE_PREFIX: &str = "buildkite";

#[derive(Debug, Clone)]
pub struct Cache {
    watermark_path: PathBuf,
    series_path: PathBuf,
}

impl Cache {
    pub fn new(dir: &Path, focus: &Mnk) -> Self {
        Self {
            watermark_path: dir.join(format!("{FILE_PREFIX}-{focus}.last")),
            series_path: dir.join(format!("{FILE_PREFIX}-{focus}.json")),
        }
    }

    pub fn watermark_path(&self) -> &Path {
        &self.watermark_path
    }

    pub fn series_path(&self) -> &Path {
        &self.series_path
    }

    pub fn read_watermark(&self) -> Result<u64> {
        let raw = fs::read_to_string(&self.watermark_path)?;
        raw.trim().parse::<u64>().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {e}", self.watermark_path.display()),
            )
            .into()
        })
    }

    pub fn read_series(&self) -> Result<SeriesStore> {
        let raw = fs::read_to_string(&self.series_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolves the starting watermark and merges cached series into `store`.
    ///
    /// A non-zero `explicit` watermark takes precedence over the `.last` file.
    /// Cached series are only merged when the watermark is positive. Any read
    /// failure yields 0, which forces a full reprocessing.
    pub fn load_into(&self, explicit: u64, store: &mut SeriesStore) -> u64 {
        match self.try_load(explicit) {
            Ok((watermark, cached)) => {
                if let Some(cached) = cached {
                    debug!(
                        path = %self.series_path.display(),
                        samples = cached.sample_count(),
                        "loaded cached series"
                    );
                    store.merge(cached);
                }
                watermark
            }
            Err(err) => {
                if explicit > 0 || self.watermark_path.exists() {
                    warn!(error = %err, "cache unreadable; reprocessing all builds");
                } else {
                    debug!(error = %err, "no cache present");
                }
                0
            }
        }
    }

    fn try_load(&self, explicit: u64) -> Result<(u64, Option<SeriesStore>)> {
        let watermark = if explicit == 0 {
            self.read_watermark()?
        } else {
            explicit
        };
        if watermark == 0 {
            return Ok((0, None));
        }
        Ok((watermark, Some(self.read_series()?)))
    }

    /// Rewrites both files. The series file is written first so a watermark
    /// never points past persisted samples.
    pub fn save(&self, store: &SeriesStore, watermark: u64) -> Result<()> {
        if let Some(parent) = self.series_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(store)?;
        write_replace(&self.series_path, json.as_bytes())?;
        write_replace(&self.watermark_path, format!("{watermark}\n").as_bytes())?;
        Ok(())
    }
}

fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
