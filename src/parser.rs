//! Extraction of device identity and kernel measurements from raw job logs.
//!
//! Device identification runs an ordered list of [`DeviceStrategy`] values;
//! the first one yielding a non-empty string wins. Measurements come from two
//! independent scans (benchmark invocations and device timings) which are
//! paired by position.

use std::sync::LazyLock;

use regex::Regex;

use crate::aggregate::Mnk;
use crate::alias::AliasTable;

static DEVICE_REPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"INFO ACC/OpenCL:\s+ndevices=[0-9]+\s+device[0-9]+="(.+)""#)
        .expect("device report pattern")
});

static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"hostname:\s+([\w-]+)").expect("hostname pattern"));

static BENCH_INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"acc_bench_smm [0-9]+ [0-9]+ ([0-9]+) ([0-9]+) ([0-9]+) [0-9]+ [0-9]+")
        .expect("benchmark invocation pattern")
});

static DEVICE_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"device: .+ ms\s+(.+) GFLOPS/s").expect("device timing pattern")
});

/// One way of locating the raw device string in a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStrategy {
    /// `INFO ACC/OpenCL: ndevices=N deviceI="<name>"` as printed by the backend.
    DeviceReport,
    /// Generic `hostname: <host>` line printed by the CI agent.
    Hostname,
}

impl DeviceStrategy {
    pub const DEFAULT_CHAIN: [DeviceStrategy; 2] =
        [DeviceStrategy::DeviceReport, DeviceStrategy::Hostname];

    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let re = match self {
            DeviceStrategy::DeviceReport => &*DEVICE_REPORT,
            DeviceStrategy::Hostname => &*HOSTNAME,
        };
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Runs `chain` in order and returns the first non-empty device string.
pub fn find_device<'a>(text: &'a str, chain: &[DeviceStrategy]) -> Option<&'a str> {
    chain.iter().find_map(|s| s.extract(text))
}

/// Outcome of parsing one job log.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLog {
    /// No device line, or the device matched no alias group. Not an error.
    NoDevice,
    /// Measurements paired by position.
    Measurements {
        device: String,
        pairs: Vec<(Mnk, f64)>,
    },
    /// The invocation and timing lists disagree, or a value did not parse.
    /// `errors` is the number of value errors to record.
    Invalid { device: String, errors: u64 },
}

/// Reverses the escaping some providers apply to line breaks in log payloads.
pub fn unescape_newlines(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Kernel triples in order of appearance.
pub fn scan_mnk(text: &str) -> Vec<Mnk> {
    BENCH_INVOCATION
        .captures_iter(text)
        .filter_map(|c| {
            let dim = |i: usize| c.get(i)?.as_str().parse::<u64>().ok();
            Some(Mnk::new(dim(1)?, dim(2)?, dim(3)?))
        })
        .collect()
}

/// Raw throughput tokens in order of appearance.
pub fn scan_values(text: &str) -> Vec<&str> {
    DEVICE_TIMING
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

#[derive(Debug)]
pub struct LogParser<'a> {
    aliases: &'a AliasTable,
    chain: Vec<DeviceStrategy>,
}

impl<'a> LogParser<'a> {
    pub fn new(aliases: &'a AliasTable) -> Self {
        Self {
            aliases,
            chain: DeviceStrategy::DEFAULT_CHAIN.to_vec(),
        }
    }

    pub fn with_chain(aliases: &'a AliasTable, chain: Vec<DeviceStrategy>) -> Self {
        Self { aliases, chain }
    }

    /// Parses an already unescaped log.
    pub fn parse(&self, text: &str) -> ParsedLog {
        let Some(raw) = find_device(text, &self.chain) else {
            return ParsedLog::NoDevice;
        };
        let Some(device) = self.aliases.resolve(raw) else {
            tracing::debug!(raw, "device matches no alias group");
            return ParsedLog::NoDevice;
        };
        let device = device.to_string();

        let mnks = scan_mnk(text);
        let tokens = scan_values(text);
        if mnks.len() != tokens.len() {
            return ParsedLog::Invalid {
                device,
                errors: mnks.len().abs_diff(tokens.len()) as u64,
            };
        }

        let values = match tokens
            .iter()
            .map(|t| t.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(values) => values,
            Err(_) => return ParsedLog::Invalid { device, errors: 1 },
        };

        ParsedLog::Measurements {
            device,
            pairs: mnks.into_iter().zip(values).collect(),
        }
    }
}
