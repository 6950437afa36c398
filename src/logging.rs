use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error::{Error, Result};

pub fn init_tracing(level: &str, format: &str) -> Result<()> {
    let level_filter = parse_level(level);

    let init_result = match parse_format(format) {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_filter(fmt_targets(level_filter));

            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        LogFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(fmt_targets(level_filter));

            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    if let Err(err) = init_result {
        let msg = err.to_string();
        if msg.contains("global default trace dispatcher has already been set")
            || tracing::dispatcher::has_been_set()
        {
            return Ok(());
        }
        return Err(Error::Logging(msg));
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn parse_format(format: &str) -> LogFormat {
    match format.trim().to_ascii_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::WARN,
    }
}

fn fmt_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_target("acc_trend", level)
        .with_default(LevelFilter::WARN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_defaults_to_warn() {
        assert_eq!(parse_level("Debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level(" warning "), LevelFilter::WARN);
        assert_eq!(parse_level("chatty"), LevelFilter::WARN);
    }

    #[test]
    fn format_is_case_insensitive() {
        assert_eq!(parse_format("JSON"), LogFormat::Json);
        assert_eq!(parse_format("pretty"), LogFormat::Text);
    }

    #[test]
    fn repeated_init_is_tolerated() {
        init_tracing("warn", "text").unwrap();
        init_tracing("debug", "json").unwrap();
    }
}
