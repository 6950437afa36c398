//! acc-trend: ingest CI benchmark logs of small matrix-multiply kernels,
//! keep per-device time series, and roll them up against a roofline model.

pub mod aggregate;
pub mod alias;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod parser;
pub mod provider;
pub mod render;
pub mod rollup;
pub mod roofline;
pub mod run;
pub mod store;

pub use error::{Error, Result};
