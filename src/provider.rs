//! CI provider access: build metadata pages and job logs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Builds requested per page.
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub number: u64,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// A job of a build. Non-command jobs (waiters, triggers) carry no name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exit_status: Option<i64>,
    #[serde(default)]
    pub log_url: Option<String>,
}

impl Job {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Source of build pages, most recent first, and job logs.
///
/// Every resource is requested at most once; retry policy belongs to
/// the implementation.
#[async_trait]
pub trait BuildSource {
    /// Builds on `page` (1-based). An empty list ends pagination.
    async fn builds(&self, page: u32) -> Result<Vec<Build>>;

    /// Raw log text behind a job's log URL.
    async fn log(&self, log_url: &str) -> Result<String>;
}

/// Bearer-authenticated HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpSource {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Page URL, keeping any query the endpoint already carries.
    pub fn page_url(&self, page: u32) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}per_page={PAGE_SIZE}&page={page}", self.url)
    }

    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl BuildSource for HttpSource {
    async fn builds(&self, page: u32) -> Result<Vec<Build>> {
        let body = self.get(&self.page_url(page)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn log(&self, log_url: &str) -> Result<String> {
        self.get(log_url).await
    }
}
