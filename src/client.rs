//! HTTP client for the job API, as used by the CI runner hook.

use std::io::Write;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dispatcher::{JobPhase, JobStatus};
use crate::error::{Result, RunnerError};
use crate::worker::logs::DEFAULT_MAX_LINES;

#[derive(Serialize)]
struct SubmitBody<'a> {
    id: &'a str,
    path: &'a str,
}

#[derive(Debug, Clone)]
pub struct RunnerClient {
    http: reqwest::Client,
    base_url: String,
}

impl RunnerClient {
    /// `base_url` such as `http://step-runner:8080`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn submit(&self, id: &str, path: &str) -> Result<JobStatus> {
        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .json(&SubmitBody { id, path })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn status(&self) -> Result<JobStatus> {
        let response = self.http.get(format!("{}/", self.base_url)).send().await?;
        decode(response).await
    }

    pub async fn cancel(&self) -> Result<JobStatus> {
        let response = self
            .http
            .delete(format!("{}/", self.base_url))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn logs(&self, id: &str, from_line: usize, max_lines: usize) -> Result<Vec<String>> {
        let from_line = from_line.to_string();
        let max_lines = max_lines.to_string();
        let response = self
            .http
            .get(format!("{}/logs", self.base_url))
            .query(&[
                ("id", id),
                ("fromLine", from_line.as_str()),
                ("maxLines", max_lines.as_str()),
            ])
            .send()
            .await?;
        decode(response).await
    }

    /// Submit a job, copy its output to `out` while it runs, and return the
    /// final status.
    ///
    /// A refused submission is returned as-is without polling.
    pub async fn run_to_completion<W: Write>(
        &self,
        id: &str,
        path: &str,
        poll_interval: Duration,
        out: &mut W,
    ) -> Result<JobStatus> {
        let submitted = self.submit(id, path).await?;
        if submitted.phase == JobPhase::Failed {
            return Ok(submitted);
        }

        let mut next_line = 0;
        loop {
            next_line += self.copy_new_lines(id, next_line, out).await?;

            let status = self.status().await?;
            if status.id != id {
                return Err(RunnerError::UnexpectedResponse(format!(
                    "server reports job {:?} instead of {:?}",
                    status.id, id
                )));
            }
            if status.is_terminal() {
                // Drain whatever was written between the last read and exit
                loop {
                    let copied = self.copy_new_lines(id, next_line, out).await?;
                    if copied == 0 {
                        return Ok(status);
                    }
                    next_line += copied;
                }
            }

            tracing::debug!(job_id = id, phase = %status.phase, "Waiting for completion");
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn copy_new_lines<W: Write>(&self, id: &str, from_line: usize, out: &mut W) -> Result<usize> {
        let lines = self.logs(id, from_line, DEFAULT_MAX_LINES).await?;
        for line in &lines {
            out.write_all(line.as_bytes())?;
        }
        out.flush()?;
        Ok(lines.len())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RunnerError::UnexpectedResponse(format!("{}: {}", status, body)));
    }
    Ok(response.json().await?)
}
