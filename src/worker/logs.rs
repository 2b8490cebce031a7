use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::ExecutorConfig;
use crate::dispatcher::job::validate_job_id;
use crate::worker::output_path;

pub const DEFAULT_MAX_LINES: usize = 1000;

/// Reads job output files while the runner may still be appending to them.
#[derive(Debug, Clone)]
pub struct LogReader {
    logs_dir: PathBuf,
}

impl LogReader {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            logs_dir: config.logs_dir.clone(),
        }
    }

    /// Complete lines `[from_line, from_line + max_lines)` of a job's output.
    ///
    /// Never fails: an unknown job, an invalid id or an unreadable file all
    /// yield an empty list.
    pub async fn read_lines(&self, job_id: &str, from_line: usize, max_lines: usize) -> Vec<String> {
        if let Err(e) = validate_job_id(job_id) {
            tracing::warn!(job_id, error = %e, "Refusing to read logs");
            return Vec::new();
        }
        read_complete_lines(&output_path(&self.logs_dir, job_id), from_line, max_lines).await
    }
}

/// Reads complete lines from `path`, logging and swallowing I/O errors.
pub async fn read_complete_lines(path: &Path, from_line: usize, max_lines: usize) -> Vec<String> {
    match collect_lines(path, from_line, max_lines).await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Error reading log file");
            Vec::new()
        }
    }
}

async fn collect_lines(
    path: &Path,
    from_line: usize,
    max_lines: usize,
) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path).await?);
    let end = from_line.saturating_add(max_lines);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    let mut index = 0;

    while index < end {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await?;
        // EOF, or a final line the writer has not finished yet
        if read == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        if index >= from_line {
            lines.push(String::from_utf8_lossy(&buf).into_owned());
        }
        index += 1;
    }

    Ok(lines)
}
