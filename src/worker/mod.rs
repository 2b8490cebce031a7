//! Job execution and output handling.
//!
//! - **Process runner**: spawns `sh -e <script>` in a new process group and
//!   reports its lifecycle to the dispatcher
//! - **Log reader**: serves complete lines of a job's output while the job
//!   is still writing it
//! - **Retention**: optional eviction of old output files
//!
//! # Output files
//!
//! Each job writes stdout and stderr, interleaved, to `<logs_dir>/<id>.out`.
//! The file is truncated when a job with the same id starts again. The runner
//! is the only writer; readers never lock.

use std::path::{Path, PathBuf};

pub mod executor;
pub mod logs;
pub mod retention;

pub use executor::{ProcessRunner, RunRequest, RunnerEvent};
pub use logs::LogReader;
pub use retention::RetentionSweeper;

/// Location of a job's output file. `job_id` must already be validated.
pub fn output_path(logs_dir: &Path, job_id: &str) -> PathBuf {
    logs_dir.join(format!("{}.out", job_id))
}
