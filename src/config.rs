use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;

/// How job scripts are launched.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Shell binary, resolved through `PATH` when not absolute
    pub program: PathBuf,
    /// Signal delivered to the job's process group on cancel
    pub cancel_signal: Signal,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sh"),
            cancel_signal: Signal::SIGTERM,
        }
    }
}

/// Time-based eviction of old job output files.
///
/// Output files are otherwise kept forever; a long-lived sidecar that runs
/// many steps should enable this.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Files whose last modification is older than this are deleted
    pub max_age: Duration,
    /// How often the logs directory is scanned
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub listen_addr: SocketAddr,
    /// Directory holding one `<id>.out` file per job
    pub logs_dir: PathBuf,
    pub shell: ShellConfig,
    /// `None` disables the retention sweeper
    pub retention: Option<RetentionConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:8080"
                .parse()
                .expect("default listen address is valid"),
            logs_dir: PathBuf::from("/logs"),
            shell: ShellConfig::default(),
            retention: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new(listen_addr: SocketAddr, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            logs_dir: logs_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Path of the output file for a job. Callers must validate `job_id` first.
    pub fn output_path(&self, job_id: &str) -> PathBuf {
        crate::worker::output_path(&self.logs_dir, job_id)
    }
}
