use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::ExecutorConfig;
use crate::dispatcher::job::INFRA_FAILURE_EXIT_CODE;
use crate::error::{Result, RunnerError};
use crate::worker::output_path;

/// A job accepted by the dispatcher and handed to the execution slot.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: String,
    pub script_path: PathBuf,
}

/// Lifecycle transitions reported back to the dispatcher.
///
/// The runner never touches the published status itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Spawned {
        job_id: String,
        pid: u32,
    },
    Exited {
        job_id: String,
        pid: u32,
        exit_code: i32,
    },
    Failed {
        job_id: String,
        pid: Option<u32>,
        error: String,
    },
}

/// Runs job scripts one at a time, each in its own process group.
///
/// Scripts are started as `<shell> -e <script>` so the shell aborts on the
/// first failing command. stdout and stderr share the job's output file.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: PathBuf,
    logs_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            shell: config.shell.program.clone(),
            logs_dir: config.logs_dir.clone(),
        }
    }

    /// Serial execution loop. Exits once every request sender is dropped.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<RunRequest>,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) {
        while let Some(request) = requests.recv().await {
            self.execute(request, &events).await;
        }
        tracing::debug!("Process runner stopped");
    }

    /// Run one job to completion, reporting every transition on `events`.
    pub async fn execute(&self, request: RunRequest, events: &mpsc::UnboundedSender<RunnerEvent>) {
        let RunRequest {
            job_id,
            script_path,
        } = request;
        tracing::info!(job_id = %job_id, script = %script_path.display(), "Starting job");

        let mut child = match self.spawn(&job_id, &script_path).await {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to start job");
                report(
                    events,
                    RunnerEvent::Failed {
                        job_id,
                        pid: None,
                        error: format!("Failed to start job: {}", e),
                    },
                );
                return;
            }
        };

        // A freshly spawned child that has not been polled always has an id.
        let Some(pid) = child.id() else {
            report(
                events,
                RunnerEvent::Failed {
                    job_id,
                    pid: None,
                    error: "Process exited before its pid could be read".to_string(),
                },
            );
            return;
        };

        tracing::debug!(job_id = %job_id, pid, "Job process started");
        report(
            events,
            RunnerEvent::Spawned {
                job_id: job_id.clone(),
                pid,
            },
        );

        match child.wait().await {
            Ok(status) => {
                let exit_code = exit_code_of(status);
                tracing::info!(job_id = %job_id, pid, exit_code, "Job finished");
                report(
                    events,
                    RunnerEvent::Exited {
                        job_id,
                        pid,
                        exit_code,
                    },
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, pid, error = %e, "Failed waiting for job");
                report(
                    events,
                    RunnerEvent::Failed {
                        job_id,
                        pid: Some(pid),
                        error: format!("Failed waiting for job: {}", e),
                    },
                );
            }
        }
    }

    async fn spawn(&self, job_id: &str, script_path: &Path) -> Result<Child> {
        match tokio::fs::metadata(script_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(RunnerError::ScriptNotFound(script_path.display().to_string())),
        }

        let out = File::create(output_path(&self.logs_dir, job_id)).await?;
        let err = out.try_clone().await?;
        let (out, err) = (out.into_std().await, err.into_std().await);

        // The parent's copies of the output file are released with `cmd`.
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-e")
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0);

        Ok(cmd.spawn()?)
    }
}

fn report(events: &mpsc::UnboundedSender<RunnerEvent>, event: RunnerEvent) {
    if events.send(event).is_err() {
        tracing::warn!("Dispatcher gone, dropping runner event");
    }
}

/// Exit code as reported to callers. Death by signal `N` maps to `-N`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(INFRA_FAILURE_EXIT_CODE)
}

/// Send `signal` to every process in the group led by `pid`.
///
/// Jobs are spawned with `process_group(0)`, so the group id is the pid.
pub fn signal_process_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    killpg(pgid, signal)?;
    Ok(())
}
