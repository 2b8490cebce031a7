//! Single-slot job dispatcher.
//!
//! One task, the `JobSlot`, owns the job state. Callers reach it through a
//! cloneable [`Dispatcher`] handle:
//!
//! - **Submit / cancel** are messages answered over a oneshot channel, so
//!   every decision is made against a consistent view of the slot
//! - **Status** is published on a `watch` channel after every transition;
//!   reading it never goes through the task
//!
//! The [`ProcessRunner`] executes accepted jobs on its own task and reports
//! back with [`RunnerEvent`]s. It never writes the status directly.
//!
//! # Lifecycle
//!
//! ```text
//! idle -> pending -> running -> completed | failed
//!                       |            ^
//!                       +-> cancelling
//! ```
//!
//! `pending -> failed` happens when the script cannot be started.

use std::path::PathBuf;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot, watch};

pub mod job;

pub use job::{JobPhase, JobStatus};

use crate::config::ExecutorConfig;
use crate::error::{Result, RunnerError};
use crate::worker::executor::signal_process_group;
use crate::worker::{ProcessRunner, RunRequest, RunnerEvent};
use job::validate_job_id;

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Requests handled by the job slot task
#[derive(Debug)]
pub enum DispatchMessage {
    Submit {
        job_id: String,
        script_path: PathBuf,
        response_tx: oneshot::Sender<JobStatus>,
    },
    Cancel {
        response_tx: oneshot::Sender<JobStatus>,
    },
}

/// Handle to the job slot. Cheap to clone; all clones share one slot.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    message_tx: mpsc::Sender<DispatchMessage>,
    status_rx: watch::Receiver<JobStatus>,
}

impl Dispatcher {
    /// Spawn the job slot and its process runner on the current runtime.
    ///
    /// Both tasks stop once every handle has been dropped and the running
    /// job, if any, has exited.
    pub fn start(config: &ExecutorConfig) -> Self {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        // Capacity 1: the slot only sends while no job is in flight.
        let (run_tx, run_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(JobStatus::idle());

        let runner = ProcessRunner::new(config);
        tokio::spawn(runner.run(run_rx, event_tx));

        let slot = JobSlot::new(status_tx, run_tx, config.shell.cancel_signal);
        tokio::spawn(slot.run(message_rx, event_rx));

        Self {
            message_tx,
            status_rx,
        }
    }

    /// Accept `job_id` for execution, or refuse it if a job is in flight.
    ///
    /// Returns as soon as the decision is made; the job itself runs in the
    /// background.
    pub async fn submit(
        &self,
        job_id: impl Into<String>,
        script_path: impl Into<PathBuf>,
    ) -> JobStatus {
        let job_id = job_id.into();
        let (response_tx, response_rx) = oneshot::channel();
        let message = DispatchMessage::Submit {
            job_id: job_id.clone(),
            script_path: script_path.into(),
            response_tx,
        };

        self.request(message, response_rx)
            .await
            .unwrap_or_else(|e| JobStatus::rejected(job_id, e.to_string()))
    }

    /// Signal the running job's process group. Does not wait for it to exit.
    pub async fn cancel(&self) -> JobStatus {
        let (response_tx, response_rx) = oneshot::channel();
        let message = DispatchMessage::Cancel { response_tx };

        self.request(message, response_rx)
            .await
            .unwrap_or_else(|e| JobStatus::rejected(self.current_status().id, e.to_string()))
    }

    pub fn current_status(&self) -> JobStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every status transition.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_rx.clone()
    }

    async fn request(
        &self,
        message: DispatchMessage,
        response_rx: oneshot::Receiver<JobStatus>,
    ) -> Result<JobStatus> {
        self.message_tx
            .send(message)
            .await
            .map_err(|_| RunnerError::DispatcherClosed)?;
        response_rx.await.map_err(|_| RunnerError::DispatcherClosed)
    }
}

/// Exclusive owner of the job state.
struct JobSlot {
    status_tx: watch::Sender<JobStatus>,
    run_tx: mpsc::Sender<RunRequest>,
    cancel_signal: Signal,
    /// Set on acceptance, cleared when the runner reports a terminal event
    in_flight: bool,
    submitted: bool,
    /// Cancel arrived before the runner reported a pid
    cancel_requested: bool,
}

impl JobSlot {
    fn new(
        status_tx: watch::Sender<JobStatus>,
        run_tx: mpsc::Sender<RunRequest>,
        cancel_signal: Signal,
    ) -> Self {
        Self {
            status_tx,
            run_tx,
            cancel_signal,
            in_flight: false,
            submitted: false,
            cancel_requested: false,
        }
    }

    async fn run(
        mut self,
        mut message_rx: mpsc::Receiver<DispatchMessage>,
        mut event_rx: mpsc::UnboundedReceiver<RunnerEvent>,
    ) {
        loop {
            tokio::select! {
                // Runner events first, so a submit never races a finished job
                biased;

                Some(event) = event_rx.recv() => self.apply_event(event),

                message = message_rx.recv() => match message {
                    Some(DispatchMessage::Submit { job_id, script_path, response_tx }) => {
                        let _ = response_tx.send(self.submit(job_id, script_path));
                    }
                    Some(DispatchMessage::Cancel { response_tx }) => {
                        let _ = response_tx.send(self.cancel());
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Dispatcher stopped");
    }

    fn status(&self) -> JobStatus {
        self.status_tx.borrow().clone()
    }

    fn publish(&self, status: JobStatus) {
        tracing::debug!(job_id = %status.id, phase = %status.phase, pid = ?status.pid, "Job status changed");
        self.status_tx.send_replace(status);
    }

    fn submit(&mut self, job_id: String, script_path: PathBuf) -> JobStatus {
        if self.in_flight {
            let running = self.status().id;
            tracing::error!(job_id = %job_id, running_job = %running, "A job is already running");
            return JobStatus::rejected(job_id, format!("A job is already running (ID {})", running));
        }

        if let Err(e) = validate_job_id(&job_id) {
            tracing::warn!(error = %e, "Rejecting submission");
            return JobStatus::rejected(job_id, e.to_string());
        }

        tracing::debug!(job_id = %job_id, script = %script_path.display(), "Queueing job");
        let request = RunRequest {
            job_id: job_id.clone(),
            script_path,
        };
        if let Err(e) = self.run_tx.try_send(request) {
            tracing::error!(job_id = %job_id, error = %e, "Execution slot unavailable");
            return JobStatus::rejected(job_id, format!("Execution slot unavailable: {}", e));
        }

        self.in_flight = true;
        self.submitted = true;
        self.cancel_requested = false;
        let pending = JobStatus::pending(job_id);
        self.publish(pending.clone());
        pending
    }

    fn cancel(&mut self) -> JobStatus {
        if !self.submitted {
            return JobStatus::rejected("", "No job has been started yet");
        }

        let current = self.status();
        if !self.in_flight {
            // Already terminal
            return current;
        }

        match current.pid {
            Some(pid) => self.deliver_cancel(current.id, pid),
            None => {
                tracing::debug!(job_id = %current.id, "Cancel requested before spawn, deferring");
                self.cancel_requested = true;
                current
            }
        }
    }

    fn deliver_cancel(&mut self, job_id: String, pid: u32) -> JobStatus {
        tracing::debug!(job_id = %job_id, pid, signal = ?self.cancel_signal, "Cancelling job");
        if let Err(e) = signal_process_group(pid, self.cancel_signal) {
            tracing::warn!(job_id = %job_id, pid, error = %e, "Failed to signal job process group");
        }
        self.cancel_requested = false;
        let cancelling = JobStatus::cancelling(job_id, pid);
        self.publish(cancelling.clone());
        cancelling
    }

    fn apply_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::Spawned { job_id, pid } => {
                if !self.is_current(&job_id) {
                    tracing::warn!(job_id = %job_id, "Ignoring spawn of unknown job");
                    return;
                }
                self.publish(JobStatus::running(job_id.clone(), pid));
                if self.cancel_requested {
                    self.deliver_cancel(job_id, pid);
                }
            }
            RunnerEvent::Exited {
                job_id,
                pid,
                exit_code,
            } => self.finish(JobStatus::completed(job_id, pid, exit_code)),
            RunnerEvent::Failed { job_id, pid, error } => {
                self.finish(JobStatus::failed(job_id, pid, error))
            }
        }
    }

    fn finish(&mut self, status: JobStatus) {
        if !self.is_current(&status.id) {
            tracing::warn!(job_id = %status.id, "Ignoring result of unknown job");
            return;
        }
        self.in_flight = false;
        self.cancel_requested = false;
        self.publish(status);
    }

    fn is_current(&self, job_id: &str) -> bool {
        self.in_flight && self.status_tx.borrow().id == job_id
    }
}
