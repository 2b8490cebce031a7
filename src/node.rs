use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::ExecutorConfig;
use crate::dispatcher::{Dispatcher, JobPhase};
use crate::worker::{LogReader, RetentionSweeper};

/// How long shutdown waits for a cancelled job to exit.
const SHUTDOWN_JOB_GRACE: Duration = Duration::from_secs(5);

/// The sidecar process: dispatcher, process runner, HTTP API and the
/// optional retention sweeper.
pub struct Node {
    pub config: ExecutorConfig,
    pub dispatcher: Dispatcher,
}

impl Node {
    /// Must be called from within a tokio runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let dispatcher = Dispatcher::start(&config);
        Self { config, dispatcher }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// 1. Creates the logs directory if needed
    /// 2. Spawns the retention sweeper when configured
    /// 3. Serves the HTTP API (blocking)
    /// 4. On shutdown, cancels a job that is still in flight and gives it a
    ///    short grace period to exit
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the API
    /// server fails to bind.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tokio::fs::create_dir_all(&self.config.logs_dir).await?;
        tracing::info!(logs_dir = %self.config.logs_dir.display(), "Job output directory ready");

        if let Some(retention) = self.config.retention.clone() {
            let sweeper = RetentionSweeper::new(self.config.logs_dir.clone(), retention);
            let status = self.dispatcher.subscribe();
            let sweeper_shutdown = shutdown.clone();
            tokio::spawn(async move {
                sweeper.run(status, sweeper_shutdown).await;
            });
        }

        let state = ApiState {
            dispatcher: self.dispatcher.clone(),
            logs: LogReader::new(&self.config),
        };
        run_api(self.config.listen_addr, state, shutdown).await?;

        self.cancel_in_flight().await;
        Ok(())
    }

    async fn cancel_in_flight(&self) {
        let status = self.dispatcher.current_status();
        if status.phase == JobPhase::Idle || status.is_terminal() {
            return;
        }

        tracing::info!(job_id = %status.id, "Cancelling in-flight job before exit");
        self.dispatcher.cancel().await;

        let mut rx = self.dispatcher.subscribe();
        match tokio::time::timeout(SHUTDOWN_JOB_GRACE, rx.wait_for(|s| s.is_terminal())).await {
            Ok(Ok(status)) => {
                tracing::info!(job_id = %status.id, exit_code = ?status.exit_code, "Job exited");
            }
            _ => tracing::warn!(job_id = %status.id, "Job still running at exit"),
        };
    }
}
