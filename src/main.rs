use clap::{Parser, ValueEnum};
use nix::sys::signal::Signal;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use runner_rpc::client::RunnerClient;
use runner_rpc::config::{ExecutorConfig, RetentionConfig, ShellConfig};
use runner_rpc::dispatcher::{JobPhase, JobStatus};
use runner_rpc::node::Node;
use runner_rpc::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "runner-rpc")]
#[command(version)]
#[command(about = "Runs one CI step script at a time on behalf of a remote runner")]
#[command(propagate_version = true)]
struct Args {
    /// Log output format
    #[arg(long, global = true, default_value = "text", env = "RUNNER_RPC_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job executor sidecar
    Server(ServerArgs),

    /// Talk to a running sidecar
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "0.0.0.0", env = "RUNNER_RPC_HOST")]
    host: IpAddr,

    /// Port for the HTTP API
    #[arg(long, default_value = "8080", env = "RUNNER_RPC_PORT")]
    port: u16,

    /// Directory for per-job output files (<id>.out)
    #[arg(long, default_value = "/logs", env = "RUNNER_RPC_LOGS_DIR")]
    logs_dir: PathBuf,

    /// Shell used to run job scripts (invoked as `<shell> -e <script>`)
    #[arg(long, default_value = "sh", env = "RUNNER_RPC_SHELL")]
    shell: PathBuf,

    /// Signal sent to the job's process group on cancel
    #[arg(long, default_value = "SIGTERM", value_parser = parse_signal, env = "RUNNER_RPC_CANCEL_SIGNAL")]
    cancel_signal: Signal,

    /// Delete job output files older than this many seconds (disabled if unset)
    #[arg(long, env = "RUNNER_RPC_LOG_RETENTION_SECS")]
    log_retention_secs: Option<u64>,

    /// How often to look for expired output files, in seconds
    #[arg(long, default_value = "600", env = "RUNNER_RPC_LOG_SWEEP_SECS")]
    log_sweep_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Sidecar address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080", env = "RUNNER_RPC_ADDR")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a script for execution
    Submit {
        /// Job id, also the name of the output file
        id: String,
        /// Path of the script as seen by the sidecar
        path: String,
    },
    /// Show the current job status
    Status,
    /// Cancel the current job
    Cancel,
    /// Print output lines of a job
    Logs {
        id: String,

        /// First line to print (zero-based)
        #[arg(long, default_value = "0")]
        from_line: usize,

        /// Maximum number of lines to print
        #[arg(long, default_value = "1000")]
        max_lines: usize,
    },
    /// Submit a script, stream its output and exit with failure unless it
    /// completes with return code 0
    Run {
        id: String,
        path: String,

        /// Status poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        poll_ms: u64,
    },
}

fn parse_signal(value: &str) -> Result<Signal, String> {
    let name = value.to_ascii_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{}", name)
    };
    name.parse::<Signal>()
        .map_err(|_| format!("unknown signal: {}", value))
}

fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn print_status(status: &JobStatus, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(status)?),
        OutputFormat::Table => {
            println!("Job ID:      {}", status.id);
            println!("Status:      {}", status.phase);
            if let Some(pid) = status.pid {
                println!("PID:         {}", pid);
            }
            if let Some(code) = status.exit_code {
                println!("Return code: {}", code);
            }
            if let Some(ref error) = status.error {
                println!("Error:       {}", error);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = ExecutorConfig::new(SocketAddr::new(args.host, args.port), args.logs_dir);
    config.shell = ShellConfig {
        program: args.shell,
        cancel_signal: args.cancel_signal,
    };
    if let Some(secs) = args.log_retention_secs {
        config = config.with_retention(RetentionConfig {
            max_age: Duration::from_secs(secs),
            sweep_interval: Duration::from_secs(args.log_sweep_secs),
        });
    }

    tracing::info!(
        addr = %config.listen_addr,
        logs_dir = %config.logs_dir.display(),
        shell = %config.shell.program.display(),
        retention = ?config.retention,
        "Starting runner-rpc"
    );

    let shutdown = install_shutdown_handler();
    Node::new(config).run(shutdown).await
}

// =============================================================================
// Client Implementation
// =============================================================================

async fn run_job_command(
    client_args: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = RunnerClient::new(client_args.addr);
    let output_format = client_args.output;

    match command {
        JobCommands::Submit { id, path } => {
            let status = client.submit(&id, &path).await?;
            print_status(&status, &output_format)?;
            if status.phase == JobPhase::Failed {
                std::process::exit(1);
            }
        }
        JobCommands::Status => {
            print_status(&client.status().await?, &output_format)?;
        }
        JobCommands::Cancel => {
            let status = client.cancel().await?;
            print_status(&status, &output_format)?;
            if status.phase == JobPhase::Failed {
                std::process::exit(1);
            }
        }
        JobCommands::Logs {
            id,
            from_line,
            max_lines,
        } => {
            let lines = client.logs(&id, from_line, max_lines).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
                OutputFormat::Table => lines.iter().for_each(|line| print!("{}", line)),
            }
        }
        JobCommands::Run { id, path, poll_ms } => {
            let mut stdout = std::io::stdout();
            let status = client
                .run_to_completion(&id, &path, Duration::from_millis(poll_ms), &mut stdout)
                .await?;

            match (status.phase, status.exit_code) {
                (JobPhase::Completed, Some(0)) => {
                    tracing::info!(job_id = %status.id, "Job completed successfully");
                }
                (JobPhase::Failed, _) => {
                    eprintln!(
                        "Error: job failed: {}",
                        status.error.as_deref().unwrap_or("unknown error")
                    );
                    std::process::exit(1);
                }
                (_, code) => {
                    eprintln!("Error: job returned code {:?}", code);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    init_logging(&args.log_format);

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Job { client, command } => run_job_command(client, command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signal_accepts_short_and_full_names() {
        assert_eq!(parse_signal("SIGINT"), Ok(Signal::SIGINT));
        assert_eq!(parse_signal("term"), Ok(Signal::SIGTERM));
        assert_eq!(parse_signal("Hup"), Ok(Signal::SIGHUP));
        assert!(parse_signal("NOPE").is_err());
    }

    #[test]
    fn cli_parses_server_defaults() {
        let args = Args::try_parse_from(["runner-rpc", "server"]).unwrap();
        match args.command {
            Commands::Server(server) => {
                assert_eq!(server.port, 8080);
                assert_eq!(server.logs_dir, PathBuf::from("/logs"));
                assert_eq!(server.cancel_signal, Signal::SIGTERM);
                assert!(server.log_retention_secs.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
