
use std::time::Duration;

use runner_rpc::config::RetentionConfig;
use runner_rpc::dispatcher::JobPhase;
use runner_rpc::node::Node;
use test_harness::{wait_until, TestEnv, WAIT_TIMEOUT};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_node_creates_logs_dir_and_stops_on_shutdown() {
    let mut env = TestEnv::new();
    env.config.logs_dir = env.dir.path().join("nested").join("logs");

    let node = Node::new(env.config.clone());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(node.run(shutdown.clone()));

    let logs_dir = env.config.logs_dir.clone();
    test_harness::assert_eventually(
        || {
            let logs_dir = logs_dir.clone();
            async move { logs_dir.is_dir() }
        },
        "node should create the logs directory",
    )
    .await;

    shutdown.cancel();
    let result = tokio::time::timeout(WAIT_TIMEOUT, handle)
        .await
        .expect("node should stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_node_shutdown_cancels_in_flight_job() {
    let env = TestEnv::new();
    let script = env.script("long", "sleep 30\n");

    let node = Node::new(env.config.clone().with_retention(RetentionConfig {
        max_age: Duration::from_secs(3600),
        sweep_interval: Duration::from_millis(50),
    }));
    let dispatcher = node.dispatcher.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(node.run(shutdown.clone()));

    dispatcher.submit("long", &script).await;
    wait_until(&dispatcher, |s| s.phase == JobPhase::Running).await;

    shutdown.cancel();
    tokio::time::timeout(WAIT_TIMEOUT, handle)
        .await
        .expect("node should stop after shutdown")
        .unwrap()
        .unwrap();

    let status = dispatcher.current_status();
    assert_eq!(status.id, "long");
    assert_eq!(status.phase, JobPhase::Completed);
    assert_ne!(status.exit_code, Some(0));
    // The in-flight job's output survives the sweeper
    assert!(env.config.output_path("long").exists());
}
