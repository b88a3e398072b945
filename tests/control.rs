//! Control loop tests, driven through an in-process command channel

use minidfs::common::{NodeConfig, NodeStatus};
use minidfs::manager::{spawn_line_reader, ControlLoop, ControlReport};
use minidfs::{Config, NodeManager};
use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn get_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn manager(dir: &TempDir, nodes: usize) -> Arc<NodeManager> {
    let config = Config {
        nodes: (1..=nodes)
            .map(|n| NodeConfig {
                port: get_free_port(),
                directory: dir.path().join(format!("node{}", n)),
            })
            .collect(),
        worker_pool_size: 4,
        ..Config::default()
    };
    Arc::new(NodeManager::new(&config))
}

/// Feed `lines` through a control loop and collect `expected` reports.
async fn drive(manager: &Arc<NodeManager>, lines: &[&str], expected: usize) -> Vec<ControlReport> {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();

    for line in lines {
        command_tx.send(line.to_string()).await.unwrap();
    }
    drop(command_tx);

    ControlLoop::new(manager.clone(), command_rx, report_tx)
        .run()
        .await
        .unwrap();

    let mut reports = Vec::new();
    while reports.len() < expected {
        let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
            .await
            .expect("timed out waiting for report")
            .expect("report channel closed early");
        reports.push(report);
    }
    reports
}

async fn wait_for(manager: &NodeManager, index: usize, status: NodeStatus) {
    for _ in 0..100 {
        if manager.status(index).unwrap() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {} never became {}", index + 1, status);
}

#[tokio::test]
async fn test_startall_only_starts_stopped_nodes() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 3);
    manager.start(0).await.unwrap();
    manager.start(1).await.unwrap();

    let reports = drive(&manager, &["startall"], 1).await;
    assert!(matches!(reports[0], ControlReport::Started { node: 2, .. }));
    assert_eq!(manager.running_nodes(), vec![0, 1, 2]);

    let reports = drive(&manager, &["startall"], 1).await;
    assert!(matches!(reports[0], ControlReport::AllRunning));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_start_and_shutdown_individual_nodes() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 2);

    let reports = drive(&manager, &["start2"], 1).await;
    assert!(matches!(reports[0], ControlReport::Started { node: 1, .. }));
    wait_for(&manager, 1, NodeStatus::Running).await;

    let reports = drive(&manager, &["start2", "shutdown1"], 2).await;
    assert!(reports
        .iter()
        .any(|r| matches!(r, ControlReport::AlreadyRunning { node: 1 })));
    assert!(reports
        .iter()
        .any(|r| matches!(r, ControlReport::NotRunning { node: 0 })));

    let reports = drive(&manager, &["shutdown2"], 1).await;
    assert!(matches!(reports[0], ControlReport::Stopped { node: 1 }));
    assert_eq!(manager.status(1).unwrap(), NodeStatus::Stopped);
}

#[tokio::test]
async fn test_shutdownall() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 3);
    manager.start(0).await.unwrap();
    manager.start(2).await.unwrap();

    let reports = drive(&manager, &["shutdownall"], 2).await;
    assert!(matches!(reports[0], ControlReport::Stopped { node: 0 }));
    assert!(matches!(reports[1], ControlReport::Stopped { node: 2 }));
    assert!(manager.running_nodes().is_empty());

    let reports = drive(&manager, &["shutdownall"], 1).await;
    assert!(matches!(reports[0], ControlReport::NoneRunning));
}

#[tokio::test]
async fn test_bad_input_does_not_stop_the_loop() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 2);

    let reports = drive(
        &manager,
        &["start9", "shutdownx", "", "launch", "status", "start1"],
        5,
    )
    .await;

    assert!(matches!(reports[0], ControlReport::InvalidNode(_)));
    assert!(matches!(reports[1], ControlReport::InvalidNode(_)));
    assert!(matches!(reports[2], ControlReport::InvalidCommand(_)));
    match &reports[3] {
        ControlReport::Status(nodes) => assert_eq!(nodes.len(), 2),
        other => panic!("expected status, got {:?}", other),
    }
    assert!(matches!(reports[4], ControlReport::Started { node: 0, .. }));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_start_failure_is_reported_per_node() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 2);
    let busy = manager.snapshot()[0].addr;
    let _taken = TcpListener::bind(busy).unwrap();

    let mut reports = drive(&manager, &["startall"], 2).await;
    reports.sort_by_key(|r| match r {
        ControlReport::Started { node, .. } | ControlReport::StartFailed { node, .. } => *node,
        _ => usize::MAX,
    });
    assert!(matches!(reports[0], ControlReport::StartFailed { node: 0, .. }));
    assert!(matches!(reports[1], ControlReport::Started { node: 1, .. }));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_startall_then_shutdownall_stops_every_node() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 3);

    let reports = drive(&manager, &["startall", "shutdownall"], 6).await;
    let started = reports
        .iter()
        .filter(|r| matches!(r, ControlReport::Started { .. }))
        .count();
    let stopped = reports
        .iter()
        .filter(|r| matches!(r, ControlReport::Stopped { .. }))
        .count();
    assert_eq!((started, stopped), (3, 3));
    assert!(!reports
        .iter()
        .any(|r| matches!(r, ControlReport::NoneRunning)));
    assert!(manager.active_nodes().is_empty());
}

/// Blocks every read until the paired sender is dropped, like a terminal
/// nobody is typing into.
struct IdleConsole(std::sync::mpsc::Receiver<()>);

impl Read for IdleConsole {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        let _ = self.0.recv();
        Ok(0)
    }
}

#[test]
fn test_runtime_shuts_down_while_console_is_idle() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 1);
    let (_keep_idle, idle) = std::sync::mpsc::channel::<()>();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            manager.start(0).await.unwrap();
            let (report_tx, _report_rx) = mpsc::unbounded_channel();
            let source =
                spawn_line_reader(std::io::BufReader::new(IdleConsole(idle)), 4).unwrap();
            let control = ControlLoop::new(manager.clone(), source, report_tx);

            // Stands in for Ctrl-C arriving while the operator is idle.
            tokio::select! {
                _ = control.run() => panic!("idle console reported end of input"),
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
            assert_eq!(manager.stop_all().await, vec![0]);
        });
        drop(runtime);
        done_tx.send(()).unwrap();
    });

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("runtime stayed up behind a blocked console read");
}

#[tokio::test]
async fn test_line_source() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 1);
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();

    let input: &[u8] = b"start1\nbogus\n";
    let lines = BufReader::new(input).lines();
    ControlLoop::new(manager.clone(), lines, report_tx)
        .run()
        .await
        .unwrap();

    let mut reports = Vec::new();
    for _ in 0..2 {
        reports.push(
            tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert!(reports
        .iter()
        .any(|r| matches!(r, ControlReport::InvalidCommand(_))));
    assert!(reports
        .iter()
        .any(|r| matches!(r, ControlReport::Started { node: 0, .. })));

    manager.stop_all().await;
}
