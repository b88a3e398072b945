//! End-to-end tests: real nodes on localhost, driven through the client

use bytes::Bytes;
use minidfs::client::{Download, NodeClient};
use minidfs::common::NodeConfig;
use minidfs::manager::StartOutcome;
use minidfs::node::protocol::{read_message, write_message};
use minidfs::{ClusterClient, Config, NodeManager};
use rand::RngCore;
use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

fn get_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn cluster_config(dir: &TempDir, nodes: usize) -> Config {
    Config {
        nodes: (1..=nodes)
            .map(|n| NodeConfig {
                port: get_free_port(),
                directory: dir.path().join(format!("server_files{}", n)),
            })
            .collect(),
        worker_pool_size: 4,
        probe_timeout_ms: 500,
        ..Config::default()
    }
}

async fn start_node(manager: &NodeManager, index: usize) -> SocketAddr {
    match manager.start(index).await.unwrap() {
        StartOutcome::Started(addr) => addr,
        other => panic!("node {} did not start: {:?}", index + 1, other),
    }
}

fn client(addr: SocketAddr) -> NodeClient {
    NodeClient::new(addr, Duration::from_millis(500))
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);

    let mut payload = vec![0u8; 300_000];
    rand::thread_rng().fill_bytes(&mut payload);

    let reply = node.upload("random.bin", &payload).await.unwrap();
    assert_eq!(reply, "File uploaded successfully: random.bin");
    assert_eq!(
        node.download("random.bin").await.unwrap(),
        Download::Ready(payload)
    );

    // Empty files survive the trip too.
    node.upload("empty", b"").await.unwrap();
    assert_eq!(
        node.download("empty").await.unwrap(),
        Download::Ready(Vec::new())
    );

    manager.stop_all().await;
}

#[tokio::test]
async fn test_upload_into_removed_directory_gets_failure_reply() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);
    std::fs::remove_dir_all(dir.path().join("server_files1")).unwrap();

    for size in [16, 300_000, 4 * 1024 * 1024] {
        let body = vec![1u8; size];
        assert_eq!(
            node.upload("x.bin", &body).await.unwrap(),
            "Failed to upload the file: x.bin",
            "body of {} bytes",
            size
        );
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn test_list_returns_exact_set() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);

    assert!(node.list().await.unwrap().is_empty());
    for name in ["a", "b", "c"] {
        node.upload(name, name.as_bytes()).await.unwrap();
    }

    let listed: HashSet<String> = node.list().await.unwrap().into_iter().collect();
    let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(listed, expected);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_delete_then_download_is_not_found() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);

    node.upload("gone.txt", b"bye").await.unwrap();
    assert_eq!(
        node.delete("gone.txt").await.unwrap(),
        "File deleted successfully: gone.txt"
    );
    assert_eq!(
        node.download("gone.txt").await.unwrap(),
        Download::Refused("File not found.".into())
    );
    assert_eq!(node.delete("gone.txt").await.unwrap(), "File not found.");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_stopped_node_refuses_while_others_serve() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 2));
    let first = client(start_node(&manager, 0).await);
    let second = client(start_node(&manager, 1).await);

    manager.stop(0).await.unwrap();

    assert!(!first.is_reachable().await);
    assert!(first.list().await.is_err());
    assert_eq!(
        second.upload("still.txt", b"up").await.unwrap(),
        "File uploaded successfully: still.txt"
    );
    assert_eq!(second.list().await.unwrap(), vec!["still.txt"]);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_restarted_node_keeps_its_files() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);

    node.upload("keep.txt", b"persisted").await.unwrap();
    manager.stop(0).await.unwrap();
    assert!(!node.is_reachable().await);

    start_node(&manager, 0).await;
    assert_eq!(
        node.download("keep.txt").await.unwrap(),
        Download::Ready(b"persisted".to_vec())
    );

    manager.stop_all().await;
}

#[tokio::test]
async fn test_concurrent_uploads_of_different_names() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let node = client(start_node(&manager, 0).await);

    let left = vec![b'L'; 100_000];
    let right = vec![b'R'; 120_000];
    let (a, b) = tokio::join!(node.upload("left", &left), node.upload("right", &right));
    assert!(a.unwrap().starts_with("File uploaded successfully"));
    assert!(b.unwrap().starts_with("File uploaded successfully"));

    assert_eq!(node.download("left").await.unwrap(), Download::Ready(left));
    assert_eq!(node.download("right").await.unwrap(), Download::Ready(right));

    manager.stop_all().await;
}

#[tokio::test]
async fn test_cluster_upload_fans_out_to_reachable_nodes() {
    let dir = TempDir::new().unwrap();
    let config = cluster_config(&dir, 3);
    let manager = NodeManager::new(&config);
    start_node(&manager, 0).await;
    start_node(&manager, 2).await;

    let cluster = ClusterClient::from_config(&config);
    assert_eq!(cluster.reachable().await.len(), 2);

    let results = cluster
        .upload("shared.txt", Bytes::from_static(b"everywhere"))
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.result.is_ok()));

    assert!(dir.path().join("server_files1/shared.txt").exists());
    assert!(!dir.path().join("server_files2/shared.txt").exists());
    assert!(dir.path().join("server_files3/shared.txt").exists());

    let (_, body) = cluster.download("shared.txt").await.unwrap();
    assert_eq!(body, b"everywhere");

    let listings = cluster.list().await;
    assert_eq!(listings.len(), 2);
    for listing in &listings {
        assert_eq!(listing.result.as_ref().unwrap(), &vec!["shared.txt".to_string()]);
    }

    let deletes = cluster.delete("shared.txt").await;
    assert!(deletes
        .iter()
        .all(|r| r.result.as_deref().unwrap() == "File deleted successfully: shared.txt"));
    assert!(cluster.download("shared.txt").await.is_err());

    manager.stop_all().await;
}

#[tokio::test]
async fn test_in_flight_upload_survives_stop() {
    let dir = TempDir::new().unwrap();
    let manager = NodeManager::new(&cluster_config(&dir, 1));
    let addr = start_node(&manager, 0).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, "UPLOAD slow.bin").await.unwrap();
    stream.write_all(b"first half ").await.unwrap();
    // Give the worker time to pick the connection up before the listener goes.
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop(0).await.unwrap();

    stream.write_all(b"second half").await.unwrap();
    stream.shutdown().await.unwrap();
    assert_eq!(
        read_message(&mut stream).await.unwrap(),
        "File uploaded successfully: slow.bin"
    );
    assert_eq!(
        std::fs::read(dir.path().join("server_files1/slow.bin")).unwrap(),
        b"first half second half"
    );
}
