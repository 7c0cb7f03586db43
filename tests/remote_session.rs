use fleet_remote::config::SessionConfig;
use fleet_remote::protocol::{self, RpcError, METHOD_START_SPINNER, NOTIFY_TICK};
use fleet_remote::{FleetClient, FleetServer, FleetService, Shutdown, TaskKind, TaskOutcome};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn fast_session() -> SessionConfig {
    SessionConfig {
        max_duration_ms: 10_000,
        spinner_interval_ms: 10,
        health_interval_ms: 20,
        exit_delay_ms: 20,
    }
}

async fn start_server(session: SessionConfig) -> (SocketAddr, Shutdown, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = Shutdown::new();
    let server = FleetServer::new(FleetService::new(session, shutdown.clone()), shutdown.clone());
    let handle = tokio::spawn(async move {
        server.serve(listener).await.expect("serve");
    });
    (addr, shutdown, handle)
}

async fn wait_until_free(client: &FleetClient) {
    for _ in 0..100 {
        if client.status().await.expect("status").is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task slot was never released");
}

#[tokio::test]
async fn test_send_text_and_idle_stop() {
    let (addr, shutdown, _server) = start_server(fast_session()).await;
    let client = FleetClient::connect(addr).await.unwrap();

    assert_eq!(client.send_text("ping").await.unwrap(), "Text received: ping");
    assert_eq!(client.stop().await.unwrap(), "No active task");
    assert_eq!(client.status().await.unwrap(), None);

    shutdown.trigger();
}

#[tokio::test]
async fn test_stop_health_then_start_spinner() {
    let (addr, shutdown, _server) = start_server(fast_session()).await;
    let client = FleetClient::connect(addr).await.unwrap();

    let mut health = client.show_health().await.unwrap();
    let first = health.next().await.expect("tick").unwrap();
    assert!(!first.finished);
    assert!(first.health.is_some());
    assert!(first.connection.is_some());

    assert_eq!(client.stop().await.unwrap(), "Stopped");

    let mut last = None;
    while let Some(card) = health.next().await {
        last = Some(card.unwrap());
    }
    let last = last.expect("final card");
    assert!(last.finished);
    assert_eq!(last.robot_ascii, "[stopped]");
    assert_eq!(health.finish().await.unwrap().outcome, TaskOutcome::Stopped);

    // The response closing the stream is written after release.
    let mut spinner = client.start_spinner().await.unwrap();
    assert_eq!(spinner.next().await.expect("frame").unwrap().frame, "|");
    client.stop().await.unwrap();
    assert_eq!(spinner.finish().await.unwrap().outcome, TaskOutcome::Stopped);

    shutdown.trigger();
}

#[tokio::test]
async fn test_second_start_rejected() {
    let (addr, shutdown, _server) = start_server(fast_session()).await;
    let client = FleetClient::connect(addr).await.unwrap();

    let mut first = client.start_spinner().await.unwrap();
    first.next().await.expect("frame").unwrap();

    let mut second = client.start_spinner().await.unwrap();
    assert!(second.next().await.is_none());
    let err = second.finish().await.unwrap_err();
    let rpc = err.downcast_ref::<RpcError>().expect("rpc error");
    assert!(rpc.is_already_active());

    let other = client.show_health().await.unwrap();
    assert!(other.finish().await.is_err());

    assert_eq!(client.status().await.unwrap(), Some(TaskKind::Spinner));
    client.stop().await.unwrap();
    assert_eq!(first.finish().await.unwrap().outcome, TaskOutcome::Stopped);

    shutdown.trigger();
}

#[tokio::test]
async fn test_task_times_out() {
    let session = SessionConfig {
        max_duration_ms: 60,
        ..fast_session()
    };
    let (addr, shutdown, _server) = start_server(session).await;
    let client = FleetClient::connect(addr).await.unwrap();

    let started = Instant::now();
    let mut spinner = client.start_spinner().await.unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = spinner.next().await {
        frames.push(frame.unwrap());
    }
    let elapsed = started.elapsed();
    let last = frames.last().expect("final frame");
    assert_eq!(last.frame, "[timeout]");
    assert!(last.finished);
    assert!(frames.len() >= 3);
    // 60ms at 10ms per frame, plus the final frame.
    assert!(frames.len() <= 60 / 10 + 2, "too many frames: {}", frames.len());
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_secs(1), "ran for {:?}", elapsed);

    let report = spinner.finish().await.unwrap();
    assert_eq!(report.outcome, TaskOutcome::Timeout);
    assert_eq!(report.ticks as usize, frames.len() - 1);
    assert_eq!(client.status().await.unwrap(), None);

    shutdown.trigger();
}

#[tokio::test]
async fn test_stop_from_second_connection() {
    let (addr, shutdown, _server) = start_server(fast_session()).await;
    let watcher = FleetClient::connect(addr).await.unwrap();
    let controller = FleetClient::connect(addr).await.unwrap();

    let mut spinner = watcher.start_spinner().await.unwrap();
    spinner.next().await.expect("frame").unwrap();

    assert_eq!(controller.stop().await.unwrap(), "Stopped");
    assert_eq!(spinner.finish().await.unwrap().outcome, TaskOutcome::Stopped);

    shutdown.trigger();
}

#[tokio::test]
async fn test_disconnect_releases_slot() {
    let (addr, shutdown, _server) = start_server(fast_session()).await;
    let observer = FleetClient::connect(addr).await.unwrap();

    {
        let client = FleetClient::connect(addr).await.unwrap();
        let mut spinner = client.start_spinner().await.unwrap();
        spinner.next().await.expect("frame").unwrap();
        assert_eq!(observer.status().await.unwrap(), Some(TaskKind::Spinner));
    }

    wait_until_free(&observer).await;
    let mut health = observer.show_health().await.unwrap();
    assert!(health.next().await.is_some());
    observer.stop().await.unwrap();

    shutdown.trigger();
}

#[tokio::test]
async fn test_half_closed_client_still_receives_stream() {
    let session = SessionConfig {
        max_duration_ms: 100,
        ..fast_session()
    };
    let (addr, shutdown, _server) = start_server(session).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = protocol::request(1, METHOD_START_SPINNER, json!({}));
    stream
        .write_all(format!("{}\n", request).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut lines = BufReader::new(stream).lines();
    let mut ticks = Vec::new();
    let mut response = None;
    let read_all = async {
        while let Some(line) = lines.next_line().await.unwrap() {
            let msg: Value = serde_json::from_str(&line).unwrap();
            if msg["method"] == NOTIFY_TICK {
                ticks.push(msg["params"]["tick"].clone());
            } else {
                response = Some(msg);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), read_all)
        .await
        .expect("server should finish the stream and close");

    let response = response.expect("closing response");
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["outcome"], "timeout");
    assert!(ticks.len() >= 2);
    assert_eq!(ticks[0]["frame"], "|");
    assert_eq!(ticks.last().unwrap()["frame"], "[timeout]");

    let observer = FleetClient::connect(addr).await.unwrap();
    assert_eq!(observer.status().await.unwrap(), None);

    shutdown.trigger();
}

#[tokio::test]
async fn test_exit_shuts_server_down() {
    let (addr, _shutdown, server) = start_server(fast_session()).await;
    let client = FleetClient::connect(addr).await.unwrap();

    let mut spinner = client.start_spinner().await.unwrap();
    spinner.next().await.expect("frame").unwrap();

    assert_eq!(client.exit().await.unwrap(), "Server is shutting down");
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server should stop after exit")
        .unwrap();
}
