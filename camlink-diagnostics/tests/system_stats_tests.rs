//! System telemetry client tests against a minimal local HTTP server

use camlink_core::ErrorKind;
use camlink_diagnostics::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const INFO: &str = r#"{"success":true,"system":{"os_version":"Debian 12","kernel_version":"6.1.0",
"hostname":"edge-cam","uptime":"2 days, 3 hours","system_time":"2026-10-16 09:00:00",
"load_average":[0.12,0.2,0.18],
"cpu":{"core_count":4,"usage_percent":37.5,"temperature":51.2,"frequency":1416.0},
"memory":{"total":4294967296,"used":1073741824,"free":3221225472,"usage_percent":25.0},
"storage":[{"mount_point":"/","total":32000000000,"used":8000000000,"free":24000000000,"usage_percent":25.0}],
"network":[{"interface":"wlan0","ip_address":"192.168.1.20","tx_bytes":1024,"rx_bytes":2048,"tx_rate":512.0,"rx_rate":1024.0}]}}"#;

/// Serve `(status, body)` for every request; returns the base URL and a request counter
async fn start_http_server(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                loop {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                assert!(request.starts_with("GET /api/system/info"));
                counter.fetch_add(1, Ordering::SeqCst);

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{}/", addr), hits)
}

#[tokio::test]
async fn test_fetch_system_info() {
    let (url, hits) = start_http_server(200, INFO).await;
    let client = SystemStatsClient::new(&url, Duration::from_secs(2)).unwrap();
    assert!(client.endpoint().as_str().ends_with("/api/system/info"));

    let info = client.fetch().await.unwrap();
    assert_eq!(info.hostname, "edge-cam");
    assert_eq!(info.cpu.core_count, 4);
    assert_eq!(info.memory.total, 4 * 1024 * 1024 * 1024);
    assert_eq!(info.network[0].ip_address, "192.168.1.20");
    assert_eq!(format_rate(info.network[0].rx_rate), "1 KB/s");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_service_failure_is_request_failed() {
    let (url, _) =
        start_http_server(500, r#"{"success":false,"error":"cannot read /proc/stat"}"#).await;
    let client = SystemStatsClient::new(&url, Duration::from_secs(2)).unwrap();

    let err = client.fetch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestFailed);
    let text = err.to_string();
    assert!(text.contains("500"));
    assert!(text.contains("cannot read /proc/stat"));
}

#[tokio::test]
async fn test_envelope_failure_with_ok_status() {
    let (url, _) = start_http_server(200, r#"{"status":"error","message":"monitor offline"}"#).await;
    let client = SystemStatsClient::new(&url, Duration::from_secs(2)).unwrap();

    let err = client.fetch().await.unwrap_err();
    assert!(err.to_string().contains("monitor offline"));
}

#[tokio::test]
async fn test_monitor_polls_and_keeps_latest() {
    let (url, hits) = start_http_server(200, INFO).await;
    let client = SystemStatsClient::new(&url, Duration::from_secs(2)).unwrap();
    let monitor = SystemMonitor::new(client, Duration::from_millis(50));
    assert!(monitor.latest().is_none());

    monitor.start();
    assert!(monitor.is_running());
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.polls() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    monitor.stop();
    assert!(!monitor.is_running());
    assert_eq!(monitor.latest().unwrap().hostname, "edge-cam");
    assert!(monitor.last_error().is_none());

    let seen = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hits.load(Ordering::SeqCst) <= seen + 1);
}

#[tokio::test]
async fn test_monitor_records_poll_errors() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client =
        SystemStatsClient::new(&format!("http://{}/", addr), Duration::from_secs(1)).unwrap();
    let monitor = SystemMonitor::new(client, Duration::from_secs(60));

    assert!(monitor.poll_once().await.is_err());
    assert_eq!(monitor.polls(), 1);
    assert!(monitor.latest().is_none());
    assert!(monitor.last_error().is_some());
}

#[test]
fn test_rejects_bad_base_url() {
    let err = SystemStatsClient::new("not a url", Duration::from_secs(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
