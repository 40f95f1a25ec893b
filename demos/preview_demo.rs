//! Preview Demo - open a camera on a remote service and watch it stream
//!
//! Usage: `cargo run --example preview_demo -- [service-url] [device-id] [pull|push]`

use anyhow::Context;
use camlink::{
    init_logging, CamLink, ControllerConfig, EventFilter, SessionEvent, SystemMonitor,
    TransportKind,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("info,camlink=debug");

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:8080/".to_string());
    let device_id = args.next();
    let transport = match args.next().as_deref() {
        Some("pull") => TransportKind::Pull,
        _ => TransportKind::Push,
    };

    println!("🎥 camlink Preview Demo");
    println!("========================");

    let config = ControllerConfig::lan()
        .with_service_url(&url)
        .with_transport(transport);
    let (camlink, events) = CamLink::with_event_stream(config).context("invalid configuration")?;
    let mut events = events.filtered(EventFilter::without_frames());

    let devices = camlink
        .catalog()
        .refresh()
        .await
        .context("listing devices")?;
    println!("📹 Found {} camera devices:", devices.len());
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, device.name, device.id);
    }
    let Some(device_id) = device_id.or_else(|| devices.first().map(|d| d.id.clone())) else {
        println!("❌ No camera devices found");
        return Ok(());
    };

    camlink.select_device_by_id(&device_id).await?;
    camlink.open_default().await?;
    println!("🚀 Starting {} preview on {}...", transport, device_id);
    camlink.controller().start_preview().await?;
    camlink.reconciler().start();

    let monitor = SystemMonitor::new(camlink.system_stats()?, Duration::from_secs(5));
    monitor.start();

    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(SessionEvent::StateChanged { old, new }) => println!("🔄 {} -> {}", old, new),
                Some(SessionEvent::Error { kind, message }) => println!("⚠️  [{}] {}", kind, message),
                Some(SessionEvent::Metrics(m)) => println!(
                    "📊 {} frames, {} errors, {:.1} fps | {}",
                    m.frames_received,
                    m.decode_errors,
                    m.current_fps,
                    camlink.reconciler().displayed()
                ),
                Some(SessionEvent::Frame(_)) => {}
                None => break,
            }
        }
    }

    if let Some(stats) = monitor.latest() {
        println!("🖥  {}", stats.summary());
    }
    monitor.stop();

    println!("🛑 Stopping preview...");
    camlink.controller().stop_preview().await?;
    camlink.shutdown().await?;
    println!("✅ Done");
    Ok(())
}
