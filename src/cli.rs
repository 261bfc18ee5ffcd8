// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the depth bridge
//!
//! This module provides command-line functionality for:
//! - Listing the simulated device's sensor modules and stream profiles
//! - Printing the effective configuration
//! - Running the node and summarizing what it published

use depth_bridge::backends::camera::{CameraDevice, SimulatedDevice};
use depth_bridge::constants::MESSAGE_CHANNEL_CAPACITY;
use depth_bridge::processing::SystemClock;
use depth_bridge::publish::{ChannelPublisher, FrequencyStatus, Publisher};
use depth_bridge::{DepthCameraNode, DriverConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Overrides accepted by `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub duration: u64,
    pub filters: Option<String>,
    pub align: bool,
    pub pointcloud: bool,
}

#[derive(Debug, Default)]
struct TopicSummary {
    kind: &'static str,
    count: u64,
}

/// List sensor modules and their stream profiles
pub fn list_profiles() -> Result<(), Box<dyn std::error::Error>> {
    let device = SimulatedDevice::d435i();
    let info = device.info();
    println!("{} (serial {}, firmware {})", info.name, info.serial_number, info.firmware_version);
    println!();

    for sensor in device.sensors() {
        let profiles = sensor.stream_profiles();
        println!("  {} ({} profiles)", sensor.name(), profiles.len());
        if let Some(scale) = sensor.depth_scale() {
            println!("      Depth units: {} m", scale);
        }
        for profile in &profiles {
            println!("      {}", profile);
        }
        println!();
    }
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path.as_deref())?.resolve();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => DriverConfig::load(path)?,
        None => match DriverConfig::default_path() {
            Some(path) => DriverConfig::load_or_default(&path)?,
            None => DriverConfig::default(),
        },
    };
    Ok(config)
}

/// Bring the node up on the simulated device and report what was published
pub fn run_node(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(options.config.as_deref())?;
    if let Some(filters) = options.filters {
        config.filters = filters;
    }
    config.align_depth |= options.align;
    config.enable_pointcloud |= options.pointcloud;

    let rt = tokio::runtime::Runtime::new()?;
    let (publisher, mut receiver) = ChannelPublisher::new(MESSAGE_CHANNEL_CAPACITY);
    let publisher = Arc::new(publisher);

    // Single consumer draining every topic
    let consumer = rt.spawn(async move {
        let mut summary: BTreeMap<String, TopicSummary> = BTreeMap::new();
        while let Some(item) = receiver.recv().await {
            let entry = summary.entry(item.topic).or_default();
            entry.kind = item.message.kind();
            entry.count += 1;
        }
        summary
    });

    let mut node = DepthCameraNode::new(
        config,
        Arc::new(SimulatedDevice::d435i()),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        Arc::new(SystemClock),
    );
    node.setup()?;

    println!("Filters: {}", node.filter_names().join(", "));
    println!("Streaming... (press Ctrl+C to stop early)");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(options.duration);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        let elapsed = start.elapsed().as_secs();
        print!("\rStreaming: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    let elapsed = start.elapsed().as_secs_f64();
    let keys = node.catalog().enabled_image_keys();
    let rates: Vec<(String, Option<f64>, FrequencyStatus)> = keys
        .into_iter()
        .filter_map(|key| node.diagnostics(key))
        .map(|diag| (diag.topic().to_string(), diag.frequency(), diag.status()))
        .collect();

    node.shutdown();
    drop(node);
    let dropped = publisher.dropped();
    drop(publisher);

    let summary = rt.block_on(async {
        tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .ok()
            .and_then(|joined| joined.ok())
            .unwrap_or_default()
    });

    println!("Published over {:.1}s:", elapsed);
    for (topic, entry) in &summary {
        println!("  {:<40} {:>7} {}", topic, entry.count, entry.kind);
    }
    if dropped > 0 {
        println!("  ({} messages dropped, consumer fell behind)", dropped);
    }
    println!();
    println!("Publish rates:");
    for (topic, hz, status) in rates {
        match hz {
            Some(hz) => println!("  {:<40} {:>6.1} Hz {:?}", topic, hz, status),
            None => println!("  {:<40}    n/a {:?}", topic, status),
        }
    }
    Ok(())
}
