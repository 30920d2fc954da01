// src/bin/gce-disk-names.rs

use anyhow::Result;
use clap::Parser;
use gce_disk_name::{discover, resolve_all, DeviceHandle, DeviceReport};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gce-disk-names")]
#[command(about = "Print the cloud-assigned name of each attached persistent disk")]
struct Args {
    /// Device path to resolve, e.g. \\.\PhysicalDrive1. Repeatable; defaults to every physical drive.
    #[arg(long = "device", value_name = "PATH")]
    devices: Vec<String>,

    /// Emit a JSON array instead of one line per device.
    #[arg(long)]
    json: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Serialize)]
struct ReportLine<'a> {
    path: &'a str,
    name: Option<&'a str>,
    error_kind: Option<&'static str>,
    error: Option<String>,
    os_code: Option<i32>,
}

impl<'a> From<&'a DeviceReport> for ReportLine<'a> {
    fn from(report: &'a DeviceReport) -> Self {
        let error = report.outcome.as_ref().err();
        ReportLine {
            path: &report.path,
            name: report.outcome.as_deref().ok(),
            error_kind: error.map(|e| e.kind()),
            error: error.map(|e| e.to_string()),
            os_code: error.and_then(|e| e.os_code()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let reports = if args.devices.is_empty() {
        discover()
    } else {
        resolve_all(&args.devices, DeviceHandle::open)
    };

    if args.json {
        let lines: Vec<ReportLine> = reports.iter().map(ReportLine::from).collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for report in &reports {
            match &report.outcome {
                Ok(name) => println!("{}\t{}", report.path, name),
                Err(e) => eprintln!("{}\t{}", report.path, e),
            }
        }
    }

    if reports.iter().any(DeviceReport::is_failure) {
        std::process::exit(1);
    }
    Ok(())
}
