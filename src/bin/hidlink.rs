//! HID device inspection tool

use std::{sync::Arc, thread, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use hidlink::{
    hid::{self, HidBackend},
    Device, DeviceConfig, DeviceFilter, DeviceScanner,
};

#[derive(Parser, Debug)]
#[command(version, about = "HID device inspection tool")]
struct Opts {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// List devices matching the filter
    List {
        /// The USB vendor and product id, `vid:pid` in hex (`*` on either side matches anything)
        #[arg(long, default_value = "*:*")]
        device: DeviceFilter,

        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch for device arrivals and removals
    Watch {
        /// The USB vendor and product id, `vid:pid` in hex (`*` on either side matches anything)
        #[arg(long, default_value = "*:*")]
        device: DeviceFilter,

        /// Scan interval in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },

    /// Stream input reports from a device
    Monitor {
        /// The USB vendor and product id, `vid:pid` in hex
        #[arg(long)]
        device: DeviceFilter,

        /// Match a specific serial number
        #[arg(long)]
        serial: Option<String>,

        /// Report length in bytes
        #[arg(long)]
        report_length: usize,

        /// Input reports carry a report-id prefix byte
        #[arg(long)]
        report_ids: bool,

        /// Read timeout in milliseconds
        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,
    },

    /// Send one output report
    Write {
        /// The USB vendor and product id, `vid:pid` in hex
        #[arg(long)]
        device: DeviceFilter,

        /// Match a specific serial number
        #[arg(long)]
        serial: Option<String>,

        /// Report length in bytes
        #[arg(long)]
        report_length: usize,

        /// Payload bytes as hex
        payload: String,
    },

    /// Print a device's descriptor strings
    Info {
        /// The USB vendor and product id, `vid:pid` in hex
        #[arg(long)]
        device: DeviceFilter,

        /// Match a specific serial number
        #[arg(long)]
        serial: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let backend = hid::default_backend()?;

    match opts.subcmd {
        SubCommand::List { device, json } => run_list(backend, device, json),
        SubCommand::Watch {
            device,
            interval_ms,
        } => run_watch(backend, device, interval_ms),
        SubCommand::Monitor {
            device,
            serial,
            report_length,
            report_ids,
            timeout_ms,
        } => {
            let config = DeviceConfig::new(report_length)
                .with_report_ids(report_ids)
                .with_read_timeout(Duration::from_millis(timeout_ms));
            run_monitor(backend, device, serial.as_deref(), config)
        }
        SubCommand::Write {
            device,
            serial,
            report_length,
            payload,
        } => run_write(backend, device, serial.as_deref(), report_length, &payload),
        SubCommand::Info { device, serial } => run_info(backend, device, serial.as_deref()),
    }
}

fn run_list(backend: Arc<dyn HidBackend>, filter: DeviceFilter, json: bool) -> Result<()> {
    let scanner = DeviceScanner::new(backend, filter);
    let devices = scanner.scan_once()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No matching devices detected.");
    } else {
        for device in &devices {
            println!("Found: {}", device);
        }
    }
    Ok(())
}

fn run_watch(backend: Arc<dyn HidBackend>, filter: DeviceFilter, interval_ms: u64) -> Result<()> {
    let scanner = DeviceScanner::new(backend, filter);
    scanner.set_scan_interval(Duration::from_millis(interval_ms));
    scanner
        .device_arrived()
        .subscribe(|info| println!("arrived: {}", info));
    scanner
        .device_removed()
        .subscribe(|info| println!("removed: {}", info));
    scanner.start_async_scan();
    println!(
        "Watching {} every {}ms, ctrl-c to exit",
        scanner.filter(),
        interval_ms
    );

    while scanner.is_scanning() {
        thread::sleep(Duration::from_millis(250));
    }
    Err(anyhow!("scan loop stopped after an enumeration failure"))
}

fn run_monitor(
    backend: Arc<dyn HidBackend>,
    filter: DeviceFilter,
    serial: Option<&str>,
    config: DeviceConfig,
) -> Result<()> {
    let (vendor_id, product_id) = concrete_ids(&filter)?;
    let device = Device::open(backend.as_ref(), vendor_id, product_id, serial, config)?;
    println!("{}", device.description()?);

    device
        .input_reports()
        .subscribe(|report| println!("read: {}", hex::encode(report)));
    device
        .disconnected()
        .subscribe(|_| println!("device disconnected"));
    device.start_async_read()?;

    // The reader disposes the device when it hits a read failure.
    while device.is_open() {
        thread::sleep(Duration::from_millis(250));
    }
    Ok(())
}

fn run_write(
    backend: Arc<dyn HidBackend>,
    filter: DeviceFilter,
    serial: Option<&str>,
    report_length: usize,
    payload: &str,
) -> Result<()> {
    let payload = hex::decode(payload)?;
    let (vendor_id, product_id) = concrete_ids(&filter)?;
    let device = Device::open(
        backend.as_ref(),
        vendor_id,
        product_id,
        serial,
        DeviceConfig::new(report_length),
    )?;
    device.write(&payload)?;
    println!("wrote {} bytes", payload.len());
    Ok(())
}

fn run_info(backend: Arc<dyn HidBackend>, filter: DeviceFilter, serial: Option<&str>) -> Result<()> {
    let (vendor_id, product_id) = concrete_ids(&filter)?;
    let device = Device::open(
        backend.as_ref(),
        vendor_id,
        product_id,
        serial,
        DeviceConfig::new(64),
    )?;
    println!("{:04x}:{:04x} {}", vendor_id, product_id, device.description()?);
    Ok(())
}

fn concrete_ids(filter: &DeviceFilter) -> Result<(u16, u16)> {
    match (filter.vendor_id, filter.product_id) {
        (Some(vendor_id), Some(product_id)) => Ok((vendor_id, product_id)),
        _ => Err(anyhow!(
            "a concrete vendor and product id is required, e.g. --device 16c0:0486"
        )),
    }
}
