//! AMI Battery Monitor
//!
//! A standalone tool to watch an AMI device's battery from the command line.
//! Opens a session, prints every decoded frame, and asks for the device info
//! on start so a connected device is identified right away.
//!
//! Usage:
//!   cargo run --example ami_monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Port name or FTDI serial number
//!   --baud RATE       Baud rate (default: 921600)
//!   --timeout SECS    Mark the device disconnected after this long without
//!                     a battery status (default: 5)
//!   --debug           Print raw traffic
//!   --list            List serial ports and exit
//!   --demo            Talk to a simulated device instead of a port
//!   --restricted      Log only one off-charger record per connection

use amistat_core::prelude::*;
use amistat_core::protocol::serial::list_ports;
use anyhow::Context;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = SessionConfig::default();
    let mut liveness_secs = 5u64;
    let mut demo = false;
    let mut recorder = EventRecorder::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.baud_rate = args[i].parse().unwrap_or(config.baud_rate);
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    liveness_secs = args[i].parse().unwrap_or(5);
                }
            }
            "--debug" => {
                config.debug_log = true;
            }
            "--demo" => {
                demo = true;
            }
            "--restricted" => {
                recorder.set_restricted(true);
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    println!(
                        "{:<20} {:<8} {}",
                        port.name,
                        if port.is_ftdi() { "FTDI" } else { "" },
                        port.serial_number.as_deref().unwrap_or("")
                    );
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    let (tx, rx) = mpsc::channel();
    let mut session = Session::new(config.clone());
    if demo {
        let transport = DemoTransport::new(DemoDevice::new(), Some(Duration::from_secs(1)));
        session.open_with_transport(Box::new(transport), Box::new(tx))?;
    } else {
        session
            .open("", Box::new(tx))
            .with_context(|| format!("failed to open '{}'", config.port_name))?;
    }
    session.get_device_info()?;

    let liveness = Duration::from_secs(liveness_secs);
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(SessionEvent::FrameReceived(frame)) => {
                print_frame(&session, &frame);
                if let Some(event) = frame.event() {
                    recorder.offer(session.log_record(event), session.averages_valid());
                }
                let info = session.device_info();
                let status = session.battery_status();
                recorder.flush_pending(
                    session.averages_valid(),
                    &info,
                    &status,
                    session.session_id(),
                );
                for record in recorder.drain() {
                    println!("Log: {}", serde_json::to_string(&record)?);
                }
            }
            Ok(SessionEvent::NewDeviceConnected(info)) => {
                println!(
                    "New device: {} serial {} firmware {}",
                    info.product_number, info.serial_number, info.firmware_version
                );
            }
            Ok(SessionEvent::AveragesValid) => println!("Averages valid"),
            Ok(SessionEvent::Log(line)) => println!("{}", line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let stale = session
            .last_status_age()
            .map_or(false, |age| age > liveness);
        if stale && session.mark_disconnected() {
            println!("Device disconnected");
            recorder.offer(
                session.log_record(DeviceEvent::DeviceDisconnected),
                session.averages_valid(),
            );
        }
    }

    session.close();
    Ok(())
}

fn print_frame(session: &Session, frame: &FrameReceived) {
    if let Some(event) = frame.event() {
        println!("Event: {}", event);
    }
    if frame.command_id.as_deref() != Some("GetBatteryStatus") {
        println!("[{}] {}", frame.channel, frame.text);
        return;
    }

    let status = session.battery_status();
    let averages = if status.average_is_valid {
        format!(
            "avg {:.1}% {:.0} mV",
            status.average_percentage, status.average_voltage
        )
    } else {
        format!("averaging {}/10", session.sample_count())
    };
    println!(
        "SOC {:>3}%  {} mV  {:<12}  {}",
        status.soc,
        status.voltage_mv,
        status.charger_text(),
        averages
    );
}

fn print_help() {
    println!("AMI Battery Monitor");
    println!();
    println!("Usage: ami_monitor [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT      Port name or FTDI serial number");
    println!("  --baud, -b RATE      Baud rate (default: 921600)");
    println!("  --timeout, -t SECS   Liveness timeout (default: 5)");
    println!("  --debug              Print raw traffic");
    println!("  --list, -l           List serial ports and exit");
    println!("  --demo               Use a simulated device");
    println!("  --restricted         Restricted event logging");
    println!("  --help, -h           Show this help");
}
