//! Serial port monitor.
//!
//! Demonstrates:
//! - Listing available serial ports
//! - Building a configuration from host-form settings
//! - Attaching inbound and outbound endpoints to one shared port
//! - Status reporting across disconnects and reconnects
//!
//! Usage:
//!   cargo run --example monitor -- --list
//!   cargo run --example monitor -- /dev/ttyUSB0
//!   cargo run --example monitor -- /dev/ttyUSB0 --baud 9600 --flow rts-on --send "READ 1"
//!   cargo run --example monitor -- COM3 --out time --value 20 --bin --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use rs485_link::{
    ConnectionPool, InboundEndpoint, OutboundEndpoint, Payload, PortSettings, StatusHandler,
};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Default)]
struct Args {
    list: bool,
    debug: bool,
    port: Option<String>,
    settings: Map<String, Value>,
    send: Option<String>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);

        while let Some(arg) = iter.next() {
            let mut value = |name: &str| {
                iter.next()
                    .with_context(|| format!("{name} expects a value"))
            };

            match arg.as_str() {
                "--list" => args.list = true,
                "--debug" => args.debug = true,
                "--bin" => {
                    args.settings.insert("bin".into(), json!("bin"));
                }
                "--baud" => {
                    args.settings.insert("serialbaud".into(), json!(value("--baud")?));
                }
                "--parity" => {
                    args.settings.insert("parity".into(), json!(value("--parity")?));
                }
                "--flow" => {
                    args.settings.insert("flowcontrol".into(), json!(value("--flow")?));
                }
                "--out" => {
                    args.settings.insert("out".into(), json!(value("--out")?));
                }
                "--value" => {
                    args.settings.insert("newline".into(), json!(value("--value")?));
                }
                "--send" => args.send = Some(value("--send")?),
                other if !other.starts_with("--") => args.port = Some(other.to_owned()),
                other => anyhow::bail!("unknown flag {other}"),
            }
        }

        Ok(args)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            std::process::exit(2);
        }
    };
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "rs485_link=trace"
    } else {
        "rs485_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

async fn run(mut args: Args) -> anyhow::Result<()> {
    let pool = ConnectionPool::builder()
        .reconnect_delay(Duration::from_secs(5))
        .build();

    if args.list {
        for port in pool.list_ports().await? {
            println!("{}", serde_json::to_string(&port)?);
        }
        return Ok(());
    }

    let port = args.port.take().context("no port given (try --list)")?;
    args.settings.insert("serialport".into(), json!(port));
    let line_mode = args
        .settings
        .get("out")
        .is_none_or(|out| out == "char");
    if line_mode {
        args.settings.insert("addchar".into(), json!(true));
    }

    let settings = PortSettings::from_json(Value::Object(args.settings))?;
    let config = settings.into_link_config()?;
    println!("=== Monitoring {} ({}) ===\n", config.port, config.line);

    let status: StatusHandler = Box::new(|status| println!("[status] {status}"));
    let (inbound, mut frames) = InboundEndpoint::attach(&pool, Some(&config), Some(status))?;
    let outbound = OutboundEndpoint::attach(&pool, Some(&config), None)?;

    if let Some(text) = args.send.take() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match outbound.send(text.as_str()).await {
            Ok(()) => println!("[sent] {text:?}"),
            Err(e) => println!("[send failed] {e}"),
        }
    }

    println!("Press Ctrl+C to exit...");
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(message) => match message.payload {
                    Payload::Text(text) => println!("[rx] {text:?}"),
                    Payload::Binary(bytes) => println!("[rx] {bytes:02X?}"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    outbound.detach().await;
    inbound.detach().await;
    pool.shutdown().await;
    Ok(())
}
