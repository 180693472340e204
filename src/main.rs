// MIT License - Copyright (c) 2023 ad2driver contributors
// Network monitor for AD2-family devices

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use ad2driver::{Ad2Driver, CommandRequest, Diagnostic, DriverConfig};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ad2monitor")]
#[command(about = "Watch an AD2 device over TCP and print events as JSON")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    device: DeviceToml,
    #[serde(default)]
    monitor: MonitorToml,
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    /// Host running ser2sock (or the device's own network port).
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_partition")]
    default_partition: u32,
    #[serde(default = "default_max_line_length")]
    max_line_length: usize,
}

#[derive(Debug, Deserialize)]
struct MonitorToml {
    /// Request version and configuration right after connecting.
    #[serde(default = "default_probe")]
    probe_on_connect: bool,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
}

impl Default for MonitorToml {
    fn default() -> Self {
        MonitorToml {
            probe_on_connect: default_probe(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

fn default_port() -> u16 {
    10000
}
fn default_partition() -> u32 {
    1
}
fn default_max_line_length() -> usize {
    1024
}
fn default_probe() -> bool {
    true
}
fn default_reconnect_delay() -> u64 {
    10000
}

fn build_driver_config(toml: &DeviceToml) -> DriverConfig {
    DriverConfig::builder()
        .default_partition(toml.default_partition)
        .max_line_length(toml.max_line_length)
        .build()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=ad2driver=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt()
            .without_time()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay_ms = config.monitor.reconnect_delay_ms * (1u64 << (attempt - 1).min(4));
            warn!(
                "Reconnecting in {:.1}s (attempt {attempt})...",
                delay_ms as f64 / 1000.0
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = tokio::signal::ctrl_c() => break,
                _ = sigterm.recv() => break,
            }
        }
        attempt += 1;

        let address = format!("{}:{}", config.device.host, config.device.port);
        info!("Connecting to {address}");
        let mut stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Connection to {address} failed: {e}");
                continue;
            }
        };
        info!("Connected");
        attempt = 1;

        let mut driver = Ad2Driver::new(build_driver_config(&config.device));
        driver.register(|event| {
            let json = serde_json::to_string(event)?;
            println!("{json}");
            Ok(())
        });

        // Log out-of-band conditions beside the event stream.
        let mut diagnostics = driver.subscribe_diagnostics();
        let diag_handle = tokio::spawn(async move {
            loop {
                match diagnostics.recv().await {
                    Ok(Diagnostic::MalformedLine { raw, reason }) => {
                        warn!(%raw, %reason, "malformed line");
                    }
                    Ok(Diagnostic::FrameOverflow { max, actual }) => {
                        error!(max, actual, "line buffer overflow");
                    }
                    Ok(Diagnostic::ListenerFailure { error, .. }) => {
                        warn!(%error, "listener failed");
                    }
                    Ok(Diagnostic::UnknownLine { raw }) => {
                        debug!(%raw, "unrecognized line");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Diagnostics receiver lagged, missed {n} entries");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if config.monitor.probe_on_connect {
            for request in [CommandRequest::RequestVersion, CommandRequest::ConfigRead] {
                let bytes = driver.submit(&request)?;
                if let Err(e) = stream.write_all(&bytes).await {
                    error!("Failed to send {} probe: {e}", request.label());
                    break;
                }
            }
        }

        let mut buf = [0u8; 4096];
        let shutdown = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down...");
                    break true;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break true;
                }
                read = stream.read(&mut buf) => match read {
                    Ok(0) => {
                        warn!("Device closed the connection");
                        break false;
                    }
                    Ok(n) => {
                        if let Err(e) = driver.feed(&buf[..n]) {
                            error!("Protocol failure, resetting connection: {e}");
                            break false;
                        }
                    }
                    Err(e) => {
                        error!("Read failed: {e}");
                        break false;
                    }
                },
            }
        };

        diag_handle.abort();
        if shutdown {
            break;
        }
    }

    info!("Shutdown complete");
    Ok(())
}
