/* Copyright 2023-2025 Bruce Merry
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
 * FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
 * more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use emma_charger::config::Config;
use emma_charger::control;
use emma_charger::coordinator::Coordinator;
use emma_charger::influxdb2::Influxdb2Monitor;
use emma_charger::monitoring::{LogMonitor, Monitor};
use emma_charger::transport::ModbusTransport;

#[derive(Parser)]
#[clap(author, version)]
struct Args {
    #[clap()]
    config_file: PathBuf,
    /// Discover the chargers of each EMMA, print them and exit
    #[clap(long)]
    discover: bool,
}

#[cfg(unix)]
async fn wait_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    };
    Ok(())
}

#[cfg(not(unix))]
async fn wait_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn make_monitor(config: &Config) -> Box<dyn Monitor> {
    match &config.influxdb2 {
        Some(conf) => Box::new(Influxdb2Monitor::new(conf).await),
        None => Box::new(LogMonitor {}),
    }
}

async fn discover(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    for emma in &config.emma {
        let transport = ModbusTransport::new(&emma.host, emma.port, emma.timeout).await?;
        let mut coordinator =
            Coordinator::new(&emma.host, emma.slave_id, emma.discovery.clone(), transport);
        coordinator.setup().await?;
        println!("{}:{}", emma.host, emma.port);
        for device in coordinator.devices() {
            println!(
                "  slave {}: {} model={} esn={} software={} bluetooth={} rated={} kW",
                device.slave_id,
                device.offering_name,
                device.charger_model,
                device.esn,
                device.software_version,
                device.bluetooth_name,
                device.rated_power_kw
            );
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config: Config = toml::from_str(&std::fs::read_to_string(args.config_file)?)?;
    config.validate()?;

    if args.discover {
        return discover(&config).await;
    }

    let token = CancellationToken::new();
    let mut handles = Vec::new();
    for emma in config.emma.iter().cloned() {
        let mut monitor = make_monitor(&config).await;
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            info!("Polling EMMA at {}:{}", emma.host, emma.port);
            if let Some(coordinator) = control::connect(&emma, &token).await {
                control::poll_chargers(coordinator, monitor.as_mut(), emma.scan_interval, token)
                    .await;
            }
        }));
    }

    wait_shutdown().await?;
    token.cancel();
    for handle in handles {
        handle.await?;
    }
    Ok(())
}
