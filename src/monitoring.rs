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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::error::Error;

use crate::device::ChargerDevice;
use crate::entity::{KEY_INSTANT_POWER, SensorEntity};
use crate::poller::RegisterSnapshot;

pub type Result<T> = std::result::Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Clone, PartialEq, Debug)]
pub struct Reading {
    pub snapshot: RegisterSnapshot,
    /// None if the snapshot had no usable energy counter
    pub instant_power_kw: Option<f64>,
}

/// Outcome of one poll cycle for one charger
#[derive(Clone, PartialEq, Debug)]
pub struct ChargerUpdate {
    pub slave_id: u8,
    pub time: DateTime<Utc>,
    /// None when the charger is unavailable this cycle
    pub reading: Option<Reading>,
}

/// Receives devices and their sensor values.
#[async_trait]
pub trait Monitor: Send {
    async fn register_device(
        &mut self,
        host: &str,
        device: &ChargerDevice,
        entities: &[SensorEntity],
    ) -> Result<()>;

    async fn update(&mut self, host: &str, update: &ChargerUpdate) -> Result<()>;
}

/// Writes everything to the log.
pub struct LogMonitor;

#[async_trait]
impl Monitor for LogMonitor {
    async fn register_device(
        &mut self,
        host: &str,
        device: &ChargerDevice,
        entities: &[SensorEntity],
    ) -> Result<()> {
        info!(
            "{host}: charger {} ({}, ESN {}, software {}, {} kW)",
            device.slave_id,
            device.charger_model,
            device.esn,
            device.software_version,
            device.rated_power_kw
        );
        for entity in entities {
            let value = device
                .value(entity.key)
                .map(|v| format!(" = {v}"))
                .unwrap_or_default();
            info!(
                "{host}: charger {}: sensor {} [{}] unit={} class={}{value}",
                device.slave_id,
                entity.name,
                entity.unique_id,
                entity.unit.unwrap_or("-"),
                entity
                    .device_class
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_owned()),
            );
        }
        Ok(())
    }

    async fn update(&mut self, host: &str, update: &ChargerUpdate) -> Result<()> {
        match &update.reading {
            Some(reading) => {
                let values: Vec<String> = reading
                    .snapshot
                    .values
                    .iter()
                    .map(|(key, value)| match value {
                        Some(value) => format!("{key}={value}"),
                        None => format!("{key}=unavailable"),
                    })
                    .collect();
                let power = reading
                    .instant_power_kw
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_else(|| "unavailable".to_owned());
                info!(
                    "{host}: charger {}: {} {KEY_INSTANT_POWER}={power}",
                    update.slave_id,
                    values.join(" ")
                );
            }
            None => info!("{host}: charger {} unavailable", update.slave_id),
        }
        Ok(())
    }
}
