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
use influxdb2::Client;
use influxdb2::api::write::TimestampPrecision;
use influxdb2::models::health::Status;
use influxdb2::models::{DataPoint, FieldValue};
use log::{info, warn};

use crate::config::Influxdb2Config;
use crate::device::ChargerDevice;
use crate::entity::{KEY_INSTANT_POWER, SensorEntity, device_id};
use crate::monitoring::{ChargerUpdate, Monitor, Result};
use crate::registers::{IDENTITY_REGISTERS, Value};

pub struct Influxdb2Monitor {
    client: Client,
    bucket: String,
}

impl Influxdb2Monitor {
    pub async fn new(config: &Influxdb2Config) -> Self {
        let client = Client::new(&config.host, &config.org, &config.token);
        match client.health().await {
            Ok(health_check) => {
                if health_check.status == Status::Fail {
                    match health_check.message {
                        Some(ref message) => {
                            warn!("Influxdb server is unhealthy: {}", message);
                        }
                        None => {
                            warn!("Influxdb server is unhealthy");
                        }
                    }
                } else {
                    info!(
                        "Successfully connected to Influxdb server at {}",
                        &config.host
                    );
                }
            }
            Err(err) => {
                warn!("Could not connect to Influxdb server: {}", err);
            }
        }
        Self {
            client,
            bucket: config.bucket.to_owned(),
        }
    }

    async fn write(&self, point: DataPoint) -> Result<()> {
        let strm = futures::stream::once(async { point });
        self.client
            .write_with_precision(&self.bucket, strm, TimestampPrecision::Seconds)
            .await?;
        Ok(())
    }
}

fn field_value(value: &Value) -> FieldValue {
    match value {
        Value::Float(x) => (*x).into(),
        Value::Integer(x) => i64::from(*x).into(),
        Value::Text(s) => s.clone().into(),
    }
}

/// Identity of a charger, written once at registration.
fn device_point(host: &str, device: &ChargerDevice, timestamp: i64) -> Result<DataPoint> {
    let mut builder = DataPoint::builder("emma_charger_info")
        .tag("device", device_id(host, device.slave_id))
        .tag("host", host)
        .tag("slave_id", device.slave_id.to_string())
        .timestamp(timestamp);
    for register in IDENTITY_REGISTERS.iter() {
        if let Some(value) = device.value(register.key) {
            builder = builder.field(register.key, field_value(&value));
        }
    }
    Ok(builder.build()?)
}

/// One poll result. An unavailable charger only gets `available=false`.
fn update_point(host: &str, update: &ChargerUpdate) -> Result<DataPoint> {
    let mut builder = DataPoint::builder("emma_charger")
        .tag("device", device_id(host, update.slave_id))
        .tag("host", host)
        .tag("slave_id", update.slave_id.to_string())
        .timestamp(update.time.timestamp())
        .field("available", update.reading.is_some());
    if let Some(reading) = &update.reading {
        for (key, value) in &reading.snapshot.values {
            if let Some(value) = value {
                builder = builder.field(*key, field_value(value));
            }
        }
        if let Some(power) = reading.instant_power_kw {
            builder = builder.field(KEY_INSTANT_POWER, power);
        }
    }
    Ok(builder.build()?)
}

#[async_trait]
impl Monitor for Influxdb2Monitor {
    async fn register_device(
        &mut self,
        host: &str,
        device: &ChargerDevice,
        _entities: &[SensorEntity],
    ) -> Result<()> {
        let point = device_point(host, device, chrono::Utc::now().timestamp())?;
        self.write(point).await
    }

    async fn update(&mut self, host: &str, update: &ChargerUpdate) -> Result<()> {
        self.write(update_point(host, update)?).await
    }
}
