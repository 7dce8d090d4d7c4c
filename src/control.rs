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

use chrono::Utc;
use log::{info, warn};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EmmaConfig;
use crate::coordinator::Coordinator;
use crate::entity::sensor_entities;
use crate::monitoring::{ChargerUpdate, Monitor};
use crate::transport::{ModbusTransport, Transport};

/// Sleep for `duration`, returning false if cancelled first.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Connect to the EMMA described by `config`, retrying until it succeeds or
/// `token` is cancelled.
pub async fn connect(
    config: &EmmaConfig,
    token: &CancellationToken,
) -> Option<Coordinator<ModbusTransport>> {
    loop {
        match ModbusTransport::new(&config.host, config.port, config.timeout).await {
            Ok(transport) => {
                return Some(Coordinator::new(
                    &config.host,
                    config.slave_id,
                    config.discovery.clone(),
                    transport,
                ));
            }
            Err(err) => {
                warn!("{}: {err}", config.host);
                if !sleep_or_cancel(config.scan_interval, token).await {
                    return None;
                }
            }
        }
    }
}

/// Run discovery, retrying after `retry` until it succeeds. Returns false if
/// cancelled.
pub async fn setup<T: Transport>(
    coordinator: &mut Coordinator<T>,
    retry: Duration,
    token: &CancellationToken,
) -> bool {
    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            result = coordinator.setup() => result,
        };
        match result {
            Ok(()) => return true,
            Err(err) => {
                warn!(
                    "{}: setup failed, retrying in {:?}: {err}",
                    coordinator.host(),
                    retry
                );
                if !sleep_or_cancel(retry, token).await {
                    return false;
                }
            }
        }
    }
}

async fn publish(monitor: &mut dyn Monitor, host: &str, updates: &[ChargerUpdate]) {
    for update in updates {
        if let Err(err) = monitor.update(host, update).await {
            warn!("{host}: failed to publish charger {}: {err}", update.slave_id);
        }
    }
}

/// Set up the chargers behind one EMMA and poll them every `scan_interval`
/// until `token` is cancelled.
pub async fn poll_chargers<T: Transport>(
    mut coordinator: Coordinator<T>,
    monitor: &mut dyn Monitor,
    scan_interval: Duration,
    token: CancellationToken,
) {
    if !setup(&mut coordinator, scan_interval, &token).await {
        return;
    }
    let host = coordinator.host().to_owned();
    for device in coordinator.devices() {
        let entities = sensor_entities(&host, device.slave_id);
        if let Err(err) = monitor.register_device(&host, device, &entities).await {
            warn!("{host}: failed to register charger {}: {err}", device.slave_id);
        }
    }

    let mut interval = tokio::time::interval(scan_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {},
        };
        let now = Utc::now();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = coordinator.refresh_at(now) => result,
        };
        let updates = match result {
            Ok(updates) => updates,
            Err(err) => {
                warn!("{host}: EMMA unavailable: {err}");
                coordinator.unavailable(now)
            }
        };
        publish(monitor, &host, &updates).await;
    }
    info!("{host}: stopped polling");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, DiscoveryMethod};
    use crate::device::ChargerDevice;
    use crate::entity::SensorEntity;
    use crate::mock::MockTransport;
    use crate::monitoring;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingMonitor {
        devices: Vec<(ChargerDevice, usize)>,
        updates: Vec<ChargerUpdate>,
        token: CancellationToken,
    }

    #[async_trait]
    impl Monitor for RecordingMonitor {
        async fn register_device(
            &mut self,
            _host: &str,
            device: &ChargerDevice,
            entities: &[SensorEntity],
        ) -> monitoring::Result<()> {
            self.devices.push((device.clone(), entities.len()));
            Ok(())
        }

        async fn update(&mut self, _host: &str, update: &ChargerUpdate) -> monitoring::Result<()> {
            self.updates.push(update.clone());
            if self.updates.len() >= 2 {
                self.token.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn polls_until_cancelled() {
        let mut transport = MockTransport::new();
        transport.set_string(4, 30000, 15, "SCharger-7KS-S0");
        let discovery = DiscoveryConfig {
            method: DiscoveryMethod::Scan,
            first_slave: 4,
            last_slave: 4,
            ..Default::default()
        };
        let coordinator = Coordinator::new("emma", 0, discovery, transport);
        let token = CancellationToken::new();
        let mut monitor = RecordingMonitor {
            token: token.clone(),
            ..Default::default()
        };
        poll_chargers(coordinator, &mut monitor, Duration::from_millis(10), token).await;

        assert_eq!(monitor.devices.len(), 1);
        assert_eq!(monitor.devices[0].0.offering_name, "SCharger-7KS-S0");
        assert_eq!(monitor.devices[0].1, 12);
        assert_eq!(monitor.updates.len(), 2);
        // The other measurement registers are missing, so the charger
        // cannot be polled.
        assert!(monitor.updates.iter().all(|u| u.reading.is_none()));
    }

    #[tokio::test]
    async fn cancelled_during_setup() {
        let mut transport = MockTransport::new();
        transport.set_fault(0, Some(crate::mock::Fault::Timeout));
        let coordinator = Coordinator::new("emma", 0, DiscoveryConfig::default(), transport);
        let token = CancellationToken::new();
        let mut monitor = RecordingMonitor::default();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        poll_chargers(coordinator, &mut monitor, Duration::from_millis(5), token).await;
        assert!(monitor.devices.is_empty());
        assert!(monitor.updates.is_empty());
    }
}
