/* Copyright 2025 Bruce Merry
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

//! Per-EMMA state: discovered chargers and the energy history used to
//! derive power.

use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::config::DiscoveryConfig;
use crate::device::{ChargerDevice, read_device_info};
use crate::discovery::discover;
use crate::error::{CommunicationError, DiscoveryError};
use crate::monitoring::{ChargerUpdate, Reading};
use crate::poller::{RegisterSnapshot, poll};
use crate::power::{EnergySample, estimate};
use crate::registers::MEASUREMENT_REGISTERS;
use crate::transport::Transport;

/// Consecutive failed cycles a charger may miss before its last energy
/// sample is discarded.
const MAX_MISSED_CYCLES: u32 = 1;

#[derive(Default)]
struct History {
    last: Option<EnergySample>,
    missed: u32,
}

pub struct Coordinator<T> {
    host: String,
    emma_slave: u8,
    discovery: DiscoveryConfig,
    transport: T,
    devices: BTreeMap<u8, ChargerDevice>,
    history: HashMap<u8, History>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(host: &str, emma_slave: u8, discovery: DiscoveryConfig, transport: T) -> Self {
        Self {
            host: host.to_owned(),
            emma_slave,
            discovery,
            transport,
            devices: BTreeMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn devices(&self) -> impl Iterator<Item = &ChargerDevice> {
        self.devices.values()
    }

    /// Discover chargers and read their identity.
    ///
    /// Replaces any previously discovered devices. Energy history is kept for
    /// chargers that are still present.
    pub async fn setup(&mut self) -> Result<(), DiscoveryError> {
        let slaves = discover(&mut self.transport, self.emma_slave, &self.discovery).await?;
        let mut devices = BTreeMap::new();
        for slave_id in slaves {
            let device = read_device_info(&mut self.transport, slave_id).await?;
            info!(
                "{}: charger {} is {} ({})",
                self.host, slave_id, device.offering_name, device.esn
            );
            devices.insert(slave_id, device);
        }
        self.history.retain(|slave_id, _| devices.contains_key(slave_id));
        self.devices = devices;
        Ok(())
    }

    /// Run one poll cycle over all chargers.
    ///
    /// Chargers that fail to respond are reported as unavailable. If the
    /// connection to the EMMA itself fails, the cycle is abandoned: the error
    /// is returned and no history is updated except to count the miss.
    pub async fn refresh_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChargerUpdate>, CommunicationError> {
        let slaves: Vec<u8> = self.devices.keys().copied().collect();
        let mut results: Vec<(u8, Option<RegisterSnapshot>)> = Vec::with_capacity(slaves.len());
        for slave_id in slaves {
            match poll(&mut self.transport, slave_id, &MEASUREMENT_REGISTERS, now).await {
                Ok(snapshot) => results.push((slave_id, Some(snapshot))),
                Err(err) if err.is_connection_level() => {
                    warn!("{}: poll cycle abandoned: {err}", self.host);
                    self.record_all_missed();
                    return Err(err);
                }
                Err(err) => {
                    warn!("{}: charger {slave_id} unavailable: {err}", self.host);
                    results.push((slave_id, None));
                }
            }
        }
        Ok(results
            .into_iter()
            .map(|(slave_id, snapshot)| self.commit(slave_id, now, snapshot))
            .collect())
    }

    /// Updates marking every charger unavailable, for use when a cycle could
    /// not run at all.
    pub fn unavailable(&self, now: DateTime<Utc>) -> Vec<ChargerUpdate> {
        self.devices
            .keys()
            .map(|&slave_id| ChargerUpdate {
                slave_id,
                time: now,
                reading: None,
            })
            .collect()
    }

    fn record_all_missed(&mut self) {
        for &slave_id in self.devices.keys() {
            Self::record_missed(self.history.entry(slave_id).or_default());
        }
    }

    fn record_missed(history: &mut History) {
        history.missed += 1;
        if history.missed > MAX_MISSED_CYCLES {
            history.last = None;
        }
    }

    fn commit(
        &mut self,
        slave_id: u8,
        now: DateTime<Utc>,
        snapshot: Option<RegisterSnapshot>,
    ) -> ChargerUpdate {
        let history = self.history.entry(slave_id).or_default();
        let reading = match snapshot {
            None => {
                Self::record_missed(history);
                None
            }
            Some(snapshot) => {
                history.missed = 0;
                let instant_power_kw = snapshot.energy_sample().map(|sample| {
                    let power = estimate(history.last.as_ref(), &sample);
                    history.last = Some(sample);
                    power
                });
                Some(Reading {
                    snapshot,
                    instant_power_kw,
                })
            }
        };
        ChargerUpdate {
            slave_id,
            time: now,
            reading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryMethod;
    use crate::mock::{Fault, MockTransport};
    use chrono::{Duration, TimeZone};

    fn charger(transport: &mut MockTransport, slave: u8, energy_wh: u32) {
        transport.set_string(slave, 30000, 15, "SCharger-22KT-S0");
        transport.set_string(slave, 30015, 16, &format!("ESN{slave}"));
        transport.set_string(slave, 30031, 16, "V100R001C10");
        transport.set_u32(slave, 30076, 220);
        transport.set_string(slave, 30078, 14, "SCharger-22KT");
        transport.set_string(slave, 30094, 16, "BT");
        for addr in [30500, 30502, 30504] {
            transport.set_u32(slave, addr, 2300);
        }
        transport.set_u32(slave, 30506, energy_wh);
        transport.set_u32(slave, 30508, 250);
    }

    async fn coordinator(transport: MockTransport) -> Coordinator<MockTransport> {
        let discovery = DiscoveryConfig {
            method: DiscoveryMethod::Scan,
            first_slave: 1,
            last_slave: 3,
            ..Default::default()
        };
        let mut coordinator = Coordinator::new("emma", 0, discovery, transport);
        coordinator.setup().await.unwrap();
        coordinator
    }

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn power(updates: &[ChargerUpdate], slave_id: u8) -> Option<f64> {
        updates
            .iter()
            .find(|u| u.slave_id == slave_id)
            .and_then(|u| u.reading.as_ref())
            .and_then(|r| r.instant_power_kw)
    }

    #[tokio::test]
    async fn setup_finds_chargers() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 0);
        charger(&mut transport, 3, 0);
        let coordinator = coordinator(transport).await;
        let ids: Vec<u8> = coordinator.devices().map(|d| d.slave_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(coordinator.devices().all(|d| d.rated_power_kw == 22.0));
        assert_eq!(coordinator.host(), "emma");
    }

    #[tokio::test]
    async fn setup_fails_when_unreachable() {
        let mut transport = MockTransport::new();
        transport.set_fault(1, Some(Fault::Disconnected));
        let mut coordinator = Coordinator::new(
            "emma",
            0,
            DiscoveryConfig {
                method: DiscoveryMethod::Scan,
                ..Default::default()
            },
            transport,
        );
        assert!(coordinator.setup().await.is_err());
    }

    #[tokio::test]
    async fn setup_fails_when_nothing_answers() {
        let mut transport = MockTransport::new();
        for slave in 1..=3 {
            transport.set_fault(slave, Some(Fault::Timeout));
        }
        let discovery = DiscoveryConfig {
            method: DiscoveryMethod::Scan,
            first_slave: 1,
            last_slave: 3,
            ..Default::default()
        };
        let mut coordinator = Coordinator::new("emma", 0, discovery, transport);
        assert!(matches!(
            coordinator.setup().await,
            Err(DiscoveryError::Communication(CommunicationError::Timeout(_)))
        ));
        assert_eq!(coordinator.devices().count(), 0);
    }

    #[tokio::test]
    async fn power_from_consecutive_polls() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        let mut coordinator = coordinator(transport).await;

        let updates = coordinator.refresh_at(t(0)).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(power(&updates, 1), Some(0.0));

        coordinator.transport.set_u32(1, 30506, 10_500);
        let updates = coordinator.refresh_at(t(1800)).await.unwrap();
        assert_eq!(power(&updates, 1), Some(1.0));
        let reading = updates[0].reading.as_ref().unwrap();
        assert_eq!(reading.snapshot.total_energy(), Some(10.5));
    }

    #[tokio::test]
    async fn one_missed_cycle_keeps_history() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();

        coordinator.transport.set_fault(1, Some(Fault::Exception));
        let updates = coordinator.refresh_at(t(900)).await.unwrap();
        assert_eq!(updates[0].reading, None);

        coordinator.transport.set_fault(1, None);
        coordinator.transport.set_u32(1, 30506, 10_500);
        let updates = coordinator.refresh_at(t(1800)).await.unwrap();
        assert_eq!(power(&updates, 1), Some(1.0));
    }

    #[tokio::test]
    async fn stale_history_is_dropped() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();

        coordinator.transport.set_fault(1, Some(Fault::Timeout));
        coordinator.refresh_at(t(30)).await.unwrap();
        coordinator.refresh_at(t(60)).await.unwrap();

        coordinator.transport.set_fault(1, None);
        coordinator.transport.set_u32(1, 30506, 20_000);
        let updates = coordinator.refresh_at(t(90)).await.unwrap();
        assert_eq!(power(&updates, 1), Some(0.0));
    }

    #[tokio::test]
    async fn failed_slave_is_isolated() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        charger(&mut transport, 2, 20_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();

        coordinator.transport.set_register_fault(1, 30508, Fault::Exception);
        coordinator.transport.set_u32(2, 30506, 20_100);
        let updates = coordinator.refresh_at(t(360)).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].slave_id, 1);
        assert_eq!(updates[0].reading, None);
        // 0.1 kWh in 6 minutes
        let p = power(&updates, 2).unwrap();
        assert!((p - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn connection_failure_abandons_cycle() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        charger(&mut transport, 2, 20_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();

        // Slave 1 polls fine but slave 2 hits a dead connection: nothing from
        // the cycle may be committed.
        coordinator.transport.set_u32(1, 30506, 10_500);
        coordinator.transport.set_fault(2, Some(Fault::Disconnected));
        assert!(coordinator.refresh_at(t(900)).await.is_err());
        assert_eq!(coordinator.unavailable(t(900)).len(), 2);

        coordinator.transport.set_fault(2, None);
        let updates = coordinator.refresh_at(t(1800)).await.unwrap();
        assert_eq!(power(&updates, 1), Some(1.0));
        assert_eq!(power(&updates, 2), Some(0.0));
    }

    #[tokio::test]
    async fn repeated_timestamp() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();

        coordinator.transport.set_u32(1, 30506, 10_500);
        let updates = coordinator.refresh_at(t(0)).await.unwrap();
        assert_eq!(power(&updates, 1), Some(0.0));
        assert_eq!(coordinator.history[&1].last.unwrap().total_energy, 10.5);
    }

    #[tokio::test]
    async fn undecodable_energy_keeps_history() {
        let mut transport = MockTransport::new();
        charger(&mut transport, 1, 10_000);
        let mut coordinator = coordinator(transport).await;
        coordinator.refresh_at(t(0)).await.unwrap();
        let before = coordinator.history[&1].last;

        coordinator.transport.set_short_read(1, 30506);
        let updates = coordinator.refresh_at(t(30)).await.unwrap();
        let reading = updates[0].reading.as_ref().unwrap();
        assert_eq!(reading.instant_power_kw, None);
        assert_eq!(coordinator.history[&1].last, before);
    }
}
