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

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;

use crate::error::CommunicationError;
use crate::power::EnergySample;
use crate::registers::{self, KEY_TOTAL_ENERGY, Register, Value};
use crate::transport::Transport;

/// Result of one read pass over a charger.
///
/// Every polled register has an entry; it is `None` if the words read could
/// not be decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterSnapshot {
    pub slave_id: u8,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<&'static str, Option<Value>>,
}

impl RegisterSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn total_energy(&self) -> Option<f64> {
        self.float(KEY_TOTAL_ENERGY)
    }

    pub fn energy_sample(&self) -> Option<EnergySample> {
        self.total_energy().map(|total_energy| EnergySample {
            total_energy,
            timestamp: self.timestamp,
        })
    }
}

/// Read every register in `map` from `slave_id`.
///
/// Any failed read fails the whole pass.
pub async fn poll<T: Transport + ?Sized>(
    transport: &mut T,
    slave_id: u8,
    map: &[Register],
    timestamp: DateTime<Utc>,
) -> Result<RegisterSnapshot, CommunicationError> {
    let mut values = BTreeMap::new();
    for register in map {
        let words = transport
            .read_holding_registers(slave_id, register.address, register.kind.words())
            .await?;
        let value = match registers::decode(register, &words) {
            Ok(value) => {
                debug!("Charger {slave_id}: {} = {value}", register.name);
                Some(value)
            }
            Err(err) => {
                warn!("Charger {slave_id}: cannot decode {}: {err}", register.name);
                None
            }
        };
        values.insert(register.key, value);
    }
    Ok(RegisterSnapshot {
        slave_id,
        timestamp,
        values,
    })
}
