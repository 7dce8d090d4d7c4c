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

use log::{debug, warn};

use crate::error::CommunicationError;
use crate::registers::{self, IDENTITY_REGISTERS, Value};
use crate::transport::Transport;

/// A charger found behind an EMMA.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChargerDevice {
    pub slave_id: u8,
    pub offering_name: String,
    pub esn: String,
    pub software_version: String,
    pub charger_model: String,
    pub bluetooth_name: String,
    pub rated_power_kw: f64,
}

impl ChargerDevice {
    pub fn new(slave_id: u8) -> Self {
        Self {
            slave_id,
            ..Default::default()
        }
    }

    fn set(&mut self, key: &str, value: Value) {
        let text = |value: Value| match value {
            Value::Text(s) => s,
            other => other.to_string(),
        };
        match key {
            registers::KEY_OFFERING_NAME => self.offering_name = text(value),
            registers::KEY_ESN => self.esn = text(value),
            registers::KEY_SOFTWARE_VERSION => self.software_version = text(value),
            registers::KEY_CHARGER_MODEL => self.charger_model = text(value),
            registers::KEY_BLUETOOTH_NAME => self.bluetooth_name = text(value),
            registers::KEY_RATED_POWER => self.rated_power_kw = value.as_f64().unwrap_or_default(),
            _ => {}
        }
    }

    /// Value of an identity register, for publishing as a sensor
    pub fn value(&self, key: &str) -> Option<Value> {
        let text = |s: &str| Some(Value::Text(s.to_owned()));
        match key {
            registers::KEY_OFFERING_NAME => text(&self.offering_name),
            registers::KEY_ESN => text(&self.esn),
            registers::KEY_SOFTWARE_VERSION => text(&self.software_version),
            registers::KEY_CHARGER_MODEL => text(&self.charger_model),
            registers::KEY_BLUETOOTH_NAME => text(&self.bluetooth_name),
            registers::KEY_RATED_POWER => Some(Value::Float(self.rated_power_kw)),
            _ => None,
        }
    }
}

/// Read the identity registers of the charger at `slave_id`.
///
/// Registers that cannot be read or decoded are left empty. Only a failure
/// of the connection is returned as an error.
pub async fn read_device_info<T: Transport + ?Sized>(
    transport: &mut T,
    slave_id: u8,
) -> Result<ChargerDevice, CommunicationError> {
    let mut device = ChargerDevice::new(slave_id);
    for register in IDENTITY_REGISTERS.iter() {
        let words = match transport
            .read_holding_registers(slave_id, register.address, register.kind.words())
            .await
        {
            Ok(words) => words,
            Err(err) if err.is_connection_level() => return Err(err),
            Err(err) => {
                warn!("Charger {slave_id}: cannot read {}: {err}", register.name);
                continue;
            }
        };
        match registers::decode(register, &words) {
            Ok(value) => {
                debug!("Charger {slave_id}: {} = {value}", register.name);
                device.set(register.key, value);
            }
            Err(err) => warn!("Charger {slave_id}: cannot decode {}: {err}", register.name),
        }
    }
    Ok(device)
}
