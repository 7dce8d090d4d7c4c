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

//! Sensor descriptions published for each charger.

use std::fmt;

use crate::registers::{IDENTITY_REGISTERS, MEASUREMENT_REGISTERS, Register};

pub const KEY_INSTANT_POWER: &str = "instant_power";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Energy,
    Power,
    Voltage,
    Temperature,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Energy => "energy",
            DeviceClass::Power => "power",
            DeviceClass::Voltage => "voltage",
            DeviceClass::Temperature => "temperature",
        };
        f.write_str(name)
    }
}

impl fmt::Display for StateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateClass::Measurement => "measurement",
            StateClass::TotalIncreasing => "total_increasing",
        };
        f.write_str(name)
    }
}

/// Classes implied by a unit of measurement
pub fn classify(unit: &str) -> (Option<DeviceClass>, StateClass) {
    match unit.to_lowercase().as_str() {
        "kwh" => (Some(DeviceClass::Energy), StateClass::TotalIncreasing),
        "kw" => (Some(DeviceClass::Power), StateClass::Measurement),
        "v" => (Some(DeviceClass::Voltage), StateClass::Measurement),
        "°c" | "c" => (Some(DeviceClass::Temperature), StateClass::Measurement),
        _ => (None, StateClass::Measurement),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorEntity {
    pub key: &'static str,
    pub unique_id: String,
    pub name: String,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
}

impl SensorEntity {
    fn new(device_id: &str, key: &'static str, name: &str, unit: &'static str, numeric: bool) -> Self {
        let (device_class, state_class) = if numeric {
            let (device_class, state_class) = classify(unit);
            (device_class, Some(state_class))
        } else {
            (None, None)
        };
        Self {
            key,
            unique_id: format!("{device_id}_{key}"),
            name: format!("Charger {name}"),
            unit: (numeric && !unit.is_empty()).then_some(unit),
            device_class,
            state_class,
        }
    }

    fn from_register(device_id: &str, register: &Register) -> Self {
        Self::new(
            device_id,
            register.key,
            register.name,
            register.unit,
            register.kind.is_numeric(),
        )
    }
}

/// Identifier of the device record for a charger
pub fn device_id(host: &str, slave_id: u8) -> String {
    format!("{host}_{slave_id}")
}

/// All sensors of one charger: one per register plus the derived power.
pub fn sensor_entities(host: &str, slave_id: u8) -> Vec<SensorEntity> {
    let device_id = device_id(host, slave_id);
    IDENTITY_REGISTERS
        .iter()
        .chain(MEASUREMENT_REGISTERS.iter())
        .map(|register| SensorEntity::from_register(&device_id, register))
        .chain(std::iter::once(SensorEntity::new(
            &device_id,
            KEY_INSTANT_POWER,
            "Instant power",
            "kW",
            true,
        )))
        .collect()
}
