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

//! Register map of a charger attached to a Huawei EMMA.

use std::fmt;

use crate::error::DecodeError;

pub const KEY_OFFERING_NAME: &str = "offering_name";
pub const KEY_ESN: &str = "esn";
pub const KEY_SOFTWARE_VERSION: &str = "software_version";
pub const KEY_RATED_POWER: &str = "rated_power";
pub const KEY_CHARGER_MODEL: &str = "charger_model";
pub const KEY_BLUETOOTH_NAME: &str = "bluetooth_name";
pub const KEY_PHASE_A_VOLTAGE: &str = "phase_a_voltage";
pub const KEY_PHASE_B_VOLTAGE: &str = "phase_b_voltage";
pub const KEY_PHASE_C_VOLTAGE: &str = "phase_c_voltage";
pub const KEY_TOTAL_ENERGY: &str = "total_energy";
pub const KEY_CHARGER_TEMP: &str = "charger_temp";

/// Raw integer layout underneath a scaled value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawInt {
    U16,
    U32,
    I32,
}

impl RawInt {
    fn words(self) -> u16 {
        match self {
            RawInt::U16 => 1,
            RawInt::U32 | RawInt::I32 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegisterKind {
    /// ASCII text, NUL padded, occupying the given number of words
    String(u16),
    U16,
    U32,
    /// Integer divided by a fixed gain
    Scaled { raw: RawInt, divisor: f64 },
}

impl RegisterKind {
    pub fn words(&self) -> u16 {
        match self {
            RegisterKind::String(words) => *words,
            RegisterKind::U16 => 1,
            RegisterKind::U32 => 2,
            RegisterKind::Scaled { raw, .. } => raw.words(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, RegisterKind::String(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Register {
    pub key: &'static str,
    pub name: &'static str,
    pub address: u16,
    pub kind: RegisterKind,
    pub unit: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Integer(u32),
    Float(f64),
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Text(_) => None,
            Value::Integer(x) => Some(*x as f64),
            Value::Float(x) => Some(*x),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Integer(x) => write!(f, "{x}"),
            Value::Float(x) => write!(f, "{x}"),
        }
    }
}

const fn scaled(
    key: &'static str,
    name: &'static str,
    address: u16,
    raw: RawInt,
    divisor: f64,
    unit: &'static str,
) -> Register {
    Register {
        key,
        name,
        address,
        kind: RegisterKind::Scaled { raw, divisor },
        unit,
    }
}

const fn string(key: &'static str, name: &'static str, address: u16, words: u16) -> Register {
    Register {
        key,
        name,
        address,
        kind: RegisterKind::String(words),
        unit: "",
    }
}

/// Product name of the device; also used to recognise chargers
pub const OFFERING_NAME: Register = string(KEY_OFFERING_NAME, "Offering name", 30000, 15);

/// Registers describing the charger itself. They are read once at setup.
pub static IDENTITY_REGISTERS: [Register; 6] = [
    OFFERING_NAME,
    string(KEY_ESN, "ESN", 30015, 16),
    string(KEY_SOFTWARE_VERSION, "Software version", 30031, 16),
    scaled(KEY_RATED_POWER, "Rated power", 30076, RawInt::U32, 10.0, "kW"),
    string(KEY_CHARGER_MODEL, "Charger model", 30078, 14),
    string(KEY_BLUETOOTH_NAME, "Bluetooth name", 30094, 16),
];

/// Registers read on every poll.
pub static MEASUREMENT_REGISTERS: [Register; 5] = [
    scaled(KEY_PHASE_A_VOLTAGE, "Phase A voltage", 30500, RawInt::U32, 10.0, "V"),
    scaled(KEY_PHASE_B_VOLTAGE, "Phase B voltage", 30502, RawInt::U32, 10.0, "V"),
    scaled(KEY_PHASE_C_VOLTAGE, "Phase C voltage", 30504, RawInt::U32, 10.0, "V"),
    scaled(KEY_TOTAL_ENERGY, "Total energy", 30506, RawInt::U32, 1000.0, "kWh"),
    scaled(KEY_CHARGER_TEMP, "Charger temp.", 30508, RawInt::I32, 10.0, "°C"),
];

/// Decode ASCII text packed two characters per word, dropping NUL padding.
fn decode_string(words: &[u16]) -> Result<String, DecodeError> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let text = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidString)?;
    Ok(text.trim_end_matches('\0').trim_end().to_owned())
}

// Big-endian: high word first
fn join_u32(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

/// Decode the words read for `register`.
pub fn decode(register: &Register, words: &[u16]) -> Result<Value, DecodeError> {
    let expected = register.kind.words();
    if words.len() != usize::from(expected) {
        return Err(DecodeError::WordCount {
            expected,
            actual: words.len(),
        });
    }
    Ok(match register.kind {
        RegisterKind::String(_) => Value::Text(decode_string(words)?),
        RegisterKind::U16 => Value::Integer(u32::from(words[0])),
        RegisterKind::U32 => Value::Integer(join_u32(words)),
        RegisterKind::Scaled { raw, divisor } => {
            let raw = match raw {
                RawInt::U16 => f64::from(words[0]),
                RawInt::U32 => f64::from(join_u32(words)),
                RawInt::I32 => f64::from(join_u32(words) as i32),
            };
            Value::Float(raw / divisor)
        }
    })
}
