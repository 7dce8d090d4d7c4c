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

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{host}: scan_interval must be positive")]
    ZeroScanInterval { host: String },
    #[error("{host}: first_slave {first} is after last_slave {last}")]
    EmptySlaveRange { host: String, first: u8, last: u8 },
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    /// Ask the EMMA for its list of sub-devices
    #[default]
    DeviceList,
    /// Probe each slave ID in a range
    Scan,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub method: DiscoveryMethod,
    #[serde(default = "first_slave_default")]
    pub first_slave: u8,
    #[serde(default = "last_slave_default")]
    pub last_slave: u8,
    #[serde(default = "charger_pattern_default")]
    pub charger_pattern: String,
}

fn first_slave_default() -> u8 {
    1
}

fn last_slave_default() -> u8 {
    32
}

fn charger_pattern_default() -> String {
    "CHARGER".to_owned()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::default(),
            first_slave: first_slave_default(),
            last_slave: last_slave_default(),
            charger_pattern: charger_pattern_default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmmaConfig {
    pub host: String,
    #[serde(default = "port_default")]
    pub port: u16,
    /// Modbus address of the EMMA itself
    #[serde(default)]
    pub slave_id: u8,
    #[serde(default = "scan_interval_default", with = "humantime_serde")]
    pub scan_interval: Duration,
    #[serde(default = "timeout_default", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn port_default() -> u16 {
    502
}

fn scan_interval_default() -> Duration {
    Duration::from_secs(30)
}

fn timeout_default() -> Duration {
    Duration::from_secs(3)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Influxdb2Config {
    pub host: String,
    pub org: String,
    pub token: String,
    pub bucket: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub emma: Vec<EmmaConfig>,
    pub influxdb2: Option<Influxdb2Config>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for emma in &self.emma {
            if emma.scan_interval.is_zero() {
                return Err(ConfigError::ZeroScanInterval {
                    host: emma.host.clone(),
                });
            }
            let discovery = &emma.discovery;
            if discovery.method == DiscoveryMethod::Scan && discovery.first_slave > discovery.last_slave {
                return Err(ConfigError::EmptySlaveRange {
                    host: emma.host.clone(),
                    first: discovery.first_slave,
                    last: discovery.last_slave,
                });
            }
        }
        Ok(())
    }
}
