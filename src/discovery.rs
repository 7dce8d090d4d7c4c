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

//! Finding the chargers attached to an EMMA.
//!
//! The EMMA answers the "read device identification" request (function 0x2B,
//! MEI type 0x0E) with a vendor-specific object 0x87 that holds the number of
//! sub-devices, followed by one object per sub-device. Each of those is an
//! ASCII string of the form `1=EMMA-A02;2=V100R024;...;5=2;...;8=CHARGER`.
//! Attribute 5 is the Modbus slave ID and attribute 8 the device type.
//!
//! Alternatively, a range of slave IDs can be probed one by one by reading
//! the offering name register.

use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use crate::config::{DiscoveryConfig, DiscoveryMethod};
use crate::error::{CommunicationError, DiscoveryError};
use crate::registers;
use crate::transport::Transport;

const READ_CODE_SPECIFIC: u8 = 3;
const OBJECT_DEVICE_LIST: u8 = 0x87;
const ATTR_SLAVE_ID: u32 = 5;
const ATTR_DEVICE_TYPE: u32 = 8;

/// Decides whether a sub-device is a charger.
///
/// The device type from the device list must equal the pattern, while an
/// offering name read during a scan only has to contain it. Both tests are
/// case-insensitive, so the default pattern `CHARGER` matches the device type
/// `CHARGER` and offering names such as `SCharger-22KT-S0`.
#[derive(Clone, Debug)]
pub struct ChargerMatcher {
    pattern: String,
}

impl ChargerMatcher {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_uppercase(),
        }
    }

    pub fn matches_type(&self, device_type: &str) -> bool {
        device_type.trim().to_uppercase() == self.pattern
    }

    pub fn matches_name(&self, offering_name: &str) -> bool {
        offering_name.to_uppercase().contains(&self.pattern)
    }
}

/// Parse `1=EMMA-A02;2=V100R024;...` into attribute ID -> value.
///
/// Trailing NULs are ignored, as are pairs without `=` or with a
/// non-numeric key.
pub fn parse_device_description(raw: &[u8]) -> BTreeMap<u32, String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches('\0');
    let mut attrs = BTreeMap::new();
    for pair in text.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim().parse::<u32>() {
            Ok(key) => {
                attrs.insert(key, value.to_owned());
            }
            Err(_) => debug!("Unknown key {key} in device description: {value}"),
        }
    }
    attrs
}

/// Read the full device list from the EMMA at `slave`, following pages.
async fn read_device_list<T: Transport + ?Sized>(
    transport: &mut T,
    slave: u8,
) -> Result<BTreeMap<u8, Vec<u8>>, DiscoveryError> {
    let mut objects = BTreeMap::new();
    let mut object_id = OBJECT_DEVICE_LIST;
    loop {
        debug!("Reading device list from object {object_id:#04x}");
        let page = transport
            .read_device_identification(slave, READ_CODE_SPECIFIC, object_id)
            .await?;
        objects.extend(page.objects);
        if !page.more_follows {
            break;
        }
        // Guard against an EMMA that never stops paging
        if page.next_object_id <= object_id {
            return Err(DiscoveryError::MalformedDeviceList(format!(
                "next object {:#04x} does not advance past {object_id:#04x}",
                page.next_object_id
            )));
        }
        object_id = page.next_object_id;
    }
    Ok(objects)
}

/// Find chargers using the EMMA's device list.
pub async fn discover_device_list<T: Transport + ?Sized>(
    transport: &mut T,
    slave: u8,
    matcher: &ChargerMatcher,
) -> Result<BTreeSet<u8>, DiscoveryError> {
    let objects = read_device_list(transport, slave).await?;
    let count = objects
        .get(&OBJECT_DEVICE_LIST)
        .ok_or_else(|| DiscoveryError::MalformedDeviceList("no device count".to_owned()))?
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    info!("EMMA reports {count} devices");

    let mut chargers = BTreeSet::new();
    for (oid, raw) in objects.iter().filter(|(oid, _)| **oid != OBJECT_DEVICE_LIST) {
        let attrs = parse_device_description(raw);
        let device_type = attrs.get(&ATTR_DEVICE_TYPE).map(String::as_str).unwrap_or("");
        if !matcher.matches_type(device_type) {
            continue;
        }
        match attrs.get(&ATTR_SLAVE_ID).and_then(|sid| sid.trim().parse::<u8>().ok()) {
            Some(sid) => {
                info!("Found charger in object {oid:#04x} at slave ID {sid}");
                chargers.insert(sid);
            }
            None => warn!(
                "Invalid slave ID in object {oid:#04x}: {:?}",
                attrs.get(&ATTR_SLAVE_ID)
            ),
        }
    }
    Ok(chargers)
}

/// Find chargers by reading the offering name of every slave in `slaves`.
///
/// Slaves that do not answer are skipped. A failure of the connection itself
/// aborts the scan, and so does a scan in which no slave answered at all.
pub async fn discover_scan<T: Transport + ?Sized>(
    transport: &mut T,
    slaves: RangeInclusive<u8>,
    matcher: &ChargerMatcher,
) -> Result<BTreeSet<u8>, DiscoveryError> {
    let register = &registers::OFFERING_NAME;
    let mut chargers = BTreeSet::new();
    let mut answered = false;
    let mut last_silence = None;
    for slave in slaves {
        let words = match transport
            .read_holding_registers(slave, register.address, register.kind.words())
            .await
        {
            Ok(words) => words,
            Err(err) if err.is_connection_level() => return Err(err.into()),
            Err(err @ CommunicationError::Timeout(_)) => {
                debug!("Slave {slave} did not answer: {err}");
                last_silence = Some(err);
                continue;
            }
            Err(err) => {
                debug!("Slave {slave} rejected the request: {err}");
                answered = true;
                continue;
            }
        };
        answered = true;
        match registers::decode(register, &words) {
            Ok(value) => {
                let name = value.as_str().unwrap_or_default();
                if matcher.matches_name(name) {
                    info!("Found charger {name} at slave ID {slave}");
                    chargers.insert(slave);
                } else {
                    debug!("Slave {slave} is not a charger: {name}");
                }
            }
            Err(err) => debug!("Slave {slave} has an unreadable offering name: {err}"),
        }
    }
    match last_silence {
        Some(err) if !answered => Err(err.into()),
        _ => Ok(chargers),
    }
}

/// Run discovery as configured for an EMMA at `emma_slave`.
pub async fn discover<T: Transport + ?Sized>(
    transport: &mut T,
    emma_slave: u8,
    config: &DiscoveryConfig,
) -> Result<BTreeSet<u8>, DiscoveryError> {
    let matcher = ChargerMatcher::new(&config.charger_pattern);
    let chargers = match config.method {
        DiscoveryMethod::DeviceList => discover_device_list(transport, emma_slave, &matcher).await?,
        DiscoveryMethod::Scan => {
            discover_scan(transport, config.first_slave..=config.last_slave, &matcher).await?
        }
    };
    if chargers.is_empty() {
        warn!("No charger sub-devices found");
    }
    Ok(chargers)
}
