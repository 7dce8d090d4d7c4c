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

//! In-memory transport for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::time::Duration;

use crate::error::CommunicationError;
use crate::transport::{DeviceIdentification, Result, Transport};

/// How a scripted slave answers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Exception,
    Timeout,
    Disconnected,
}

fn fault_error(fault: Fault) -> CommunicationError {
    match fault {
        Fault::Exception => CommunicationError::Exception("GatewayTargetDevice".to_owned()),
        Fault::Timeout => CommunicationError::Timeout(Duration::from_secs(3)),
        Fault::Disconnected => CommunicationError::Transport(ErrorKind::ConnectionReset.into()),
    }
}

#[derive(Default)]
pub struct MockTransport {
    registers: HashMap<(u8, u16), u16>,
    faults: HashMap<u8, Fault>,
    register_faults: HashMap<(u8, u16), Fault>,
    short_reads: HashSet<(u8, u16)>,
    identification: HashMap<(u8, u8), DeviceIdentification>,
    pub reads: Vec<(u8, u16, u16)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_words(&mut self, slave: u8, addr: u16, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.registers.insert((slave, addr + i as u16), *word);
        }
    }

    pub fn set_u32(&mut self, slave: u8, addr: u16, value: u32) {
        self.set_words(slave, addr, &[(value >> 16) as u16, value as u16]);
    }

    /// Store `text` NUL padded to `words` words
    pub fn set_string(&mut self, slave: u8, addr: u16, words: u16, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(usize::from(words) * 2, 0);
        let words: Vec<u16> = bytes
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        self.set_words(slave, addr, &words);
    }

    pub fn set_fault(&mut self, slave: u8, fault: Option<Fault>) {
        match fault {
            Some(fault) => self.faults.insert(slave, fault),
            None => self.faults.remove(&slave),
        };
    }

    pub fn set_register_fault(&mut self, slave: u8, addr: u16, fault: Fault) {
        self.register_faults.insert((slave, addr), fault);
    }

    /// Answer reads starting at `addr` with one word too few
    pub fn set_short_read(&mut self, slave: u8, addr: u16) {
        self.short_reads.insert((slave, addr));
    }

    pub fn set_identification(&mut self, slave: u8, object_id: u8, page: DeviceIdentification) {
        self.identification.insert((slave, object_id), page);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_holding_registers(&mut self, slave: u8, addr: u16, cnt: u16) -> Result<Vec<u16>> {
        self.reads.push((slave, addr, cnt));
        if let Some(fault) = self.faults.get(&slave) {
            return Err(fault_error(*fault));
        }
        if let Some(fault) = self.register_faults.get(&(slave, addr)) {
            return Err(fault_error(*fault));
        }
        let cnt = if self.short_reads.contains(&(slave, addr)) {
            cnt - 1
        } else {
            cnt
        };
        (addr..addr + cnt)
            .map(|a| {
                self.registers
                    .get(&(slave, a))
                    .copied()
                    .ok_or_else(|| CommunicationError::Exception("IllegalDataAddress".to_owned()))
            })
            .collect()
    }

    async fn read_device_identification(
        &mut self,
        slave: u8,
        _read_code: u8,
        object_id: u8,
    ) -> Result<DeviceIdentification> {
        if let Some(fault) = self.faults.get(&slave) {
            return Err(fault_error(*fault));
        }
        self.identification
            .get(&(slave, object_id))
            .cloned()
            .ok_or_else(|| CommunicationError::Exception("IllegalDataAddress".to_owned()))
    }
}
