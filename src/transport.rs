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
use log::debug;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_modbus::{Request, Response};

use crate::error::CommunicationError;

pub type Result<T> = std::result::Result<T, CommunicationError>;

const FC_ENCAPSULATED_INTERFACE: u8 = 0x2b;
const MEI_READ_DEVICE_ID: u8 = 0x0e;

/// One page of a "read device identification" response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: BTreeMap<u8, Vec<u8>>,
}

/// Parse the payload of a function 0x2B / MEI 0x0E response (everything
/// after the function code).
pub fn parse_device_identification(data: &[u8]) -> Result<DeviceIdentification> {
    let malformed = |msg: &str| CommunicationError::UnexpectedResponse(msg.to_owned());
    if data.len() < 6 {
        return Err(malformed("device identification header too short"));
    }
    if data[0] != MEI_READ_DEVICE_ID {
        return Err(malformed("wrong MEI type"));
    }
    let more_follows = data[3] == 0xff;
    let next_object_id = data[4];
    let count = data[5];
    let mut objects = BTreeMap::new();
    let mut pos = 6;
    for _ in 0..count {
        if pos + 2 > data.len() {
            return Err(malformed("truncated object header"));
        }
        let id = data[pos];
        let len = usize::from(data[pos + 1]);
        pos += 2;
        if pos + len > data.len() {
            return Err(malformed("truncated object value"));
        }
        objects.insert(id, data[pos..pos + len].to_vec());
        pos += len;
    }
    Ok(DeviceIdentification {
        more_follows,
        next_object_id,
        objects,
    })
}

/// Operations the rest of the crate needs from the Modbus link to one EMMA.
///
/// All slaves behind an EMMA share the same connection, so methods take
/// `&mut self` and calls are naturally serialised.
#[async_trait]
pub trait Transport: Send {
    async fn read_holding_registers(&mut self, slave: u8, addr: u16, cnt: u16) -> Result<Vec<u16>>;

    async fn read_device_identification(
        &mut self,
        slave: u8,
        read_code: u8,
        object_id: u8,
    ) -> Result<DeviceIdentification>;
}

pub struct ModbusTransport {
    addr: SocketAddr,
    ctx: Context,
    timeout: Duration,
}

impl ModbusTransport {
    /// Resolve `host` and prepare a connection. The connection itself is
    /// opened lazily and re-opened after failures.
    pub async fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let resolve_err = |source| CommunicationError::Resolve {
            host: host.to_owned(),
            port,
            source,
        };
        let socket_addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(resolve_err)?
            .next()
            .ok_or_else(|| resolve_err(Error::from(ErrorKind::AddrNotAvailable)))?;
        debug!("Resolved {host}:{port} to {socket_addr}");
        Ok(Self::from_addr(socket_addr, timeout))
    }

    pub fn from_addr(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            ctx: modbus_robust::new_tcp_slave(addr, Slave(0)),
            timeout,
        }
    }

    /// Drop the connection after a request went unanswered or the stream
    /// lost sync, so that a late response cannot be taken as the answer to
    /// the next request.
    fn check<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err @ (CommunicationError::Timeout(_) | CommunicationError::Protocol(_))) =
            &result
        {
            debug!("Reconnecting to {} after: {err}", self.addr);
            self.ctx = modbus_robust::new_tcp_slave(self.addr, Slave(0));
        }
        result
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        addr: u16,
        cnt: u16,
    ) -> Result<Vec<u16>> {
        let timeout = self.timeout;
        self.ctx.set_slave(Slave(slave));
        let result: Result<Vec<u16>> = async {
            Ok(
                tokio::time::timeout(timeout, self.ctx.read_holding_registers(addr, cnt))
                    .await
                    .map_err(|_| CommunicationError::Timeout(timeout))???,
            )
        }
        .await;
        self.check(result)
    }

    async fn read_device_identification(
        &mut self,
        slave: u8,
        read_code: u8,
        object_id: u8,
    ) -> Result<DeviceIdentification> {
        let timeout = self.timeout;
        self.ctx.set_slave(Slave(slave));
        let request = Request::Custom(
            FC_ENCAPSULATED_INTERFACE,
            Cow::Owned(vec![MEI_READ_DEVICE_ID, read_code, object_id]),
        );
        let result: Result<Response> = async {
            Ok(tokio::time::timeout(timeout, self.ctx.call(request))
                .await
                .map_err(|_| CommunicationError::Timeout(timeout))???)
        }
        .await;
        match self.check(result)? {
            Response::Custom(FC_ENCAPSULATED_INTERFACE, data) => parse_device_identification(&data),
            other => Err(CommunicationError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}
