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

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the EMMA over Modbus.
#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("could not resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("modbus exception: {0}")]
    Exception(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl CommunicationError {
    /// Whether the error concerns the connection to the EMMA itself rather
    /// than the single slave being addressed.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Transport(_))
    }
}

impl From<tokio_modbus::Error> for CommunicationError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(err) => Self::Transport(err),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<tokio_modbus::ExceptionCode> for CommunicationError {
    fn from(code: tokio_modbus::ExceptionCode) -> Self {
        Self::Exception(format!("{code:?}"))
    }
}

/// A register value could not be interpreted as its declared kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected {expected} words, got {actual}")]
    WordCount { expected: u16, actual: usize },
    #[error("string is not valid UTF-8")]
    InvalidString,
}

/// Setup could not determine which chargers are attached.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery failed: {0}")]
    Communication(#[from] CommunicationError),
    #[error("malformed device list: {0}")]
    MalformedDeviceList(String),
}
