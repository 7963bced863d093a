//! Error types for the rustycentral library
//!
//! Transport outcomes travel as [`GattStatus`] and [`ScanFailure`]; this
//! module wraps them together with the failures the engine raises itself.

use crate::connection::ConnectionState;
use crate::gatt::{CharacteristicId, GattStatus};
use crate::scan::ScanFailure;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("GATT operation failed: {0}")]
    Gatt(#[from] GattStatus),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanFailure),

    #[error("{0} does not support notify or indicate")]
    CapabilityUnsupported(CharacteristicId),

    #[error("Could not enable notifications on {0}")]
    NotifyRefused(CharacteristicId),

    #[error("Connection attempt timed out")]
    ConnectTimeout,

    #[error("Connection attempt ended in state {0}")]
    ConnectFailed(ConnectionState),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request pipeline closed")]
    PipelineClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
