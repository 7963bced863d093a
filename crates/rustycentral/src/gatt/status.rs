//! GATT status codes
//!
//! The transport reports the outcome of every operation as a numeric status.
//! Known values map onto named variants; anything else is kept verbatim as
//! `Unrecognized` rather than rejected. Two variants are synthesized locally
//! and never come from the transport: `NoConnection` and `NoSuchAttribute`.

use super::types::AttributeId;
use std::fmt;

/// Status code space reserved for engine-local results.
const NO_CONNECTION_CODE: u32 = u32::MAX;
const NO_SUCH_ATTRIBUTE_CODE: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    ConnectionTimeout,
    InvalidAttributeLength,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    InvalidCommandParameters,
    RemoteUserTerminated,
    RemoteLowResources,
    RemotePowerOff,
    LocalHostTerminated,
    NoResources,
    InternalError,
    WrongState,
    DatabaseFull,
    Busy,
    /// The catch-all 0x85 most stacks report for an unexplained link failure
    StackError,
    IllegalParameter,
    ConnectionCongested,
    Failure,
    /// The request could not run because the link is not connected.
    NoConnection,
    /// The attribute is not part of the current attribute catalog.
    NoSuchAttribute(AttributeId),
    Unrecognized(u16),
}

impl From<u16> for GattStatus {
    fn from(code: u16) -> Self {
        match code {
            0x00 => GattStatus::Success,
            0x02 => GattStatus::ReadNotPermitted,
            0x03 => GattStatus::WriteNotPermitted,
            0x05 => GattStatus::InsufficientAuthentication,
            0x06 => GattStatus::RequestNotSupported,
            0x07 => GattStatus::InvalidOffset,
            0x08 => GattStatus::ConnectionTimeout,
            0x0D => GattStatus::InvalidAttributeLength,
            0x0F => GattStatus::InsufficientEncryption,
            0x10 => GattStatus::UnsupportedGroupType,
            0x11 => GattStatus::InsufficientResources,
            0x12 => GattStatus::InvalidCommandParameters,
            0x13 => GattStatus::RemoteUserTerminated,
            0x14 => GattStatus::RemoteLowResources,
            0x15 => GattStatus::RemotePowerOff,
            0x16 => GattStatus::LocalHostTerminated,
            0x80 => GattStatus::NoResources,
            0x81 => GattStatus::InternalError,
            0x82 => GattStatus::WrongState,
            0x83 => GattStatus::DatabaseFull,
            0x84 => GattStatus::Busy,
            0x85 => GattStatus::StackError,
            0x87 => GattStatus::IllegalParameter,
            0x8F => GattStatus::ConnectionCongested,
            0x0101 => GattStatus::Failure,
            other => GattStatus::Unrecognized(other),
        }
    }
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GattStatus::Success)
    }

    /// Numeric code. Local statuses sit at the top of the `u32` range so they
    /// never collide with anything the transport reports.
    pub fn code(&self) -> u32 {
        let code: u16 = match self {
            GattStatus::Success => 0x00,
            GattStatus::ReadNotPermitted => 0x02,
            GattStatus::WriteNotPermitted => 0x03,
            GattStatus::InsufficientAuthentication => 0x05,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::ConnectionTimeout => 0x08,
            GattStatus::InvalidAttributeLength => 0x0D,
            GattStatus::InsufficientEncryption => 0x0F,
            GattStatus::UnsupportedGroupType => 0x10,
            GattStatus::InsufficientResources => 0x11,
            GattStatus::InvalidCommandParameters => 0x12,
            GattStatus::RemoteUserTerminated => 0x13,
            GattStatus::RemoteLowResources => 0x14,
            GattStatus::RemotePowerOff => 0x15,
            GattStatus::LocalHostTerminated => 0x16,
            GattStatus::NoResources => 0x80,
            GattStatus::InternalError => 0x81,
            GattStatus::WrongState => 0x82,
            GattStatus::DatabaseFull => 0x83,
            GattStatus::Busy => 0x84,
            GattStatus::StackError => 0x85,
            GattStatus::IllegalParameter => 0x87,
            GattStatus::ConnectionCongested => 0x8F,
            GattStatus::Failure => 0x0101,
            GattStatus::Unrecognized(code) => *code,
            GattStatus::NoConnection => return NO_CONNECTION_CODE,
            GattStatus::NoSuchAttribute(_) => return NO_SUCH_ATTRIBUTE_CODE,
        };
        code as u32
    }

    pub fn name(&self) -> &'static str {
        match self {
            GattStatus::Success => "SUCCESS",
            GattStatus::ReadNotPermitted => "READ_NOT_PERMITTED",
            GattStatus::WriteNotPermitted => "WRITE_NOT_PERMITTED",
            GattStatus::InsufficientAuthentication => "INSUFFICIENT_AUTHENTICATION",
            GattStatus::RequestNotSupported => "REQUEST_NOT_SUPPORTED",
            GattStatus::InvalidOffset => "INVALID_OFFSET",
            GattStatus::ConnectionTimeout => "CONNECTION_TIMEOUT",
            GattStatus::InvalidAttributeLength => "INVALID_ATTRIBUTE_LENGTH",
            GattStatus::InsufficientEncryption => "INSUFFICIENT_ENCRYPTION",
            GattStatus::UnsupportedGroupType => "UNSUPPORTED_GROUP_TYPE",
            GattStatus::InsufficientResources => "INSUFFICIENT_RESOURCES",
            GattStatus::InvalidCommandParameters => "INVALID_COMMAND_PARAMETERS",
            GattStatus::RemoteUserTerminated => "REMOTE_USER_TERMINATED",
            GattStatus::RemoteLowResources => "REMOTE_LOW_RESOURCES",
            GattStatus::RemotePowerOff => "REMOTE_POWER_OFF",
            GattStatus::LocalHostTerminated => "LOCAL_HOST_TERMINATED",
            GattStatus::NoResources => "NO_RESOURCES",
            GattStatus::InternalError => "INTERNAL_ERROR",
            GattStatus::WrongState => "WRONG_STATE",
            GattStatus::DatabaseFull => "DATABASE_FULL",
            GattStatus::Busy => "BUSY",
            GattStatus::StackError => "STACK_ERROR",
            GattStatus::IllegalParameter => "ILLEGAL_PARAMETER",
            GattStatus::ConnectionCongested => "CONNECTION_CONGESTED",
            GattStatus::Failure => "FAILURE",
            GattStatus::NoConnection => "NO_CONNECTION",
            GattStatus::NoSuchAttribute(_) => "NO_SUCH_ATTRIBUTE",
            GattStatus::Unrecognized(_) => "UNRECOGNIZED",
        }
    }

    /// Human readable explanation, suitable for showing to a user.
    pub fn description(&self) -> String {
        let text = match self {
            GattStatus::Success => "The operation completed successfully",
            GattStatus::ReadNotPermitted => "The attribute cannot be read",
            GattStatus::WriteNotPermitted => "The attribute cannot be written",
            GattStatus::InsufficientAuthentication => {
                "The attribute requires an authenticated link"
            }
            GattStatus::RequestNotSupported => "The peripheral does not support the request",
            GattStatus::InvalidOffset => "The offset is past the end of the attribute value",
            GattStatus::ConnectionTimeout => "The link supervision timeout expired",
            GattStatus::InvalidAttributeLength => "The value length is invalid for the attribute",
            GattStatus::InsufficientEncryption => "The attribute requires an encrypted link",
            GattStatus::UnsupportedGroupType => "The grouping attribute type is not supported",
            GattStatus::InsufficientResources => "The peripheral ran out of resources",
            GattStatus::InvalidCommandParameters => "The controller rejected the command parameters",
            GattStatus::RemoteUserTerminated => "The peripheral closed the connection",
            GattStatus::RemoteLowResources => {
                "The peripheral closed the connection because it is low on resources"
            }
            GattStatus::RemotePowerOff => "The peripheral closed the connection to power off",
            GattStatus::LocalHostTerminated => "The local host closed the connection",
            GattStatus::NoResources => "The local stack ran out of resources",
            GattStatus::InternalError => "The local stack reported an internal error",
            GattStatus::WrongState => "The local stack is in the wrong state for the request",
            GattStatus::DatabaseFull => "The local attribute database is full",
            GattStatus::Busy => "The local stack is busy with another operation",
            GattStatus::StackError => "The local stack reported an unspecified link error",
            GattStatus::IllegalParameter => "The local stack rejected a parameter",
            GattStatus::ConnectionCongested => "The link is congested, retry later",
            GattStatus::Failure => "The operation failed",
            GattStatus::NoConnection => "No connection to the peripheral is available",
            GattStatus::NoSuchAttribute(id) => {
                return format!("{} was not found on the peripheral", id);
            }
            GattStatus::Unrecognized(code) => {
                return format!("0x{:x} is not a recognized GATT status code", code);
            }
        };
        text.to_string()
    }

    /// `(0x<code>) NAME: description`
    pub fn display(&self) -> String {
        format!("(0x{:x}) {}: {}", self.code(), self.name(), self.description())
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl std::error::Error for GattStatus {}
