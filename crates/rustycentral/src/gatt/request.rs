//! Requests accepted by the pipeline
//!
//! Each request names its target attribute and carries a completion callback
//! that is invoked exactly once. Callbacks run on the event-processing task
//! and must return quickly.

use super::status::GattStatus;
use super::types::{AttributeId, CharacteristicId, DescriptorId, WriteType};
use crate::error::Error;
use std::fmt;

pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, GattStatus>) + Send>;
pub type WriteCallback = Box<dyn FnOnce(Result<(), GattStatus>) + Send>;
pub type NotifyCallback = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// Bytes of a write together with a cursor over what has been acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePayload {
    data: Vec<u8>,
    acknowledged: usize,
    in_flight: usize,
    chunks_acknowledged: usize,
}

impl WritePayload {
    pub fn new(data: Vec<u8>) -> Self {
        WritePayload {
            data,
            acknowledged: 0,
            in_flight: 0,
            chunks_acknowledged: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.acknowledged
    }

    /// An empty payload still needs one (empty) chunk on the wire.
    pub fn is_complete(&self) -> bool {
        self.chunks_acknowledged > 0 && self.acknowledged == self.data.len()
    }

    /// Marks the next chunk of at most `max` bytes as in flight and returns it.
    pub(crate) fn next_chunk(&mut self, max: usize) -> &[u8] {
        self.in_flight = self.remaining().min(max.max(1));
        &self.data[self.acknowledged..self.acknowledged + self.in_flight]
    }

    /// The chunk currently in flight, for a verbatim resend.
    pub(crate) fn current_chunk(&self) -> &[u8] {
        &self.data[self.acknowledged..self.acknowledged + self.in_flight]
    }

    pub(crate) fn acknowledge(&mut self) {
        self.acknowledged += self.in_flight;
        self.in_flight = 0;
        self.chunks_acknowledged += 1;
    }
}

pub enum Request {
    CharacteristicRead {
        id: CharacteristicId,
        on_complete: ReadCallback,
    },
    DescriptorRead {
        id: DescriptorId,
        on_complete: ReadCallback,
    },
    CharacteristicWrite {
        id: CharacteristicId,
        payload: WritePayload,
        write_type: WriteType,
        on_complete: WriteCallback,
    },
    DescriptorWrite {
        id: DescriptorId,
        payload: WritePayload,
        on_complete: WriteCallback,
    },
    /// Enables notifications, or indications when the characteristic only
    /// supports those.
    EnableNotify {
        id: CharacteristicId,
        on_complete: NotifyCallback,
    },
}

impl Request {
    pub fn read_characteristic<F>(id: CharacteristicId, on_complete: F) -> Self
    where
        F: FnOnce(Result<Vec<u8>, GattStatus>) + Send + 'static,
    {
        Request::CharacteristicRead {
            id,
            on_complete: Box::new(on_complete),
        }
    }

    pub fn read_descriptor<F>(id: DescriptorId, on_complete: F) -> Self
    where
        F: FnOnce(Result<Vec<u8>, GattStatus>) + Send + 'static,
    {
        Request::DescriptorRead {
            id,
            on_complete: Box::new(on_complete),
        }
    }

    pub fn write_characteristic<F>(
        id: CharacteristicId,
        value: Vec<u8>,
        write_type: WriteType,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(Result<(), GattStatus>) + Send + 'static,
    {
        Request::CharacteristicWrite {
            id,
            payload: WritePayload::new(value),
            write_type,
            on_complete: Box::new(on_complete),
        }
    }

    pub fn write_descriptor<F>(id: DescriptorId, value: Vec<u8>, on_complete: F) -> Self
    where
        F: FnOnce(Result<(), GattStatus>) + Send + 'static,
    {
        Request::DescriptorWrite {
            id,
            payload: WritePayload::new(value),
            on_complete: Box::new(on_complete),
        }
    }

    pub fn enable_notify<F>(id: CharacteristicId, on_complete: F) -> Self
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        Request::EnableNotify {
            id,
            on_complete: Box::new(on_complete),
        }
    }

    pub fn target(&self) -> AttributeId {
        match self {
            Request::CharacteristicRead { id, .. }
            | Request::CharacteristicWrite { id, .. }
            | Request::EnableNotify { id, .. } => AttributeId::Characteristic(*id),
            Request::DescriptorRead { id, .. } | Request::DescriptorWrite { id, .. } => {
                AttributeId::Descriptor(*id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::CharacteristicRead { .. } => "characteristic read",
            Request::DescriptorRead { .. } => "descriptor read",
            Request::CharacteristicWrite { .. } => "characteristic write",
            Request::DescriptorWrite { .. } => "descriptor write",
            Request::EnableNotify { .. } => "enable notify",
        }
    }

    /// Completes the request with a failure status.
    pub(crate) fn fail(self, status: GattStatus) {
        match self {
            Request::CharacteristicRead { on_complete, .. }
            | Request::DescriptorRead { on_complete, .. } => on_complete(Err(status)),
            Request::CharacteristicWrite { on_complete, .. }
            | Request::DescriptorWrite { on_complete, .. } => on_complete(Err(status)),
            Request::EnableNotify { on_complete, .. } => on_complete(Err(Error::Gatt(status))),
        }
    }

    /// Completes the request with an error raised before it reached the
    /// transport. Reads and writes only ever see GATT statuses here.
    pub(crate) fn reject(self, err: Error) {
        match (self, err) {
            (Request::EnableNotify { on_complete, .. }, err) => on_complete(Err(err)),
            (request, Error::Gatt(status)) => request.fail(status),
            (request, _) => request.fail(GattStatus::Failure),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.kind(), self.target())
    }
}
