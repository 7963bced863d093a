//! Request pipeline
//!
//! Serializes GATT operations on one connection: requests wait in a FIFO
//! queue and exactly one is in flight at a time. The pipeline never waits on
//! anything itself. The connection feeds it transport events through the
//! `on_*` methods and calls [`RequestPipeline::pump`] to dispatch the next
//! request once the in-flight one completes.
//!
//! Queue slots are semaphore permits. A submitter acquires one before the
//! request is enqueued and the permit is released when the request completes,
//! so a full queue only ever blocks submitters.

use super::catalog::AttributeCatalog;
use super::request::{Request, WritePayload};
use super::status::GattStatus;
use super::types::{AttributeHandle, AttributeId, CharacteristicId, CharacteristicProperties};
use crate::adapter::GattHandle;
use crate::constants::*;
use crate::error::Error;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// What a dispatch needs from the connection.
pub(crate) struct Link<'a> {
    pub handle: &'a dyn GattHandle,
    pub catalog: &'a AttributeCatalog,
    /// Usable bytes per write, re-read at every chunk.
    pub payload_size: usize,
    /// New requests may go out. Otherwise queued requests fail with
    /// `NoConnection` instead of being dispatched.
    pub ready: bool,
}

struct Queued {
    request: Request,
    _permit: OwnedSemaphorePermit,
}

enum Stage {
    /// Waiting for the completion of the request's own read or write.
    Awaiting,
    /// Enable-notify is writing the configuration descriptor.
    WritingConfig,
}

struct InFlight {
    request: Request,
    /// Attribute the outstanding transport command addresses.
    handle: AttributeHandle,
    stage: Stage,
    resends: u8,
    _permit: OwnedSemaphorePermit,
}

enum Completion {
    Characteristic,
    Descriptor,
}

pub struct RequestPipeline {
    queue: VecDeque<Queued>,
    in_flight: Option<InFlight>,
    slots: Arc<Semaphore>,
    max_write_resends: u8,
}

impl RequestPipeline {
    pub fn new(capacity: usize, max_write_resends: u8) -> Self {
        RequestPipeline {
            queue: VecDeque::with_capacity(capacity),
            in_flight: None,
            slots: Arc::new(Semaphore::new(capacity.max(1))),
            max_write_resends,
        }
    }

    /// Queue slots; acquire one before [`RequestPipeline::enqueue`].
    pub fn slots(&self) -> Arc<Semaphore> {
        Arc::clone(&self.slots)
    }

    pub fn enqueue(&mut self, request: Request, permit: OwnedSemaphorePermit) {
        trace!("Queued {:?}", request);
        self.queue.push_back(Queued {
            request,
            _permit: permit,
        });
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Requests waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Dispatches queued requests until one is left in flight or the queue is
    /// empty. Requests that fail before reaching the transport complete here.
    pub(crate) fn pump(&mut self, link: &Link<'_>) {
        while self.in_flight.is_none() {
            let Some(next) = self.queue.pop_front() else {
                return;
            };
            if !link.ready {
                debug!("Link not ready, failing {:?}", next.request);
                next.request.fail(GattStatus::NoConnection);
                continue;
            }
            self.in_flight = Self::dispatch(next, link);
        }
    }

    fn dispatch(queued: Queued, link: &Link<'_>) -> Option<InFlight> {
        let Queued {
            mut request,
            _permit,
        } = queued;
        debug!("Dispatching {:?}", request);

        match Self::issue(&mut request, link) {
            Ok((handle, stage)) => Some(InFlight {
                request,
                handle,
                stage,
                resends: 0,
                _permit,
            }),
            Err(err) => {
                warn!("{:?} failed before reaching the peripheral: {}", request, err);
                request.reject(err);
                None
            }
        }
    }

    /// Resolves the request's target and issues its first transport command.
    fn issue(request: &mut Request, link: &Link<'_>) -> Result<(AttributeHandle, Stage), Error> {
        match request {
            Request::CharacteristicRead { id, .. } => {
                let entry = link.catalog.characteristic(id).ok_or_else(|| missing(*id))?;
                link.handle.read_characteristic(entry.handle)?;
                Ok((entry.handle, Stage::Awaiting))
            }
            Request::DescriptorRead { id, .. } => {
                let entry = link.catalog.descriptor(id).ok_or_else(|| missing(*id))?;
                link.handle.read_descriptor(entry.handle)?;
                Ok((entry.handle, Stage::Awaiting))
            }
            Request::CharacteristicWrite {
                id,
                payload,
                write_type,
                ..
            } => {
                let entry = link.catalog.characteristic(id).ok_or_else(|| missing(*id))?;
                let chunk = payload.next_chunk(link.payload_size);
                trace!("Write chunk {} to 0x{:04x}", hex::encode(chunk), entry.handle);
                link.handle
                    .write_characteristic(entry.handle, chunk, *write_type)?;
                Ok((entry.handle, Stage::Awaiting))
            }
            Request::DescriptorWrite { id, payload, .. } => {
                let entry = link.catalog.descriptor(id).ok_or_else(|| missing(*id))?;
                let chunk = payload.next_chunk(link.payload_size);
                trace!("Write chunk {} to 0x{:04x}", hex::encode(chunk), entry.handle);
                link.handle.write_descriptor(entry.handle, chunk)?;
                Ok((entry.handle, Stage::Awaiting))
            }
            Request::EnableNotify { id, .. } => Self::issue_enable_notify(*id, link),
        }
    }

    /// Capability and descriptor checks, local delivery, then the
    /// configuration descriptor write. Only the descriptor write completes asynchronously.
    fn issue_enable_notify(
        id: CharacteristicId,
        link: &Link<'_>,
    ) -> Result<(AttributeHandle, Stage), Error> {
        let entry = link.catalog.characteristic(&id).ok_or_else(|| missing(id))?;
        if !entry.properties.supports_notify() {
            return Err(Error::CapabilityUnsupported(id));
        }

        let value = if entry.properties.contains(CharacteristicProperties::NOTIFY) {
            CCCD_ENABLE_NOTIFICATION
        } else {
            CCCD_ENABLE_INDICATION
        };

        let config_id = id.descriptor(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID));
        let config = link
            .catalog
            .descriptor(&config_id)
            .ok_or_else(|| missing(config_id))?;

        if !link.handle.set_notification(entry.handle, true) {
            return Err(Error::NotifyRefused(id));
        }
        link.handle.write_descriptor(config.handle, &value)?;
        Ok((config.handle, Stage::WritingConfig))
    }

    pub(crate) fn on_characteristic_read(
        &mut self,
        handle: AttributeHandle,
        status: GattStatus,
        value: Vec<u8>,
        link: &Link<'_>,
    ) {
        self.on_read(Completion::Characteristic, handle, status, value, link);
    }

    pub(crate) fn on_descriptor_read(
        &mut self,
        handle: AttributeHandle,
        status: GattStatus,
        value: Vec<u8>,
        link: &Link<'_>,
    ) {
        self.on_read(Completion::Descriptor, handle, status, value, link);
    }

    fn on_read(
        &mut self,
        kind: Completion,
        handle: AttributeHandle,
        status: GattStatus,
        value: Vec<u8>,
        link: &Link<'_>,
    ) {
        let matches = match (&self.in_flight, kind) {
            (Some(current), Completion::Characteristic) => {
                current.handle == handle
                    && matches!(current.request, Request::CharacteristicRead { .. })
            }
            (Some(current), Completion::Descriptor) => {
                current.handle == handle && matches!(current.request, Request::DescriptorRead { .. })
            }
            (None, _) => false,
        };
        if !matches {
            warn!("Unexpected read completion for handle 0x{:04x}", handle);
            return;
        }
        let Some(current) = self.in_flight.take() else {
            return;
        };

        let result = if status.is_success() {
            trace!("Read 0x{:04x}: {}", handle, hex::encode(&value));
            Ok(value)
        } else {
            Err(status)
        };
        match current.request {
            Request::CharacteristicRead { on_complete, .. }
            | Request::DescriptorRead { on_complete, .. } => on_complete(result),
            other => other.fail(status),
        }

        self.pump(link);
    }

    pub(crate) fn on_characteristic_written(
        &mut self,
        handle: AttributeHandle,
        status: GattStatus,
        link: &Link<'_>,
    ) {
        let matches = self.in_flight.as_ref().is_some_and(|current| {
            current.handle == handle
                && matches!(current.request, Request::CharacteristicWrite { .. })
        });
        if !matches {
            warn!("Unexpected characteristic write completion for handle 0x{:04x}", handle);
            return;
        }
        self.on_write(status, link);
    }

    pub(crate) fn on_descriptor_written(
        &mut self,
        handle: AttributeHandle,
        status: GattStatus,
        link: &Link<'_>,
    ) {
        let config_write = match self.in_flight.as_ref() {
            Some(current) if current.handle == handle => match (&current.request, &current.stage) {
                (Request::EnableNotify { .. }, Stage::WritingConfig) => Some(true),
                (Request::DescriptorWrite { .. }, Stage::Awaiting) => Some(false),
                _ => None,
            },
            _ => None,
        };

        match config_write {
            Some(true) => {
                if let Some(InFlight {
                    request: Request::EnableNotify { id, on_complete },
                    ..
                }) = self.in_flight.take()
                {
                    if status.is_success() {
                        debug!("Notifications enabled on {}", id);
                        on_complete(Ok(()));
                    } else {
                        warn!("Configuration write for {} failed: {}", id, status);
                        on_complete(Err(Error::Gatt(status)));
                    }
                }
                self.pump(link);
            }
            Some(false) => self.on_write(status, link),
            None => warn!("Unexpected descriptor write completion for handle 0x{:04x}", handle),
        }
    }

    /// Advances the in-flight write by one chunk, resends the failed chunk,
    /// or completes the request.
    fn on_write(&mut self, status: GattStatus, link: &Link<'_>) {
        let Some(mut current) = self.in_flight.take() else {
            return;
        };
        let handle = current.handle;
        let max_write_resends = self.max_write_resends;

        let issued = match &mut current.request {
            Request::CharacteristicWrite {
                payload,
                write_type,
                ..
            } => {
                let write_type = *write_type;
                Self::continue_write(
                    payload,
                    &mut current.resends,
                    max_write_resends,
                    status,
                    link,
                    |chunk| link.handle.write_characteristic(handle, chunk, write_type),
                )
            }
            Request::DescriptorWrite { payload, .. } => Self::continue_write(
                payload,
                &mut current.resends,
                max_write_resends,
                status,
                link,
                |chunk| link.handle.write_descriptor(handle, chunk),
            ),
            _ => Some(Err(status)),
        };

        match issued {
            // another chunk or a resend is on the wire
            None => self.in_flight = Some(current),
            Some(result) => {
                match current.request {
                    Request::CharacteristicWrite { on_complete, .. }
                    | Request::DescriptorWrite { on_complete, .. } => on_complete(result),
                    other => other.fail(status),
                }
                self.pump(link);
            }
        }
    }

    /// Returns `None` while the write continues, or its final result.
    fn continue_write<F>(
        payload: &mut WritePayload,
        resends: &mut u8,
        max_write_resends: u8,
        status: GattStatus,
        link: &Link<'_>,
        mut send: F,
    ) -> Option<Result<(), GattStatus>>
    where
        F: FnMut(&[u8]) -> Result<(), GattStatus>,
    {
        if status.is_success() {
            payload.acknowledge();
            *resends = 0;
            if payload.is_complete() {
                return Some(Ok(()));
            }
            let chunk = payload.next_chunk(link.payload_size);
            trace!("Write chunk {}", hex::encode(chunk));
            return send(chunk).err().map(Err);
        }

        if *resends >= max_write_resends {
            warn!("Write failed after {} resends: {}", resends, status);
            return Some(Err(status));
        }
        *resends += 1;
        debug!("Resending chunk ({}/{}) after {}", resends, max_write_resends, status);
        send(payload.current_chunk()).err().map(Err)
    }

    /// Completes the in-flight request and then every queued request, in
    /// order, with `status`.
    pub fn fail_all(&mut self, status: GattStatus) {
        let pending = self.queue.len() + usize::from(self.in_flight.is_some());
        if pending > 0 {
            debug!("Failing {} pending requests: {}", pending, status);
        }
        if let Some(current) = self.in_flight.take() {
            current.request.fail(status);
        }
        while let Some(queued) = self.queue.pop_front() {
            queued.request.fail(status);
        }
    }
}

fn missing(id: impl Into<AttributeId>) -> Error {
    Error::Gatt(GattStatus::NoSuchAttribute(id.into()))
}
