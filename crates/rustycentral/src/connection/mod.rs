//! Connection to one peripheral
//!
//! A [`Connection`] owns the transport handle, the attribute catalog and the
//! request pipeline for a single peripheral, and drives the link through
//! connect, MTU negotiation and attribute discovery before accepting
//! requests.
//!
//! All mutable state sits behind one async mutex. Transport events are
//! processed by a task spawned per connect attempt; every attempt carries an
//! epoch so that events and timers left over from an older attempt are
//! ignored.

pub mod state;

#[cfg(test)]
mod tests;

pub use state::{ConnectionState, FailureReason};

use crate::adapter::{BleAdapter, GattEvent, GattHandle, LinkOptions, PeripheralId};
use crate::config::ConnectionConfig;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::gatt::pipeline::{Link, RequestPipeline};
use crate::gatt::{
    AttributeCatalog, AttributeHandle, CharacteristicId, DescriptorId, DiscoveredService,
    GattStatus, NotificationEvent, Request, WriteType,
};
use futures::{Stream, StreamExt};
use log::{debug, info, trace, warn};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

const STATE_CHANNEL_CAPACITY: usize = 16;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Usable bytes per write for a negotiated MTU.
pub fn usable_payload(mtu: u16) -> usize {
    mtu.clamp(MTU_FLOOR, MTU_CEILING) as usize - PACKET_OVERHEAD
}

type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    state: ConnectionState,
    handle: Option<Box<dyn GattHandle>>,
    catalog: Arc<AttributeCatalog>,
    payload_size: usize,
    epoch: u64,
    pipeline: RequestPipeline,
    connect_timer: Option<JoinHandle<()>>,
    on_timeout: Option<TimeoutCallback>,
}

impl Shared {
    /// Runs `f` against the pipeline with the current link. Without a handle
    /// nothing can be dispatched, so pending requests fail instead. Outside
    /// `Connected` completions still resolve but nothing new is dispatched.
    fn drive<F>(&mut self, f: F)
    where
        F: FnOnce(&mut RequestPipeline, &Link<'_>),
    {
        match self.handle.as_deref() {
            Some(handle) => {
                let link = Link {
                    handle,
                    catalog: self.catalog.as_ref(),
                    payload_size: self.payload_size,
                    ready: self.state == ConnectionState::Connected,
                };
                f(&mut self.pipeline, &link);
            }
            None => self.pipeline.fail_all(GattStatus::NoConnection),
        }
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    /// Closes and drops the handle and retires the current epoch.
    fn release_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.epoch += 1;
    }
}

struct Inner {
    peripheral: PeripheralId,
    adapter: Arc<dyn BleAdapter>,
    config: ConnectionConfig,
    shared: Mutex<Shared>,
    slots: Arc<Semaphore>,
    states: broadcast::Sender<ConnectionState>,
    notifications: broadcast::Sender<NotificationEvent>,
}

/// Handle to a connection; clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a disconnected connection to `peripheral`. Nothing reaches the
    /// transport until [`Connection::connect`].
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        peripheral: PeripheralId,
        config: ConnectionConfig,
    ) -> Self {
        let pipeline = RequestPipeline::new(config.queue_capacity, config.max_write_resends);
        let slots = pipeline.slots();
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Connection {
            inner: Arc::new(Inner {
                peripheral,
                adapter,
                config,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    handle: None,
                    catalog: Arc::new(AttributeCatalog::new()),
                    payload_size: MIN_USABLE_PAYLOAD,
                    epoch: 0,
                    pipeline,
                    connect_timer: None,
                    on_timeout: None,
                }),
                slots,
                states,
                notifications,
            }),
        }
    }

    /// The peripheral this connection targets.
    pub fn peripheral(&self) -> &PeripheralId {
        &self.inner.peripheral
    }

    /// The current state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.state
    }

    /// Snapshot of the catalog from the most recent discovery.
    pub async fn catalog(&self) -> Arc<AttributeCatalog> {
        Arc::clone(&self.inner.shared.lock().await.catalog)
    }

    /// Usable bytes per write on the current link.
    pub async fn payload_size(&self) -> usize {
        self.inner.shared.lock().await.payload_size
    }

    /// Called whenever a connect attempt times out.
    pub async fn on_timeout<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.shared.lock().await.on_timeout = Some(Arc::new(callback));
    }

    /// Every state transition, in order.
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.states.subscribe()
    }

    /// Every notification and indication, for all characteristics.
    pub fn notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.notifications.subscribe()
    }

    /// Values pushed for one characteristic. Does not enable notifications on
    /// the peripheral; see [`Connection::enable_notify`].
    pub fn observe(&self, id: CharacteristicId) -> impl Stream<Item = Vec<u8>> + Send {
        BroadcastStream::new(self.inner.notifications.subscribe()).filter_map(move |event| async move {
            match event {
                Ok(event) if event.id == id => Some(event.value),
                Ok(_) => None,
                Err(err) => {
                    warn!("Notification stream for {}: {}", id, err);
                    None
                }
            }
        })
    }

    /// Connects and waits until the connection is ready for requests.
    ///
    /// Returns immediately when already connected and joins an attempt that
    /// is already running.
    pub async fn connect(&self) -> Result<()> {
        let changes = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state == ConnectionState::Connected {
                return Ok(());
            }
            let changes = self.inner.states.subscribe();
            if !shared.state.is_connecting() {
                self.inner.start_attempt(&mut shared)?;
            }
            changes
        };
        self.wait_for_attempt(changes).await
    }

    async fn wait_for_attempt(
        &self,
        mut changes: broadcast::Receiver<ConnectionState>,
    ) -> Result<()> {
        loop {
            let state = match changes.recv().await {
                Ok(state) => state,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Missed {} state changes, rechecking", skipped);
                    self.state().await
                }
                Err(RecvError::Closed) => return Err(Error::PipelineClosed),
            };

            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed(FailureReason::Timeout) => {
                    return Err(Error::ConnectTimeout)
                }
                state if state.ends_attempt() => return Err(Error::ConnectFailed(state)),
                _ => {}
            }
        }
    }

    /// Asks the transport to drop the link but keeps the handle, so a later
    /// [`Connection::connect`] reconnects in place. Does nothing unless the
    /// link is up.
    pub async fn disconnect(&self) {
        let mut shared = self.inner.shared.lock().await;
        if !shared.state.is_link_up() {
            debug!("Disconnect ignored in state {}", shared.state);
            return;
        }
        self.inner
            .transition(&mut shared, ConnectionState::DisconnectRequested);
        if let Some(handle) = shared.handle.as_deref() {
            handle.disconnect();
        }
    }

    /// Disconnects and releases the transport handle for good. The next
    /// connect opens a new handle.
    pub async fn fully_close(&self) {
        let mut shared = self.inner.shared.lock().await;
        shared.cancel_connect_timer();

        let link_active =
            shared.state.is_link_up() || shared.state == ConnectionState::Connecting;
        if link_active && shared.handle.is_some() {
            self.inner
                .transition(&mut shared, ConnectionState::DisconnectRequested);
        }
        if let Some(handle) = shared.handle.as_deref() {
            handle.disconnect();
        }
        shared.release_handle();

        if shared.state != ConnectionState::Disconnected {
            self.inner
                .transition(&mut shared, ConnectionState::Disconnected);
        }
        shared.pipeline.fail_all(GattStatus::NoConnection);
        info!("Connection to {} closed", self.inner.peripheral);
    }

    /// Queues a request. Fails with `NoConnection` unless connected, in
    /// which case the request's callback has already been completed with the
    /// same status. Waits while the queue is full.
    pub async fn submit(&self, request: Request) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            request.fail(GattStatus::NoConnection);
            return Err(Error::Gatt(GattStatus::NoConnection));
        }

        let permit = match Arc::clone(&self.inner.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                request.fail(GattStatus::NoConnection);
                return Err(Error::PipelineClosed);
            }
        };

        let mut shared = self.inner.shared.lock().await;
        if shared.state != ConnectionState::Connected {
            drop(shared);
            request.fail(GattStatus::NoConnection);
            return Err(Error::Gatt(GattStatus::NoConnection));
        }
        shared.pipeline.enqueue(request, permit);
        shared.drive(|pipeline, link| pipeline.pump(link));
        Ok(())
    }

    /// Reads a characteristic value.
    pub async fn read_characteristic(&self, id: CharacteristicId) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::read_characteristic(id, move |result| {
            let _ = tx.send(result);
        }))
        .await?;
        let result = rx.await.map_err(|_| Error::PipelineClosed)?;
        Ok(result?)
    }

    /// Reads a descriptor value.
    pub async fn read_descriptor(&self, id: DescriptorId) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::read_descriptor(id, move |result| {
            let _ = tx.send(result);
        }))
        .await?;
        let result = rx.await.map_err(|_| Error::PipelineClosed)?;
        Ok(result?)
    }

    /// Writes `value`, split into as many chunks as the negotiated MTU needs.
    pub async fn write_characteristic(
        &self,
        id: CharacteristicId,
        value: impl Into<Vec<u8>>,
        write_type: WriteType,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::write_characteristic(
            id,
            value.into(),
            write_type,
            move |result| {
                let _ = tx.send(result);
            },
        ))
        .await?;
        let result = rx.await.map_err(|_| Error::PipelineClosed)?;
        Ok(result?)
    }

    /// Writes a descriptor value, chunked like characteristic writes.
    pub async fn write_descriptor(&self, id: DescriptorId, value: impl Into<Vec<u8>>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::write_descriptor(id, value.into(), move |result| {
            let _ = tx.send(result);
        }))
        .await?;
        let result = rx.await.map_err(|_| Error::PipelineClosed)?;
        Ok(result?)
    }

    /// Enables notifications (or indications, when that is all the
    /// characteristic offers) on the peripheral.
    pub async fn enable_notify(&self, id: CharacteristicId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::enable_notify(id, move |result| {
            let _ = tx.send(result);
        }))
        .await?;
        rx.await.map_err(|_| Error::PipelineClosed)?
    }
}

impl Inner {
    fn transition(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        info!(
            "{}: {} -> {}",
            self.peripheral, shared.state, state
        );
        shared.state = state;
        // no subscribers is fine
        let _ = self.states.send(state);
    }

    /// Starts a new connect attempt under a fresh epoch.
    fn start_attempt(self: &Arc<Self>, shared: &mut Shared) -> Result<()> {
        shared.cancel_connect_timer();
        shared.epoch += 1;
        let epoch = shared.epoch;
        let (events, receiver) = mpsc::unbounded_channel();

        self.transition(shared, ConnectionState::Connecting);

        let opened = match shared.handle.as_deref() {
            Some(handle) => {
                debug!("Reconnecting to {} in place", self.peripheral);
                handle.reconnect(events)
            }
            None => {
                debug!("Opening transport handle to {}", self.peripheral);
                let options = LinkOptions {
                    auto_connect: self.config.auto_connect,
                    phy: self.config.phy,
                };
                self.adapter
                    .connect(&self.peripheral, options, events)
                    .map(|handle| shared.handle = Some(handle))
            }
        };

        if let Err(err) = opened {
            warn!("Could not start connecting to {}: {}", self.peripheral, err);
            let status = match &err {
                Error::Gatt(status) => *status,
                _ => GattStatus::Failure,
            };
            self.transition(
                shared,
                ConnectionState::Failed(FailureReason::Transport(status)),
            );
            shared.release_handle();
            return Err(err);
        }

        tokio::spawn(run_events(Arc::downgrade(self), epoch, receiver));

        let weak = Arc::downgrade(self);
        let timeout = self.config.connect_timeout;
        shared.connect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_timeout(epoch).await;
            }
        }));

        Ok(())
    }

    async fn on_connect_timeout(&self, epoch: u64) {
        let callback = {
            let mut shared = self.shared.lock().await;
            if shared.epoch != epoch || !shared.state.is_connecting() {
                return;
            }
            shared.connect_timer = None;
            warn!(
                "Connecting to {} timed out after {:?}",
                self.peripheral, self.config.connect_timeout
            );
            self.transition(&mut shared, ConnectionState::Failed(FailureReason::Timeout));
            shared.release_handle();
            shared.pipeline.fail_all(GattStatus::NoConnection);
            shared.on_timeout.clone()
        };

        if let Some(callback) = callback {
            callback();
        }
    }

    /// Handles one transport event. Returns `false` once `epoch` has been
    /// superseded, which ends the event task.
    async fn handle_event(self: &Arc<Self>, epoch: u64, event: GattEvent) -> bool {
        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch {
            debug!("Ignoring {:?} from superseded attempt {}", event, epoch);
            return false;
        }
        trace!("{}: {:?}", self.peripheral, event);

        match event {
            GattEvent::ConnectionStateChanged { status, state } => {
                self.on_link_state(&mut shared, GattStatus::from(status), state)
            }
            GattEvent::MtuChanged { mtu, status } => {
                self.on_mtu(&mut shared, mtu, GattStatus::from(status))
            }
            GattEvent::AttributesDiscovered { status, services } => {
                self.on_discovered(&mut shared, GattStatus::from(status), services)
            }
            GattEvent::CharacteristicRead {
                handle,
                status,
                value,
            } => shared.drive(|pipeline, link| {
                pipeline.on_characteristic_read(handle, GattStatus::from(status), value, link)
            }),
            GattEvent::DescriptorRead {
                handle,
                status,
                value,
            } => shared.drive(|pipeline, link| {
                pipeline.on_descriptor_read(handle, GattStatus::from(status), value, link)
            }),
            GattEvent::CharacteristicWritten { handle, status } => shared.drive(|pipeline, link| {
                pipeline.on_characteristic_written(handle, GattStatus::from(status), link)
            }),
            GattEvent::DescriptorWritten { handle, status } => shared.drive(|pipeline, link| {
                pipeline.on_descriptor_written(handle, GattStatus::from(status), link)
            }),
            GattEvent::CharacteristicChanged { handle, value } => {
                self.on_value_changed(&shared, handle, value)
            }
        }
        true
    }

    fn on_link_state(self: &Arc<Self>, shared: &mut Shared, status: GattStatus, code: u8) {
        match code {
            LINK_STATE_CONNECTED if status.is_success() => {
                if shared.state != ConnectionState::Connecting {
                    debug!("Link up reported in state {}", shared.state);
                    return;
                }
                shared.cancel_connect_timer();
                self.transition(shared, ConnectionState::NegotiatingMtu);
                self.schedule_mtu_request(shared.epoch);
            }
            LINK_STATE_CONNECTING => {}
            LINK_STATE_DISCONNECTING => {
                if shared.state.is_link_up() {
                    self.transition(shared, ConnectionState::Disconnecting);
                }
            }
            LINK_STATE_CONNECTED | LINK_STATE_DISCONNECTED => {
                shared.cancel_connect_timer();
                if shared.state == ConnectionState::Connecting && !status.is_success() {
                    warn!("Connecting to {} failed: {}", self.peripheral, status);
                    self.transition(
                        shared,
                        ConnectionState::Failed(FailureReason::Transport(status)),
                    );
                    shared.release_handle();
                } else {
                    if shared.state != ConnectionState::DisconnectRequested {
                        info!("{} dropped the link: {}", self.peripheral, status);
                    }
                    self.transition(shared, ConnectionState::Disconnected);
                }
                shared.pipeline.fail_all(GattStatus::NoConnection);
            }
            unknown => {
                warn!(
                    "{} reported unknown link state 0x{:02x}",
                    self.peripheral, unknown
                );
                shared.cancel_connect_timer();
                self.transition(shared, ConnectionState::Invalid(unknown));
                shared.release_handle();
                shared.pipeline.fail_all(GattStatus::NoConnection);
            }
        }
    }

    /// Gives the link a moment to settle, then asks for a larger MTU.
    fn schedule_mtu_request(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.config.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut shared = inner.shared.lock().await;
            if shared.epoch != epoch || shared.state != ConnectionState::NegotiatingMtu {
                return;
            }
            let requested = match shared.handle.as_deref() {
                Some(handle) => handle.request_mtu(inner.config.requested_mtu),
                None => Err(GattStatus::NoConnection),
            };
            if let Err(status) = requested {
                inner.on_mtu(&mut shared, 0, status);
            }
        });
    }

    fn on_mtu(&self, shared: &mut Shared, mtu: u16, status: GattStatus) {
        if shared.state != ConnectionState::NegotiatingMtu {
            // peripheral-initiated exchange on an established link
            if status.is_success() && shared.state.is_link_up() {
                shared.payload_size = usable_payload(mtu);
                debug!("MTU changed to {}", mtu);
            }
            return;
        }

        if status == GattStatus::ConnectionTimeout {
            warn!("Link to {} timed out during MTU exchange", self.peripheral);
            self.transition(
                shared,
                ConnectionState::Failed(FailureReason::Transport(status)),
            );
            shared.release_handle();
            return;
        }

        shared.payload_size = if status.is_success() {
            usable_payload(mtu)
        } else {
            warn!("MTU negotiation failed: {}", status);
            MIN_USABLE_PAYLOAD
        };
        debug!(
            "{}: MTU {}, {} usable bytes per write",
            self.peripheral, mtu, shared.payload_size
        );

        self.transition(shared, ConnectionState::DiscoveringAttributes);
        let requested = match shared.handle.as_deref() {
            Some(handle) => handle.discover_attributes(),
            None => Err(GattStatus::NoConnection),
        };
        if let Err(status) = requested {
            self.on_discovered(shared, status, Vec::new());
        }
    }

    fn on_discovered(&self, shared: &mut Shared, status: GattStatus, services: Vec<DiscoveredService>) {
        if shared.state != ConnectionState::DiscoveringAttributes {
            debug!("Discovery result ignored in state {}", shared.state);
            return;
        }

        if !status.is_success() {
            warn!("Attribute discovery on {} failed: {}", self.peripheral, status);
            self.transition(
                shared,
                ConnectionState::Failed(FailureReason::Discovery(status)),
            );
            shared.release_handle();
            shared.pipeline.fail_all(GattStatus::NoConnection);
            return;
        }

        shared.catalog = Arc::new(AttributeCatalog::build(&services));

        if let Some(handle) = shared.handle.as_deref() {
            if !handle.request_connection_priority(self.config.priority) {
                debug!("Connection priority {:?} not accepted", self.config.priority);
            }
        }

        for id in &self.config.observe_on_connect {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!("Request queue full, not observing {}", id);
                continue;
            };
            let observed = *id;
            shared.pipeline.enqueue(
                Request::enable_notify(observed, move |result| match result {
                    Ok(()) => debug!("Observing {}", observed),
                    Err(err) => warn!("Could not observe {}: {}", observed, err),
                }),
                permit,
            );
        }

        self.transition(shared, ConnectionState::Connected);
        shared.drive(|pipeline, link| pipeline.pump(link));
    }

    fn on_value_changed(&self, shared: &Shared, handle: AttributeHandle, value: Vec<u8>) {
        let Some(entry) = shared.catalog.characteristic_by_handle(handle) else {
            debug!("Value for unknown handle 0x{:04x} dropped", handle);
            return;
        };
        trace!("{} changed: {}", entry.id, hex::encode(&value));
        let _ = self.notifications.send(NotificationEvent {
            id: entry.id,
            value,
        });
    }
}

async fn run_events(inner: Weak<Inner>, epoch: u64, mut events: mpsc::UnboundedReceiver<GattEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.handle_event(epoch, event).await {
            break;
        }
    }
    trace!("Event task for attempt {} finished", epoch);
}
