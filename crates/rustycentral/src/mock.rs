//! Mock transport for tests
//!
//! Records every command the engine issues and lets tests play the
//! transport's side by pushing events into the channels the engine handed
//! over.

use crate::adapter::{
    BleAdapter, GattEvent, GattEventSender, GattHandle, LinkOptions, PeripheralId, ScanEvent,
    ScanEventSender, ScanFilter, ScanSettings,
};
use crate::error::{Error, Result};
use crate::gatt::{AttributeHandle, ConnectionPriority, GattStatus, WriteType};
use crate::scan::ScanFailure;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Reconnect,
    Disconnect,
    Close,
    RequestMtu(u16),
    DiscoverAttributes,
    ReadCharacteristic(AttributeHandle),
    ReadDescriptor(AttributeHandle),
    WriteCharacteristic(AttributeHandle, Vec<u8>, WriteType),
    WriteDescriptor(AttributeHandle, Vec<u8>),
    SetNotification(AttributeHandle, bool),
    RequestPriority(ConnectionPriority),
}

#[derive(Default)]
struct MockState {
    commands: Vec<Command>,
    scan_events: Option<ScanEventSender>,
    gatt_events: Option<GattEventSender>,
    reject_scan: Option<ScanFailure>,
    reject_connect: bool,
    refuse_notifications: bool,
    /// Statuses returned, in order, when commands are issued; `Ok` once empty
    issue_results: VecDeque<std::result::Result<(), GattStatus>>,
}

#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Commands that put bytes on the wire, in order.
    pub fn writes(&self) -> Vec<Command> {
        self.commands()
            .into_iter()
            .filter(|command| {
                matches!(
                    command,
                    Command::WriteCharacteristic(..) | Command::WriteDescriptor(..)
                )
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.commands()
            .iter()
            .filter(|command| matches!(command, Command::Connect(_)))
            .count()
    }

    pub fn emit_scan(&self, event: ScanEvent) -> bool {
        match &self.lock().scan_events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Delivers a transport event on the current link.
    pub fn emit(&self, event: GattEvent) -> bool {
        match &self.lock().gatt_events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn reject_next_scan(&self, failure: ScanFailure) {
        self.lock().reject_scan = Some(failure);
    }

    pub fn reject_connects(&self) {
        self.lock().reject_connect = true;
    }

    pub fn refuse_notifications(&self) {
        self.lock().refuse_notifications = true;
    }

    /// The next issued command is refused with `status`.
    pub fn fail_next_issue(&self, status: GattStatus) {
        self.lock().issue_results.push_back(Err(status));
    }

    /// A handle sharing this adapter's state, for driving the pipeline
    /// without a connection.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl BleAdapter for MockAdapter {
    fn start_scan(
        &self,
        _filters: &[ScanFilter],
        _settings: &ScanSettings,
        events: ScanEventSender,
    ) -> std::result::Result<(), ScanFailure> {
        let mut state = self.lock();
        state.commands.push(Command::StartScan);
        if let Some(failure) = state.reject_scan.take() {
            return Err(failure);
        }
        state.scan_events = Some(events);
        Ok(())
    }

    fn stop_scan(&self) {
        let mut state = self.lock();
        state.commands.push(Command::StopScan);
        state.scan_events = None;
    }

    fn connect(
        &self,
        peripheral: &PeripheralId,
        _options: LinkOptions,
        events: GattEventSender,
    ) -> Result<Box<dyn GattHandle>> {
        let mut state = self.lock();
        state.commands.push(Command::Connect(peripheral.clone()));
        if state.reject_connect {
            return Err(Error::Transport("adapter unavailable".into()));
        }
        state.gatt_events = Some(events);
        Ok(Box::new(self.handle()))
    }
}

pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn issue(&self, command: Command) -> std::result::Result<(), GattStatus> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command);
        state.issue_results.pop_front().unwrap_or(Ok(()))
    }

    fn record(&self, command: Command) {
        self.state.lock().unwrap().commands.push(command);
    }
}

impl GattHandle for MockHandle {
    fn reconnect(&self, events: GattEventSender) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(Command::Reconnect);
        state.gatt_events = Some(events);
        Ok(())
    }

    fn disconnect(&self) {
        self.record(Command::Disconnect);
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.commands.push(Command::Close);
        state.gatt_events = None;
    }

    fn request_mtu(&self, mtu: u16) -> std::result::Result<(), GattStatus> {
        self.issue(Command::RequestMtu(mtu))
    }

    fn discover_attributes(&self) -> std::result::Result<(), GattStatus> {
        self.issue(Command::DiscoverAttributes)
    }

    fn read_characteristic(&self, handle: AttributeHandle) -> std::result::Result<(), GattStatus> {
        self.issue(Command::ReadCharacteristic(handle))
    }

    fn read_descriptor(&self, handle: AttributeHandle) -> std::result::Result<(), GattStatus> {
        self.issue(Command::ReadDescriptor(handle))
    }

    fn write_characteristic(
        &self,
        handle: AttributeHandle,
        value: &[u8],
        write_type: WriteType,
    ) -> std::result::Result<(), GattStatus> {
        self.issue(Command::WriteCharacteristic(handle, value.to_vec(), write_type))
    }

    fn write_descriptor(
        &self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> std::result::Result<(), GattStatus> {
        self.issue(Command::WriteDescriptor(handle, value.to_vec()))
    }

    fn set_notification(&self, handle: AttributeHandle, enabled: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.commands.push(Command::SetNotification(handle, enabled));
        !state.refuse_notifications
    }

    fn request_connection_priority(&self, priority: ConnectionPriority) -> bool {
        self.record(Command::RequestPriority(priority));
        true
    }
}

/// Polls `condition` while letting the paused test clock run forward.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..2_000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
