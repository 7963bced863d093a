//! Bluetooth LE scanning
//!
//! [`ScanManager`] runs at most one scan session at a time. A session lasts
//! for the requested duration unless it is stopped or cancelled early, and
//! its results arrive on the returned [`ScanStream`], which ends when the
//! session does. Every delivered peripheral is also recorded in the shared
//! [`DeviceRegistry`].

use crate::adapter::{
    BleAdapter, DiscoveredPeripheral, PeripheralId, ScanEvent, ScanFilter, ScanSettings,
};
use crate::registry::DeviceRegistry;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Why a scan could not start or stopped early.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    #[error("A scan is already running")]
    AlreadyStarted,

    #[error("The application could not be registered for scanning")]
    ApplicationRegistrationFailed,

    #[error("The scanner reported an internal error")]
    InternalError,

    #[error("This adapter does not support the requested scan")]
    FeatureUnsupported,

    #[error("The adapter ran out of scanning resources")]
    OutOfHardwareResources,

    #[error("Scans are being started too frequently")]
    ScanningTooFrequently,

    #[error("Unknown scan failure code {0}")]
    Unknown(i32),
}

impl ScanFailure {
    /// The transport's numeric failure code.
    pub fn code(&self) -> i32 {
        match self {
            ScanFailure::AlreadyStarted => 1,
            ScanFailure::ApplicationRegistrationFailed => 2,
            ScanFailure::InternalError => 3,
            ScanFailure::FeatureUnsupported => 4,
            ScanFailure::OutOfHardwareResources => 5,
            ScanFailure::ScanningTooFrequently => 6,
            ScanFailure::Unknown(code) => *code,
        }
    }
}

impl From<i32> for ScanFailure {
    fn from(code: i32) -> Self {
        match code {
            1 => ScanFailure::AlreadyStarted,
            2 => ScanFailure::ApplicationRegistrationFailed,
            3 => ScanFailure::InternalError,
            4 => ScanFailure::FeatureUnsupported,
            5 => ScanFailure::OutOfHardwareResources,
            6 => ScanFailure::ScanningTooFrequently,
            other => ScanFailure::Unknown(other),
        }
    }
}

pub type ScanPredicate = Arc<dyn Fn(&DiscoveredPeripheral) -> bool + Send + Sync>;
pub type ScanFailureCallback = Box<dyn FnOnce(ScanFailure) + Send>;

/// Discovered peripherals of one scan session.
pub type ScanStream = UnboundedReceiverStream<DiscoveredPeripheral>;

/// Parameters of one scan session.
pub struct ScanRequest {
    pub duration: Duration,
    /// Deliver every report instead of each peripheral once
    pub allow_duplicates: bool,
    pub filters: Vec<ScanFilter>,
    pub settings: ScanSettings,
    predicate: Option<ScanPredicate>,
    on_failure: Option<ScanFailureCallback>,
}

impl ScanRequest {
    /// A session lasting `duration` that delivers each peripheral once.
    pub fn new(duration: Duration) -> Self {
        ScanRequest {
            duration,
            allow_duplicates: false,
            filters: Vec::new(),
            settings: ScanSettings::default(),
            predicate: None,
            on_failure: None,
        }
    }

    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn filter(mut self, filter: ScanFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Only deliver reports for which `predicate` returns `true`.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DiscoveredPeripheral) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Called if the adapter reports a failure after the scan started.
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ScanFailure) + Send + 'static,
    {
        self.on_failure = Some(Box::new(callback));
        self
    }
}

struct ActiveScan {
    session: u64,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ScanState {
    active: Option<ActiveScan>,
    sessions: u64,
}

struct ScanInner {
    adapter: Arc<dyn BleAdapter>,
    registry: Arc<DeviceRegistry>,
    state: Mutex<ScanState>,
    enabled: watch::Sender<bool>,
}

impl ScanInner {
    /// Ends `session` if it is still the active one.
    async fn finish(&self, session: u64) {
        let mut state = self.state.lock().await;
        if state.active.as_ref().map(|scan| scan.session) == Some(session) {
            state.active = None;
            self.adapter.stop_scan();
            info!("Scan session {} stopped", session);
        }
    }
}

#[derive(Clone)]
pub struct ScanManager {
    inner: Arc<ScanInner>,
}

impl ScanManager {
    /// Creates a manager that records discoveries in `registry`.
    pub fn new(adapter: Arc<dyn BleAdapter>, registry: Arc<DeviceRegistry>) -> Self {
        let (enabled, _) = watch::channel(true);
        ScanManager {
            inner: Arc::new(ScanInner {
                adapter,
                registry,
                state: Mutex::new(ScanState::default()),
                enabled,
            }),
        }
    }

    /// The registry every delivered peripheral is recorded in.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Records whether the platform's Bluetooth radio is on. Scans cannot
    /// start while it is off.
    pub fn set_adapter_enabled(&self, enabled: bool) {
        self.inner.enabled.send_replace(enabled);
    }

    /// Watches the radio state set through
    /// [`ScanManager::set_adapter_enabled`].
    pub fn adapter_enabled(&self) -> watch::Receiver<bool> {
        self.inner.enabled.subscribe()
    }

    /// Whether a scan session is running.
    pub async fn is_scanning(&self) -> bool {
        self.inner.state.lock().await.active.is_some()
    }

    /// Starts a scan session.
    ///
    /// Fails with [`ScanFailure::AlreadyStarted`] without touching the
    /// adapter while another session is running.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<ScanStream, ScanFailure> {
        if !*self.inner.enabled.borrow() {
            error!("Cannot scan: Bluetooth is disabled");
            return Err(ScanFailure::InternalError);
        }

        let mut state = self.inner.state.lock().await;
        if state.active.is_some() {
            warn!("Scan requested while another scan is running");
            return Err(ScanFailure::AlreadyStarted);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.inner
            .adapter
            .start_scan(&request.filters, &request.settings, events_tx)
            .map_err(|failure| {
                error!("Adapter refused to scan: {}", failure);
                failure
            })?;

        state.sessions += 1;
        let session = state.sessions;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.active = Some(ActiveScan {
            session,
            cancel: Some(cancel_tx),
        });

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        info!(
            "Scan session {} started for {:?}",
            session, request.duration
        );
        tokio::spawn(run_session(
            Arc::clone(&self.inner),
            session,
            request,
            events_rx,
            cancel_rx,
            results_tx,
        ));

        Ok(UnboundedReceiverStream::new(results_rx))
    }

    /// Stops the running scan, if any.
    pub async fn request_stop_scan(&self) {
        let mut state = self.inner.state.lock().await;
        match state.active.take() {
            Some(scan) => {
                self.inner.adapter.stop_scan();
                info!("Scan session {} stopped on request", scan.session);
            }
            None => debug!("No scan to stop"),
        }
    }

    /// Ends the running scan before its duration expires.
    pub async fn cancel_scan(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(cancel) = state.active.as_mut().and_then(|scan| scan.cancel.take()) {
            debug!("Scan cancel requested");
            let _ = cancel.send(());
        }
    }
}

async fn run_session(
    inner: Arc<ScanInner>,
    session: u64,
    request: ScanRequest,
    mut events: mpsc::UnboundedReceiver<ScanEvent>,
    mut cancel: oneshot::Receiver<()>,
    results: mpsc::UnboundedSender<DiscoveredPeripheral>,
) {
    let ScanRequest {
        duration,
        allow_duplicates,
        predicate,
        mut on_failure,
        ..
    } = request;
    let mut seen: HashSet<PeripheralId> = HashSet::new();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Scan duration expired");
                break;
            }
            // fires on cancel and when a stop request drops the sender
            _ = &mut cancel => break,
            event = events.recv() => match event {
                Some(ScanEvent::Discovered(peripheral)) => {
                    if let Some(predicate) = &predicate {
                        if !predicate(&peripheral) {
                            continue;
                        }
                    }
                    if !allow_duplicates && !seen.insert(peripheral.id.clone()) {
                        continue;
                    }
                    if inner.registry.record(&peripheral) {
                        debug!("Discovered {} ({} dBm)", peripheral.id, peripheral.rssi);
                    }
                    // a dropped stream does not end the session
                    let _ = results.send(peripheral);
                }
                Some(ScanEvent::Failed(failure)) => {
                    warn!("Scan failed: {}", failure);
                    if let Some(callback) = on_failure.take() {
                        callback(failure);
                    }
                    break;
                }
                None => {
                    debug!("Adapter closed the scan channel");
                    break;
                }
            },
        }
    }

    inner.finish(session).await;
}
