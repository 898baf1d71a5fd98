use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{ExchangeError, InteractionError, ProtocolError};
use crate::events::{DeviceEvent, EventBus, EventStream};
use crate::handlers::{
    CalibrationInfo, CalibrationOutcome, Command, DeviceInfo, LabReading, ReadingDecoder,
    RgbReading, SpectralReading,
};
use crate::hw::{
    BleTransport, CommandExecutor, ConnectionState, ConnectionStateMachine, FoundDevice,
    FragmentDisposition, LinkEndpoint, TransportEvent, first_match, scan,
};
use crate::notification::{NotificationHandler, NotifyEvent};
use crate::protocol::{
    CommandKind, DEFAULT_CHARACTERISTIC_PREFIX, DEFAULT_LINK_TIMEOUT, DEFAULT_NAME_PREFIX,
    DEFAULT_SCAN_DURATION, DEFAULT_SERVICE_PREFIX, DEFAULT_SETTLE_DELAY, PrefixRule,
    TRANSPORT_CHUNK_SIZE,
};
use crate::utils::format_hex;

/// Tunables for one [`InstrumentSession`].
///
/// ```
/// use std::time::Duration;
///
/// use colorimeter::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .settle_delay(Duration::from_millis(10))
///     .build();
/// assert_eq!("CM", config.name_rule().as_str());
/// assert_eq!(Duration::from_millis(10), config.settle_delay());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    #[builder(default = PrefixRule::exact(DEFAULT_NAME_PREFIX))]
    name_rule: PrefixRule,
    #[builder(default = PrefixRule::ignore_ascii_case(DEFAULT_SERVICE_PREFIX))]
    service_rule: PrefixRule,
    #[builder(default = PrefixRule::ignore_ascii_case(DEFAULT_CHARACTERISTIC_PREFIX))]
    characteristic_rule: PrefixRule,
    #[builder(default = TRANSPORT_CHUNK_SIZE)]
    chunk_size: usize,
    #[builder(default = DEFAULT_SETTLE_DELAY)]
    settle_delay: Duration,
    #[builder(default = DEFAULT_LINK_TIMEOUT)]
    link_timeout: Duration,
    #[builder(default = DEFAULT_SCAN_DURATION)]
    scan_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn name_rule(&self) -> &PrefixRule {
        &self.name_rule
    }

    #[must_use]
    pub fn service_rule(&self) -> &PrefixRule {
        &self.service_rule
    }

    #[must_use]
    pub fn characteristic_rule(&self) -> &PrefixRule {
        &self.characteristic_rule
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Pause between the wake byte and the command that follows it.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    #[must_use]
    pub fn link_timeout(&self) -> Duration {
        self.link_timeout
    }

    #[must_use]
    pub fn scan_duration(&self) -> Duration {
        self.scan_duration
    }
}

/// Last adapter state reported by the transport.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct AdapterStatus {
    pub discovering: bool,
    pub available: bool,
}

impl Default for AdapterStatus {
    fn default() -> Self {
        Self {
            discovering: false,
            available: true,
        }
    }
}

struct SessionCore {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    executor: Arc<CommandExecutor>,
    connection: ConnectionStateMachine,
    bus: EventBus,
    adapter: Mutex<AdapterStatus>,
    measure_id: AtomicU32,
}

impl SessionCore {
    fn adapter(&self) -> MutexGuard<'_, AdapterStatus> {
        self.adapter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged {
                discovering,
                available,
            } => {
                *self.adapter() = AdapterStatus {
                    discovering,
                    available,
                };
                self.bus.publish(&DeviceEvent::StateUpdate {
                    discovering,
                    available,
                });
            }
            TransportEvent::LinkStateChanged {
                device_id,
                connected,
            } => self.connection.on_link_state(&device_id, connected),
            TransportEvent::ValueChanged {
                device_id, value, ..
            } => self.on_value(&device_id, &value),
            TransportEvent::DeviceDiscovered(_) => {}
        }
    }

    fn on_value(&self, device_id: &str, value: &[u8]) {
        let from_current = match self.connection.state() {
            ConnectionState::Connecting { device_id: current } => current == device_id,
            ConnectionState::Connected(endpoint) => endpoint.device_id() == device_id,
            ConnectionState::Disconnected => false,
        };
        if !from_current {
            trace!(device_id, "ignoring value from a device we are not linked to");
            return;
        }
        if self.executor.on_fragment(value) == FragmentDisposition::Consumed {
            return;
        }

        match NotificationHandler::decode(value) {
            Ok(NotifyEvent::SpontaneousMeasurement { mode }) => {
                info!(mode, "instrument measured on its own");
                self.bus
                    .publish(&DeviceEvent::SpontaneousMeasurement { mode });
            }
            Ok(NotifyEvent::Unknown(payload)) => {
                debug!(payload = %format_hex(&payload), "ignoring unsolicited notification");
            }
            Err(error) => debug!(%error, "undecodable notification"),
        }
    }
}

async fn pump_events(
    core: Arc<SessionCore>,
    mut events: broadcast::Receiver<TransportEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport events lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        core.route(event);
    }
    debug!("session event pump stopped");
}

/// One colorimeter session over a transport.
///
/// Every reading operation runs the same sequence: wake byte, settle delay,
/// command, decode. Only one command may be outstanding at a time.
pub struct InstrumentSession {
    core: Arc<SessionCore>,
    shutdown: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl InstrumentSession {
    /// Opens the adapter and starts routing transport events.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter cannot be opened.
    #[instrument(skip_all, level = "debug")]
    pub async fn open(
        transport: Arc<dyn BleTransport>,
        config: SessionConfig,
    ) -> Result<Self, InteractionError> {
        let bus = EventBus::new();
        let executor = Arc::new(CommandExecutor::new(
            transport.clone(),
            config.chunk_size(),
        ));
        let connection = ConnectionStateMachine::new(
            transport.clone(),
            executor.clone(),
            bus.clone(),
            config.service_rule().clone(),
            config.characteristic_rule().clone(),
            config.link_timeout(),
        );
        let core = Arc::new(SessionCore {
            transport,
            config,
            executor,
            connection,
            bus,
            adapter: Mutex::new(AdapterStatus::default()),
            measure_id: AtomicU32::new(1),
        });

        let events = core.transport.subscribe_events();
        let shutdown = CancellationToken::new();
        let pump = tokio::spawn(pump_events(core.clone(), events, shutdown.clone()));
        let session = Self {
            core,
            shutdown,
            pump: Some(pump),
        };
        session.core.transport.open_adapter().await?;
        Ok(session)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.core.bus
    }

    /// Shorthand for `events().stream()`.
    #[must_use]
    pub fn stream(&self) -> EventStream {
        self.core.bus.stream()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    #[must_use]
    pub fn adapter_status(&self) -> AdapterStatus {
        *self.core.adapter()
    }

    /// Lists instruments seen during one discovery window.
    ///
    /// # Errors
    ///
    /// Returns an error when discovery fails.
    pub async fn scan(&self) -> Result<Vec<FoundDevice>, InteractionError> {
        scan(
            self.core.transport.as_ref(),
            self.core.config.name_rule(),
            self.core.config.scan_duration(),
        )
        .await
    }

    /// Connects to `device_id` and waits for the link to be confirmed.
    ///
    /// # Errors
    ///
    /// Returns the failing connection step's error; the session is then
    /// disconnected.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(&self, device_id: &str) -> Result<LinkEndpoint, InteractionError> {
        self.core.connection.connect(device_id).await?;
        self.core
            .connection
            .wait_until_connected(device_id, self.core.config.link_timeout())
            .await
    }

    /// Connects to the first instrument whose name matches the configured rule.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::NoMatchingDevice`] when discovery finds none,
    /// or any connection error.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect_first(&self) -> Result<FoundDevice, InteractionError> {
        let device = first_match(
            self.core.transport.as_ref(),
            self.core.config.name_rule(),
            self.core.config.scan_duration(),
        )
        .await?;
        self.connect(device.device_id()).await?;
        Ok(device)
    }

    /// Closes the current or pending link and cancels any outstanding command.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the link cannot be closed.
    pub async fn disconnect(&self) -> Result<(), InteractionError> {
        self.core.connection.disconnect().await
    }

    /// Disconnects, stops event routing and closes the adapter.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later steps still run.
    #[instrument(skip(self), level = "debug")]
    pub async fn dispose(mut self) -> Result<(), InteractionError> {
        let disconnected = self.disconnect().await;
        self.shutdown.cancel();
        if let Some(pump) = self.pump.take()
            && let Err(error) = pump.await
        {
            debug!(%error, "event pump ended abnormally");
        }
        let closed = self.core.transport.close_adapter().await;
        disconnected?;
        closed?;
        Ok(())
    }

    /// Sends the wake byte.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::NotConnected`] without a confirmed link, or
    /// the write failure.
    pub async fn wake(&self) -> Result<(), ProtocolError> {
        self.exchange(&Command::wake()).await?;
        Ok(())
    }

    /// Triggers a measurement in `mode`.
    ///
    /// Each call carries the next per-session measure id; the first is 2.
    ///
    /// # Errors
    ///
    /// Returns exchange failures such as timeouts or bad checksums.
    #[instrument(skip(self), level = "debug")]
    pub async fn measure(&self, mode: u8) -> Result<(), ProtocolError> {
        let measure_id = self.core.measure_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.wake_then(&Command::measure(mode, measure_id)?).await?;
        Ok(())
    }

    /// Reads the Lab values of the last measurement.
    ///
    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_lab(&self, mode: u8) -> Result<LabReading, ProtocolError> {
        let response = self.wake_then(&Command::get_lab(mode)?).await?;
        Ok(ReadingDecoder::decode_lab(&response)?)
    }

    /// Reads the RGB values of the last measurement.
    ///
    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_rgb(&self, mode: u8) -> Result<RgbReading, ProtocolError> {
        let response = self.wake_then(&Command::get_rgb(mode)?).await?;
        Ok(ReadingDecoder::decode_rgb(&response)?)
    }

    /// Reads the spectral curve of the last measurement.
    ///
    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_spectral(&self, mode: u8) -> Result<SpectralReading, ProtocolError> {
        let response = self.wake_then(&Command::get_spectral(mode)?).await?;
        Ok(ReadingDecoder::decode_spectral(&response)?)
    }

    /// # Errors
    ///
    /// Returns failures from either step.
    pub async fn measure_and_get_lab(&self, mode: u8) -> Result<LabReading, ProtocolError> {
        self.measure(mode).await?;
        self.settle().await;
        self.get_lab(mode).await
    }

    /// # Errors
    ///
    /// Returns failures from either step.
    pub async fn measure_and_get_rgb(&self, mode: u8) -> Result<RgbReading, ProtocolError> {
        self.measure(mode).await?;
        self.settle().await;
        self.get_rgb(mode).await
    }

    /// # Errors
    ///
    /// Returns failures from either step.
    pub async fn measure_and_get_spectral(
        &self,
        mode: u8,
    ) -> Result<SpectralReading, ProtocolError> {
        self.measure(mode).await?;
        self.settle().await;
        self.get_spectral(mode).await
    }

    /// Runs white calibration; with `verify` the status byte decides success.
    ///
    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn white_calibrate(&self, verify: bool) -> Result<CalibrationOutcome, ProtocolError> {
        let response = self
            .wake_then(&Command::white_calibration(verify)?)
            .await?;
        Ok(ReadingDecoder::decode_calibration(
            CommandKind::WhiteCalibration,
            &response,
            verify,
        )?)
    }

    /// Runs black calibration; with `verify` the status byte decides success.
    ///
    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn black_calibrate(&self, verify: bool) -> Result<CalibrationOutcome, ProtocolError> {
        let response = self
            .wake_then(&Command::black_calibration(verify)?)
            .await?;
        Ok(ReadingDecoder::decode_calibration(
            CommandKind::BlackCalibration,
            &response,
            verify,
        )?)
    }

    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_calibration_info(&self) -> Result<CalibrationInfo, ProtocolError> {
        let response = self.wake_then(&Command::calibration_info()?).await?;
        Ok(ReadingDecoder::decode_calibration_info(&response)?)
    }

    /// # Errors
    ///
    /// Returns exchange or decode failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_device_info(&self) -> Result<DeviceInfo, ProtocolError> {
        let response = self.wake_then(&Command::device_info()?).await?;
        Ok(ReadingDecoder::decode_device_info(&response)?)
    }

    async fn settle(&self) {
        sleep(self.core.config.settle_delay()).await;
    }

    async fn wake_then(&self, command: &Command) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(&Command::wake()).await?;
        self.settle().await;
        self.exchange(command).await
    }

    async fn exchange(&self, command: &Command) -> Result<Vec<u8>, ExchangeError> {
        let endpoint = self
            .core
            .connection
            .endpoint()
            .ok_or(ExchangeError::NotConnected)?;
        self.core.executor.execute(&endpoint, command).await
    }
}

impl Drop for InstrumentSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_matches_instrument_defaults() {
        let config = SessionConfig::default();

        assert_eq!("CM", config.name_rule().as_str());
        assert!(!config.name_rule().matches("cm-2600d"));
        assert!(config.service_rule().matches("0000ffe0-0000-1000-8000-00805f9b34fb"));
        assert!(config.characteristic_rule().matches("0000FFE1-0000-1000-8000-00805F9B34FB"));
        assert_eq!(20, config.chunk_size());
        assert_eq!(Duration::from_millis(50), config.settle_delay());
        assert_eq!(Duration::from_millis(2000), config.link_timeout());
        assert_eq!(Duration::from_secs(10), config.scan_duration());
    }

    #[test]
    fn adapter_starts_available_and_idle() {
        assert_eq!(
            AdapterStatus {
                discovering: false,
                available: true
            },
            AdapterStatus::default()
        );
    }
}
