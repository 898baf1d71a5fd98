use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::model::{CharacteristicInfo, FoundDevice, LinkEndpoint, ServiceInfo};
use super::transport::{BleTransport, TRANSPORT_EVENT_CAPACITY, TransportEvent};
use crate::error::{FixtureError, TransportError};
use crate::handlers::{FrameCodec, LabReading, RgbReading};
use crate::protocol::{
    CommandKind, FRAME_MARKER, FRAME_TERMINATOR, STANDARD_FRAME_LEN, TRANSPORT_CHUNK_SIZE,
    WAKE_BYTE, command_metadata,
};
use crate::utils::format_hex;

const INSTRUMENT_SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
const INSTRUMENT_CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";
const GENERIC_ACCESS_UUID: &str = "00001800-0000-1000-8000-00805f9b34fb";
const DEVICE_NAME_UUID: &str = "00002a00-0000-1000-8000-00805f9b34fb";
const DEFAULT_BUTTON_PRESS_DELAY: Duration = Duration::from_millis(100);

/// Parsed fake scan fixture records (`id|name|rssi;...`, `-` for absent fields).
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<FoundDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Parsed `L,a,b` fixture.
#[derive(Debug, Clone, Copy, derive_more::Into)]
pub struct LabFixture {
    lab: LabReading,
}

impl FromStr for LabFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || FixtureError::InvalidLab {
            value: value.to_string(),
        };
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        let &[l, a, b] = parts.as_slice() else {
            return Err(invalid());
        };
        Ok(Self {
            lab: LabReading { l, a, b },
        })
    }
}

/// How the simulated instrument answers commands.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FakeResponseBehaviour {
    #[default]
    Respond,
    /// Accepts writes but never answers.
    Silent,
    /// Answers with the last byte off by one.
    CorruptChecksum,
}

/// Values reported by the simulated instrument.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct FakeReadings {
    #[builder(default = LabReading { l: 53.24, a: 80.09, b: 67.2 })]
    lab: LabReading,
    #[builder(default = RgbReading { r: 255, g: 0, b: 0 })]
    rgb: RgbReading,
    #[builder(default)]
    spectral_only_lab: bool,
    #[builder(default = 400)]
    wave_start: u16,
    #[builder(default = 10)]
    interval: u8,
    #[builder(default = vec![0.12, 0.18, 0.35, 0.62])]
    samples: Vec<f32>,
    /// Status byte reported by calibration; `0` means success.
    #[builder(default)]
    calibration_status: u8,
    #[builder(default = 1_700_000_000)]
    timestamp: u32,
    #[builder(default = 0x2600)]
    device_code: u16,
}

impl Default for FakeReadings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Settings for constructing a fake transport.
#[derive(Debug, Clone, Builder)]
pub struct FakeBackendConfig {
    #[builder(default = default_devices())]
    devices: Vec<FoundDevice>,
    #[builder(default = default_services())]
    services: Vec<ServiceInfo>,
    #[builder(default)]
    readings: FakeReadings,
    #[builder(default)]
    behaviour: FakeResponseBehaviour,
    /// Fails every link attempt with a link timeout.
    #[builder(default)]
    link_failure: bool,
    /// Whether link-up is confirmed automatically after `create_link`.
    #[builder(default = true)]
    confirm_link: bool,
    #[builder(default = TRANSPORT_CHUNK_SIZE)]
    fragment_size: usize,
    /// Modes of measure-button presses simulated once notifications are enabled.
    #[builder(default)]
    button_presses: Vec<u8>,
    #[builder(default = DEFAULT_BUTTON_PRESS_DELAY)]
    button_press_delay: Duration,
}

impl Default for FakeBackendConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    adapter_open: bool,
    discovering: bool,
    linked: HashSet<String>,
    notifying: Option<LinkEndpoint>,
    inbound: Vec<u8>,
    written: Vec<Vec<u8>>,
    white_calibrated: bool,
    black_calibrated: bool,
}

/// Simulated instrument behind the [`BleTransport`] boundary.
#[derive(Debug)]
pub struct FakeTransport {
    config: FakeBackendConfig,
    events: broadcast::Sender<TransportEvent>,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    #[must_use]
    pub fn new(config: FakeBackendConfig) -> Self {
        let (events, _) = broadcast::channel(TRANSPORT_EVENT_CAPACITY);
        Self {
            config,
            events,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) {
        trace!(?event, "fake transport event");
        // No receivers is fine: nothing is listening yet.
        let _ = self.events.send(event);
    }

    fn emit_adapter_state(&self, state: &FakeState) {
        self.emit(TransportEvent::AdapterStateChanged {
            discovering: state.discovering,
            available: state.adapter_open,
        });
    }

    /// Every chunk written so far, in order.
    #[must_use]
    pub fn written_chunks(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Simulates a press of the instrument's measure button.
    pub fn trigger_spontaneous_measurement(&self, mode: u8) {
        let Some(endpoint) = self.lock().notifying.clone() else {
            debug!("spontaneous measurement dropped: notifications disabled");
            return;
        };
        self.emit(spontaneous_measurement(&endpoint, mode));
    }

    /// Simulates the remote side dropping every link.
    pub fn drop_link(&self) {
        let dropped: Vec<String> = {
            let mut state = self.lock();
            state.notifying = None;
            state.inbound.clear();
            state.linked.drain().collect()
        };
        for device_id in dropped {
            self.emit(TransportEvent::LinkStateChanged {
                device_id,
                connected: false,
            });
        }
    }

    /// Sends a link-up confirmation that was withheld by configuration.
    pub fn confirm_link(&self, device_id: &str) {
        if self.lock().linked.contains(device_id) {
            self.emit(TransportEvent::LinkStateChanged {
                device_id: device_id.to_string(),
                connected: true,
            });
        }
    }

    fn require_link(state: &FakeState, device_id: &str) -> Result<(), TransportError> {
        if state.linked.contains(device_id) {
            Ok(())
        } else {
            Err(TransportError::NotLinked {
                device_id: device_id.to_string(),
            })
        }
    }

    fn respond_to(&self, state: &mut FakeState, frame: &[u8]) -> Option<Vec<u8>> {
        if self.config.behaviour == FakeResponseBehaviour::Silent {
            return None;
        }
        let readings = &self.config.readings;
        let (&opcode, &selector) = (frame.get(1)?, frame.get(2)?);
        let kind = kind_for_opcode(opcode)?;
        let mut response =
            standard_response(kind, selector, command_metadata(kind).response_len());

        match kind {
            CommandKind::GetLab => put_lab(&mut response, 5, readings.lab),
            CommandKind::GetRgb => {
                response[5..7].copy_from_slice(&readings.rgb.r.to_le_bytes());
                response[7..9].copy_from_slice(&readings.rgb.g.to_le_bytes());
                response[9..11].copy_from_slice(&readings.rgb.b.to_le_bytes());
            }
            CommandKind::GetSpectral => {
                response[3] = u8::from(readings.spectral_only_lab);
                if !readings.spectral_only_lab {
                    response[4..6].copy_from_slice(&readings.wave_start.to_be_bytes());
                    response[6] = readings.interval;
                    response[7] = u8::try_from(readings.samples.len()).unwrap_or(u8::MAX);
                    for (index, sample) in readings.samples.iter().enumerate() {
                        let offset = 8 + index * 4;
                        if let Some(slot) = response.get_mut(offset..offset + 4) {
                            slot.copy_from_slice(&sample.to_le_bytes());
                        }
                    }
                }
                put_lab(&mut response, 184, readings.lab);
            }
            CommandKind::WhiteCalibration | CommandKind::BlackCalibration => {
                response[2] = readings.calibration_status;
                response[3..7].copy_from_slice(&readings.timestamp.to_le_bytes());
                if readings.calibration_status == 0 {
                    if kind == CommandKind::WhiteCalibration {
                        state.white_calibrated = true;
                    } else {
                        state.black_calibrated = true;
                    }
                }
            }
            CommandKind::GetCalibrationInfo => {
                response[2] = u8::from(state.white_calibrated);
                response[3..7].copy_from_slice(&readings.timestamp.to_le_bytes());
                response[7] = u8::from(state.black_calibrated);
                response[8..12].copy_from_slice(&readings.timestamp.to_le_bytes());
            }
            CommandKind::GetDeviceInfo => {
                response[5..7].copy_from_slice(&readings.device_code.to_le_bytes());
            }
            CommandKind::Measure | CommandKind::Wake => {}
        }

        FrameCodec::apply_sign(&mut response);
        if self.config.behaviour == FakeResponseBehaviour::CorruptChecksum
            && let Some(last) = response.last_mut()
        {
            *last = last.wrapping_add(1);
        }
        Some(response)
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn open_adapter(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.adapter_open = true;
        self.emit_adapter_state(&state);
        Ok(())
    }

    async fn close_adapter(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.adapter_open = false;
        state.discovering = false;
        self.emit_adapter_state(&state);
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.adapter_open {
            return Err(TransportError::AdapterClosed);
        }
        state.discovering = true;
        self.emit_adapter_state(&state);
        for device in &self.config.devices {
            self.emit(TransportEvent::DeviceDiscovered(device.clone()));
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.discovering {
            state.discovering = false;
            self.emit_adapter_state(&state);
        }
        Ok(())
    }

    async fn create_link(&self, device_id: &str, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.adapter_open {
            return Err(TransportError::AdapterClosed);
        }
        if !self
            .config
            .devices
            .iter()
            .any(|device| device.device_id() == device_id)
        {
            return Err(TransportError::UnknownDevice {
                device_id: device_id.to_string(),
            });
        }
        if self.config.link_failure {
            return Err(TransportError::LinkTimeout {
                device_id: device_id.to_string(),
                timeout,
            });
        }

        state.linked.insert(device_id.to_string());
        drop(state);
        if self.config.confirm_link {
            self.confirm_link(device_id);
        }
        Ok(())
    }

    async fn close_link(&self, device_id: &str) -> Result<(), TransportError> {
        let was_linked = {
            let mut state = self.lock();
            if state
                .notifying
                .as_ref()
                .is_some_and(|endpoint| endpoint.device_id() == device_id)
            {
                state.notifying = None;
                state.inbound.clear();
            }
            state.linked.remove(device_id)
        };
        if was_linked {
            self.emit(TransportEvent::LinkStateChanged {
                device_id: device_id.to_string(),
                connected: false,
            });
        }
        Ok(())
    }

    async fn services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, TransportError> {
        Self::require_link(&self.lock(), device_id)?;
        Ok(self.config.services.clone())
    }

    async fn characteristics(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<CharacteristicInfo>, TransportError> {
        Self::require_link(&self.lock(), device_id)?;
        self.config
            .services
            .iter()
            .find(|service| service.uuid() == service_uuid)
            .map(|service| service.characteristics().to_vec())
            .ok_or_else(|| TransportError::UnknownService {
                service_uuid: service_uuid.to_string(),
            })
    }

    async fn write(&self, endpoint: &LinkEndpoint, value: &[u8]) -> Result<(), TransportError> {
        let mut responses = Vec::new();
        let notifying = {
            let mut state = self.lock();
            Self::require_link(&state, endpoint.device_id())?;
            state.written.push(value.to_vec());
            state.inbound.extend_from_slice(value);

            loop {
                match state.inbound.first() {
                    Some(&WAKE_BYTE) => {
                        state.inbound.remove(0);
                    }
                    Some(&FRAME_MARKER) if state.inbound.len() >= STANDARD_FRAME_LEN => {
                        let frame: Vec<u8> = state.inbound.drain(..STANDARD_FRAME_LEN).collect();
                        trace!(frame = %format_hex(&frame), "fake instrument received frame");
                        let terminated = frame.get(8) == Some(&FRAME_TERMINATOR);
                        if terminated
                            && FrameCodec::validate(&frame)
                            && let Some(response) = self.respond_to(&mut state, &frame)
                        {
                            responses.push(response);
                        }
                    }
                    Some(&FRAME_MARKER) | None => break,
                    Some(_) => {
                        state.inbound.remove(0);
                    }
                }
            }
            state.notifying.clone()
        };

        let Some(notifying) = notifying else {
            return Ok(());
        };
        for response in responses {
            for fragment in FrameCodec::chunk(&response, self.config.fragment_size) {
                self.emit(TransportEvent::ValueChanged {
                    device_id: notifying.device_id().to_string(),
                    characteristic_uuid: notifying.characteristic_uuid().to_string(),
                    value: fragment,
                });
            }
        }
        Ok(())
    }

    async fn set_notify(
        &self,
        endpoint: &LinkEndpoint,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::require_link(&state, endpoint.device_id())?;
        let supports_notify = self
            .config
            .services
            .iter()
            .flat_map(ServiceInfo::characteristics)
            .any(|characteristic| {
                characteristic.uuid() == endpoint.characteristic_uuid()
                    && characteristic.has_property("notify")
            });
        if !supports_notify {
            return Err(TransportError::Rejected {
                operation: "set_notify",
            });
        }
        state.notifying = enabled.then(|| endpoint.clone());
        drop(state);

        if enabled && !self.config.button_presses.is_empty() {
            let events = self.events.clone();
            let endpoint = endpoint.clone();
            let presses = self.config.button_presses.clone();
            let delay = self.config.button_press_delay;
            tokio::spawn(async move {
                for mode in presses {
                    sleep(delay).await;
                    debug!(mode, "simulating measure button press");
                    let _ = events.send(spontaneous_measurement(&endpoint, mode));
                }
            });
        }
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

fn kind_for_opcode(opcode: u8) -> Option<CommandKind> {
    use strum::IntoEnumIterator;

    CommandKind::iter()
        .filter(|kind| *kind != CommandKind::Wake)
        .find(|kind| command_metadata(*kind).opcode() == opcode)
}

fn spontaneous_measurement(endpoint: &LinkEndpoint, mode: u8) -> TransportEvent {
    let mut frame = standard_response(CommandKind::Measure, mode, STANDARD_FRAME_LEN);
    FrameCodec::apply_sign(&mut frame);
    TransportEvent::ValueChanged {
        device_id: endpoint.device_id().to_string(),
        characteristic_uuid: endpoint.characteristic_uuid().to_string(),
        value: frame,
    }
}

fn standard_response(kind: CommandKind, selector: u8, len: usize) -> Vec<u8> {
    let mut response = vec![0x00; len];
    response[0] = FRAME_MARKER;
    response[1] = command_metadata(kind).opcode();
    response[2] = selector;
    response
}

fn put_lab(response: &mut [u8], offset: usize, lab: LabReading) {
    for (index, value) in [lab.l, lab.a, lab.b].into_iter().enumerate() {
        let start = offset + index * 4;
        response[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FoundDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FoundDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let &[device_id, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if device_id.is_empty() || name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (name != "-").then(|| name.to_string());
    let rssi = if rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(FoundDevice::new(device_id.to_string(), local_name, rssi))
}

fn default_devices() -> Vec<FoundDevice> {
    vec![
        FoundDevice::new(
            "AA:BB:CC:DD:EE:01".to_string(),
            Some("CM-2600d".to_string()),
            Some(-48),
        ),
        FoundDevice::new(
            "11:22:33:44:55:66".to_string(),
            Some("Speaker".to_string()),
            Some(-70),
        ),
    ]
}

fn default_services() -> Vec<ServiceInfo> {
    vec![
        ServiceInfo::new(
            GENERIC_ACCESS_UUID,
            true,
            vec![CharacteristicInfo::new(
                DEVICE_NAME_UUID,
                vec!["read".to_string()],
            )],
        ),
        ServiceInfo::new(
            INSTRUMENT_SERVICE_UUID,
            true,
            vec![CharacteristicInfo::new(
                INSTRUMENT_CHARACTERISTIC_UUID,
                vec![
                    "read".to_string(),
                    "write".to_string(),
                    "write_without_response".to_string(),
                    "notify".to_string(),
                ],
            )],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::handlers::{Command, FrameCodecError, ReadingDecoder};

    #[rstest]
    #[case("AA|CM-1|-43", 1)]
    #[case("AA|CM-1|-43;BB|Speaker|-55", 2)]
    #[case("AA|-|-", 1)]
    fn parse_scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let devices = parse_scan_fixture(fixture).expect("fixture should parse");
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn parse_scan_fixture_rejects_invalid_field_count() {
        let result = parse_scan_fixture("hci0|AA:BB|CM-1|-43");
        assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount));
    }

    #[test]
    fn parse_scan_fixture_rejects_bad_rssi() {
        let result = parse_scan_fixture("AA|CM-1|loud");
        assert_matches!(result, Err(FixtureError::InvalidRssi(_)));
    }

    #[rstest]
    #[case("50,1.5,-2")]
    #[case(" 50 , 1.5 , -2 ")]
    fn lab_fixture_parses_triples(#[case] raw: &str) {
        let lab: LabReading = raw
            .parse::<LabFixture>()
            .expect("lab fixture should parse")
            .into();
        assert_eq!(
            LabReading {
                l: 50.0,
                a: 1.5,
                b: -2.0,
            },
            lab
        );
    }

    #[rstest]
    #[case("50,1.5")]
    #[case("50,1.5,x")]
    #[case("")]
    fn lab_fixture_rejects_malformed_input(#[case] raw: &str) {
        assert_matches!(raw.parse::<LabFixture>(), Err(FixtureError::InvalidLab { .. }));
    }

    fn respond(
        transport: &FakeTransport,
        command: Result<Command, FrameCodecError>,
    ) -> Vec<u8> {
        let command = command.expect("command should frame");
        let mut state = transport.lock();
        transport
            .respond_to(&mut state, &command.signed_content())
            .expect("fake instrument should answer")
    }

    #[test]
    fn responses_decode_to_configured_readings() {
        let readings = FakeReadings::default();
        let transport = FakeTransport::new(FakeBackendConfig::default());

        let lab = respond(&transport, Command::get_lab(0));
        assert_eq!(20, lab.len());
        assert!(FrameCodec::validate(&lab));
        assert_eq!(
            readings.lab,
            ReadingDecoder::decode_lab(&lab).expect("lab should decode")
        );

        let rgb = respond(&transport, Command::get_rgb(0));
        assert_eq!(
            readings.rgb,
            ReadingDecoder::decode_rgb(&rgb).expect("rgb should decode")
        );

        let spectral = respond(&transport, Command::get_spectral(0));
        let decoded = ReadingDecoder::decode_spectral(&spectral).expect("spectral should decode");
        assert_eq!(Some(readings.wave_start), decoded.wave_start);
        assert_eq!(Some(readings.samples.clone()), decoded.samples);
    }

    #[test]
    fn calibration_updates_reported_info() {
        let transport = FakeTransport::new(FakeBackendConfig::default());
        respond(&transport, Command::white_calibration(true));

        let info = respond(&transport, Command::calibration_info());
        let decoded =
            ReadingDecoder::decode_calibration_info(&info).expect("calibration info should decode");
        assert!(decoded.white_calibrated);
        assert!(!decoded.black_calibrated);
    }

    #[test]
    fn corrupt_behaviour_breaks_checksum() {
        let transport = FakeTransport::new(
            FakeBackendConfig::builder()
                .behaviour(FakeResponseBehaviour::CorruptChecksum)
                .build(),
        );
        let response = respond(&transport, Command::get_lab(0));
        assert!(!FrameCodec::validate(&response));
    }

    #[tokio::test]
    async fn write_requires_link() {
        let transport = FakeTransport::new(FakeBackendConfig::default());
        let endpoint = LinkEndpoint::new(
            "AA:BB:CC:DD:EE:01",
            INSTRUMENT_SERVICE_UUID,
            INSTRUMENT_CHARACTERISTIC_UUID,
        );
        assert_matches!(
            transport.write(&endpoint, &[WAKE_BYTE]).await,
            Err(TransportError::NotLinked { .. })
        );
    }
}
