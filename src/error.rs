use std::time::Duration;

use derive_more::From;
use thiserror::Error;

use crate::handlers::{DecodeError, FrameCodecError};
use crate::protocol::CommandKind;

/// Errors raised by the host BLE transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the BLE adapter is not open")]
    AdapterClosed,
    #[error("device `{device_id}` is not known to the adapter")]
    UnknownDevice { device_id: String },
    #[error("service `{service_uuid}` is not present on the device")]
    UnknownService { service_uuid: String },
    #[error("characteristic `{characteristic_uuid}` is not present on the device")]
    UnknownCharacteristic { characteristic_uuid: String },
    #[error("link to `{device_id}` was not established within {}", humantime::format_duration(*timeout))]
    LinkTimeout { device_id: String, timeout: Duration },
    #[error("link dropped before it was confirmed")]
    LinkDropped,
    #[error("device `{device_id}` has no open link")]
    NotLinked { device_id: String },
    #[error("transport rejected `{operation}`")]
    Rejected { operation: &'static str },
}

/// Errors returned by connection lifecycle operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to connect to `{device_id}`")]
    ConnectionFailed {
        device_id: String,
        source: TransportError,
    },
    #[error("no service matching `{prefix}*` was found")]
    ServiceUnavailable { prefix: String },
    #[error("no characteristic matching `{prefix}*` was found")]
    CharacteristicUnavailable { prefix: String },
    #[error("already connected or connecting to `{device_id}`")]
    AlreadyConnected { device_id: String },
    #[error("no instrument matching `{prefix}*` was discovered")]
    NoMatchingDevice { prefix: String },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned by a single command exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("`{active}` is still awaiting its response")]
    Busy { active: CommandKind },
    #[error("`{kind}` got no complete response within {}", humantime::format_duration(*timeout))]
    ResponseTimeout { kind: CommandKind, timeout: Duration },
    #[error("`{kind}` response failed checksum validation")]
    InvalidChecksum { kind: CommandKind },
    #[error("exchange cancelled by disconnect")]
    Disconnected,
    #[error("no instrument is connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("Lab fixture must be three comma-separated numbers, got `{value}`")]
    InvalidLab { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("fake fixtures (--fake-scan, --fake-lab, --fake-presses) require --fake")]
    FakeFixtureWithoutFake,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(DecodeError, Box<DecodeError>)]
    Decode(Box<DecodeError>),
    #[error(transparent)]
    #[from(ExchangeError, Box<ExchangeError>)]
    Exchange(Box<ExchangeError>),
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
}

impl From<TransportError> for ProtocolError {
    fn from(error: TransportError) -> Self {
        Self::Interaction(Box::new(InteractionError::Transport(error)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn frame_layout_errors_surface_through_protocol_error() {
        let error = ProtocolError::from(FrameCodecError::EmptyContent);

        assert_matches!(
            &error,
            ProtocolError::FrameCodec(source) if **source == FrameCodecError::EmptyContent
        );
        assert_eq!("command content must not be empty", error.to_string());
    }

    #[test]
    fn transport_errors_surface_as_interaction_errors() {
        let error = ProtocolError::from(TransportError::NoAdapters);

        assert_matches!(
            error,
            ProtocolError::Interaction(source)
                if matches!(*source, InteractionError::Transport(TransportError::NoAdapters))
        );
    }
}
