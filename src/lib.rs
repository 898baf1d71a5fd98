mod app;
mod cli;
mod error;
mod events;
mod handlers;
mod hw;
mod instrument;
mod notification;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunOptions, SessionHandler, fake_backend, real_backend, run, run_with_clients};
pub use cli::{
    Args, CalibrateArgs, CalibrationTarget, Command, FakeArgs, ListenArgs, LogLevel, MeasureArgs,
    OutputFormat, ReadingKind,
};
pub use error::{ExchangeError, FixtureError, InteractionError, ProtocolError, TransportError};
pub use events::{
    DeviceEvent, EventBus, EventHandler, EventStream, HandlerError, SharedHandler, handler_fn,
};
pub use handlers::{
    CalibrationInfo, CalibrationOutcome, Command as FrameCommand, DecodeError, DeviceInfo,
    FrameCodec, FrameCodecError, LabReading, ReadingDecoder, ResponseAssembler, Rgb, RgbReading,
    SpectralReading, lab_to_rgb,
};
pub use hw::{
    BleTransport, CharacteristicInfo, CommandExecutor, ConnectionState, ConnectionStateMachine,
    ExchangePhase, FakeBackendConfig, FakeReadings, FakeResponseBehaviour, FakeTransport,
    FoundDevice, FragmentDisposition, LabFixture, LinkEndpoint, ScanFixture, ServiceInfo,
    TransportBackend, TransportEvent, first_match, scan, transport_from_backend,
};
pub use instrument::{AdapterStatus, InstrumentSession, SessionConfig};
pub use notification::{NotificationDecodeError, NotificationHandler, NotifyEvent};
pub use protocol::{
    CommandKind, DEFAULT_CHARACTERISTIC_PREFIX, DEFAULT_LINK_TIMEOUT, DEFAULT_NAME_PREFIX,
    DEFAULT_SCAN_DURATION, DEFAULT_SERVICE_PREFIX, DEFAULT_SETTLE_DELAY, PrefixRule,
    STANDARD_FRAME_LEN, TRANSPORT_CHUNK_SIZE,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
