mod btleplug_backend;
mod connection;
mod exchange;
mod fake_backend;
mod hardware;
mod model;
mod scan;
mod transport;

pub use self::connection::{ConnectionState, ConnectionStateMachine};
pub use self::exchange::{CommandExecutor, ExchangePhase, FragmentDisposition};
pub use self::fake_backend::{
    FakeBackendConfig, FakeReadings, FakeResponseBehaviour, FakeTransport, LabFixture,
    ScanFixture,
};
pub use self::hardware::{TransportBackend, transport_from_backend};
pub use self::model::{CharacteristicInfo, FoundDevice, LinkEndpoint, ServiceInfo};
pub use self::scan::{first_match, scan};
pub use self::transport::{BleTransport, TransportEvent};
