use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::model::{CharacteristicInfo, FoundDevice, LinkEndpoint, ServiceInfo};
use crate::error::TransportError;

/// Capacity of the transport event channel.
pub(crate) const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// Asynchronous callbacks from the host BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterStateChanged {
        discovering: bool,
        available: bool,
    },
    DeviceDiscovered(FoundDevice),
    LinkStateChanged {
        device_id: String,
        connected: bool,
    },
    /// One notification fragment from a characteristic.
    ValueChanged {
        device_id: String,
        characteristic_uuid: String,
        value: Vec<u8>,
    },
}

/// The host BLE stack as seen by the protocol engine.
///
/// Every call is a single request; callbacks arrive through
/// [`BleTransport::subscribe_events`]. Subscribers only see events sent after
/// they subscribed, so callers subscribe before triggering anything.
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn open_adapter(&self) -> Result<(), TransportError>;

    async fn close_adapter(&self) -> Result<(), TransportError>;

    async fn start_discovery(&self) -> Result<(), TransportError>;

    async fn stop_discovery(&self) -> Result<(), TransportError>;

    /// Requests a link; link-up is confirmed separately by a
    /// [`TransportEvent::LinkStateChanged`] event.
    async fn create_link(&self, device_id: &str, timeout: Duration) -> Result<(), TransportError>;

    async fn close_link(&self, device_id: &str) -> Result<(), TransportError>;

    /// Lists services; characteristics may be left empty.
    async fn services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn characteristics(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<CharacteristicInfo>, TransportError>;

    /// Writes one transport unit.
    async fn write(&self, endpoint: &LinkEndpoint, value: &[u8]) -> Result<(), TransportError>;

    async fn set_notify(&self, endpoint: &LinkEndpoint, enabled: bool)
    -> Result<(), TransportError>;

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}
