use std::sync::Arc;

use tracing::info;

use super::btleplug_backend::BtleplugTransport;
use super::fake_backend::{FakeBackendConfig, FakeTransport};
use super::transport::BleTransport;
use crate::error::InteractionError;

/// Runtime BLE backend selection.
#[derive(Debug, Clone)]
pub enum TransportBackend {
    Real,
    Fake(FakeBackendConfig),
}

/// Builds the transport for the selected runtime backend.
///
/// # Errors
///
/// Returns an error when the host BLE stack has no usable adapter.
pub async fn transport_from_backend(
    backend: TransportBackend,
) -> Result<Arc<dyn BleTransport>, InteractionError> {
    let transport: Arc<dyn BleTransport> = match backend {
        TransportBackend::Real => Arc::new(BtleplugTransport::new().await?),
        TransportBackend::Fake(config) => {
            info!("using fake BLE backend");
            Arc::new(FakeTransport::new(config))
        }
    };

    Ok(transport)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::hw::TransportEvent;

    #[tokio::test]
    async fn fake_backend_builds_a_working_transport() {
        let transport = transport_from_backend(TransportBackend::Fake(FakeBackendConfig::default()))
            .await
            .expect("fake transport should build");
        let mut events = transport.subscribe_events();

        transport.open_adapter().await.expect("adapter should open");

        assert_matches!(
            events.recv().await,
            Ok(TransportEvent::AdapterStateChanged { available: true, .. })
        );
    }
}
