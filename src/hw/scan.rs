use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument, warn};

use super::model::FoundDevice;
use super::transport::{BleTransport, TransportEvent};
use crate::error::InteractionError;
use crate::protocol::PrefixRule;

/// Collects matching devices seen during one discovery window.
///
/// Devices are deduplicated by identifier in first-seen order; later
/// sightings refresh the name and RSSI.
///
/// # Errors
///
/// Returns an error when discovery cannot be started or stopped.
#[instrument(skip(transport), level = "debug", fields(name_rule = %name_rule))]
pub async fn scan(
    transport: &dyn BleTransport,
    name_rule: &PrefixRule,
    duration: Duration,
) -> Result<Vec<FoundDevice>, InteractionError> {
    let mut events = transport.subscribe_events();
    transport.start_discovery().await?;

    let deadline = sleep_until(Instant::now() + duration);
    tokio::pin!(deadline);
    let mut seen: Vec<FoundDevice> = Vec::new();

    loop {
        tokio::select! {
            () = &mut deadline => break,
            received = events.recv() => match received {
                Ok(TransportEvent::DeviceDiscovered(device)) => {
                    match seen.iter_mut().find(|known| known.device_id() == device.device_id()) {
                        Some(known) => known.refresh(device),
                        None => seen.push(device),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "discovery events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    transport.stop_discovery().await?;
    seen.retain(|device| device.name_matches(name_rule));
    debug!(found = seen.len(), "discovery window closed");
    Ok(seen)
}

/// Returns the first device whose name matches, stopping discovery early.
///
/// # Errors
///
/// Returns [`InteractionError::NoMatchingDevice`] when the window closes
/// without a match, or a transport error from discovery.
#[instrument(skip(transport), level = "debug", fields(name_rule = %name_rule))]
pub async fn first_match(
    transport: &dyn BleTransport,
    name_rule: &PrefixRule,
    timeout: Duration,
) -> Result<FoundDevice, InteractionError> {
    let mut events = transport.subscribe_events();
    transport.start_discovery().await?;

    let deadline = sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);
    let mut found = None;

    while found.is_none() {
        tokio::select! {
            () = &mut deadline => break,
            received = events.recv() => match received {
                Ok(TransportEvent::DeviceDiscovered(device)) if device.name_matches(name_rule) => {
                    found = Some(device);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "discovery events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    transport.stop_discovery().await?;
    found.ok_or_else(|| InteractionError::NoMatchingDevice {
        prefix: name_rule.to_string(),
    })
}
