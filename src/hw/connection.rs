use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::exchange::CommandExecutor;
use super::model::LinkEndpoint;
use super::transport::BleTransport;
use crate::error::{InteractionError, TransportError};
use crate::events::{DeviceEvent, EventBus};
use crate::protocol::PrefixRule;

/// Observable connection state.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { device_id: String },
    Connected(LinkEndpoint),
}

/// Internal state; `Connecting` also tracks which half of the handshake is done.
#[derive(Debug, Clone, Eq, PartialEq)]
enum LinkProgress {
    Disconnected,
    Connecting {
        device_id: String,
        link_up: bool,
        endpoint: Option<LinkEndpoint>,
    },
    Connected(LinkEndpoint),
}

/// Side effect of a link-state callback.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LinkChange {
    Unchanged,
    Updated,
    /// The current device's link went down.
    Dropped,
}

impl LinkProgress {
    fn device_id(&self) -> Option<&str> {
        match self {
            Self::Disconnected => None,
            Self::Connecting { device_id, .. } => Some(device_id),
            Self::Connected(endpoint) => Some(endpoint.device_id()),
        }
    }

    fn public(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting { device_id, .. } => ConnectionState::Connecting {
                device_id: device_id.clone(),
            },
            Self::Connected(endpoint) => ConnectionState::Connected(endpoint.clone()),
        }
    }

    fn on_link_state(self, link_device: &str, connected: bool) -> (Self, LinkChange) {
        if self.device_id() != Some(link_device) {
            return (self, LinkChange::Unchanged);
        }
        match (self, connected) {
            (Self::Connecting { endpoint: Some(endpoint), .. }, true) => {
                (Self::Connected(endpoint), LinkChange::Updated)
            }
            (
                Self::Connecting {
                    device_id,
                    endpoint: None,
                    ..
                },
                true,
            ) => (
                Self::Connecting {
                    device_id,
                    link_up: true,
                    endpoint: None,
                },
                LinkChange::Updated,
            ),
            (_, false) => (Self::Disconnected, LinkChange::Dropped),
            (current, true) => (current, LinkChange::Unchanged),
        }
    }

    fn on_endpoint_resolved(self, resolved: LinkEndpoint) -> (Self, bool) {
        match self {
            Self::Connecting {
                device_id,
                link_up,
                ..
            } if device_id == resolved.device_id() => {
                if link_up {
                    (Self::Connected(resolved), true)
                } else {
                    (
                        Self::Connecting {
                            device_id,
                            link_up,
                            endpoint: Some(resolved),
                        },
                        true,
                    )
                }
            }
            other => (other, false),
        }
    }
}

/// Drives link → service → characteristic → notify for one device at a time.
pub struct ConnectionStateMachine {
    transport: Arc<dyn BleTransport>,
    executor: Arc<CommandExecutor>,
    bus: EventBus,
    service_rule: PrefixRule,
    characteristic_rule: PrefixRule,
    link_timeout: Duration,
    progress: watch::Sender<LinkProgress>,
}

impl ConnectionStateMachine {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        executor: Arc<CommandExecutor>,
        bus: EventBus,
        service_rule: PrefixRule,
        characteristic_rule: PrefixRule,
        link_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            executor,
            bus,
            service_rule,
            characteristic_rule,
            link_timeout,
            progress: watch::Sender::new(LinkProgress::Disconnected),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.progress.borrow().public()
    }

    /// Endpoint of the confirmed connection, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<LinkEndpoint> {
        match &*self.progress.borrow() {
            LinkProgress::Connected(endpoint) => Some(endpoint.clone()),
            _ => None,
        }
    }

    /// Runs the connection steps for `device_id`.
    ///
    /// On success the machine is either `Connected` or still `Connecting`
    /// awaiting the transport's link-up confirmation. Any failure reverts to
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::AlreadyConnected`] unless disconnected,
    /// [`InteractionError::ConnectionFailed`] when the link cannot be created,
    /// and [`InteractionError::ServiceUnavailable`] or
    /// [`InteractionError::CharacteristicUnavailable`] when discovery finds no match.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(&self, device_id: &str) -> Result<(), InteractionError> {
        let mut claimed = false;
        self.progress.send_if_modified(|progress| {
            if *progress != LinkProgress::Disconnected {
                return false;
            }
            *progress = LinkProgress::Connecting {
                device_id: device_id.to_string(),
                link_up: false,
                endpoint: None,
            };
            claimed = true;
            true
        });
        if !claimed {
            let current = self.progress.borrow().device_id().unwrap_or_default().to_string();
            return Err(InteractionError::AlreadyConnected { device_id: current });
        }

        let resolved = match self.establish(device_id).await {
            Ok(endpoint) => endpoint,
            Err(error) => {
                self.revert(device_id).await;
                return Err(error);
            }
        };

        let mut still_current = false;
        self.progress.send_if_modified(|progress| {
            let current = std::mem::replace(progress, LinkProgress::Disconnected);
            let (next, changed) = current.on_endpoint_resolved(resolved);
            *progress = next;
            still_current = changed;
            changed
        });
        if !still_current {
            self.revert(device_id).await;
            return Err(InteractionError::ConnectionFailed {
                device_id: device_id.to_string(),
                source: TransportError::LinkDropped,
            });
        }

        info!(state = ?self.state(), "instrument endpoints resolved");
        Ok(())
    }

    async fn establish(&self, device_id: &str) -> Result<LinkEndpoint, InteractionError> {
        self.transport
            .create_link(device_id, self.link_timeout)
            .await
            .map_err(|source| InteractionError::ConnectionFailed {
                device_id: device_id.to_string(),
                source,
            })?;

        let services = self.transport.services(device_id).await?;
        let service = services
            .iter()
            .find(|service| self.service_rule.matches(service.uuid()))
            .ok_or_else(|| InteractionError::ServiceUnavailable {
                prefix: self.service_rule.to_string(),
            })?;
        debug!(service = service.uuid(), "selected service");

        let characteristics = self
            .transport
            .characteristics(device_id, service.uuid())
            .await?;
        let characteristic = characteristics
            .iter()
            .find(|characteristic| self.characteristic_rule.matches(characteristic.uuid()))
            .ok_or_else(|| InteractionError::CharacteristicUnavailable {
                prefix: self.characteristic_rule.to_string(),
            })?;
        debug!(characteristic = characteristic.uuid(), "selected characteristic");

        let endpoint = LinkEndpoint::new(device_id, service.uuid(), characteristic.uuid());
        self.transport.set_notify(&endpoint, true).await?;
        Ok(endpoint)
    }

    /// Waits for the link-up confirmation that completes a connection.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::ConnectionFailed`] when the link drops or the
    /// confirmation does not arrive within `timeout`; the machine is then
    /// `Disconnected`.
    #[instrument(skip(self), level = "debug")]
    pub async fn wait_until_connected(
        &self,
        device_id: &str,
        timeout: Duration,
    ) -> Result<LinkEndpoint, InteractionError> {
        let mut receiver = self.progress.subscribe();
        let settled = match tokio::time::timeout(
            timeout,
            receiver.wait_for(|progress| !matches!(progress, LinkProgress::Connecting { .. })),
        )
        .await
        {
            Ok(Ok(progress)) => match &*progress {
                LinkProgress::Connected(endpoint) if endpoint.device_id() == device_id => {
                    Some(Ok(endpoint.clone()))
                }
                _ => Some(Err(TransportError::LinkDropped)),
            },
            Ok(Err(_)) => Some(Err(TransportError::LinkDropped)),
            Err(_) => None,
        };

        let source = match settled {
            Some(Ok(endpoint)) => return Ok(endpoint),
            Some(Err(source)) => source,
            None => {
                self.revert(device_id).await;
                TransportError::LinkTimeout {
                    device_id: device_id.to_string(),
                    timeout,
                }
            }
        };

        Err(InteractionError::ConnectionFailed {
            device_id: device_id.to_string(),
            source,
        })
    }

    /// Applies a link-state callback from the transport and publishes it.
    pub fn on_link_state(&self, device_id: &str, connected: bool) {
        let mut change = LinkChange::Unchanged;
        self.progress.send_if_modified(|progress| {
            let current = std::mem::replace(progress, LinkProgress::Disconnected);
            let (next, outcome) = current.on_link_state(device_id, connected);
            *progress = next;
            change = outcome;
            outcome != LinkChange::Unchanged
        });

        if change == LinkChange::Dropped {
            info!(device_id, "link dropped");
            self.executor.cancel();
        }

        let device_id = device_id.to_string();
        self.bus.publish(&if connected {
            DeviceEvent::Connected { device_id }
        } else {
            DeviceEvent::Disconnected { device_id }
        });
    }

    /// Closes whichever link is current or pending and cancels any exchange.
    ///
    /// # Errors
    ///
    /// Returns a transport error when closing the link fails; the machine is
    /// `Disconnected` regardless.
    #[instrument(skip(self), level = "debug")]
    pub async fn disconnect(&self) -> Result<(), InteractionError> {
        let previous = self.progress.send_replace(LinkProgress::Disconnected);
        let Some(device_id) = previous.device_id() else {
            return Ok(());
        };

        self.executor.cancel();
        self.transport.close_link(device_id).await?;
        Ok(())
    }

    async fn revert(&self, device_id: &str) {
        self.progress.send_if_modified(|progress| {
            if progress.device_id() != Some(device_id) {
                return false;
            }
            *progress = LinkProgress::Disconnected;
            true
        });
        self.executor.cancel();
        if let Err(error) = self.transport.close_link(device_id).await {
            debug!(%error, device_id, "best-effort link close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn endpoint(device_id: &str) -> LinkEndpoint {
        LinkEndpoint::new(device_id, "0000ffe0", "0000ffe1")
    }

    fn connecting(link_up: bool, resolved: bool) -> LinkProgress {
        LinkProgress::Connecting {
            device_id: "AA".into(),
            link_up,
            endpoint: resolved.then(|| endpoint("AA")),
        }
    }

    #[rstest]
    #[case::confirmed_after_resolution(
        connecting(false, true),
        true,
        LinkProgress::Connected(endpoint("AA")),
        LinkChange::Updated
    )]
    #[case::confirmed_before_resolution(
        connecting(false, false),
        true,
        connecting(true, false),
        LinkChange::Updated
    )]
    #[case::dropped_while_connecting(
        connecting(true, false),
        false,
        LinkProgress::Disconnected,
        LinkChange::Dropped
    )]
    #[case::dropped_while_connected(
        LinkProgress::Connected(endpoint("AA")),
        false,
        LinkProgress::Disconnected,
        LinkChange::Dropped
    )]
    #[case::repeated_confirmation(
        LinkProgress::Connected(endpoint("AA")),
        true,
        LinkProgress::Connected(endpoint("AA")),
        LinkChange::Unchanged
    )]
    #[case::idle(LinkProgress::Disconnected, true, LinkProgress::Disconnected, LinkChange::Unchanged)]
    fn link_state_transitions(
        #[case] current: LinkProgress,
        #[case] connected: bool,
        #[case] expected: LinkProgress,
        #[case] change: LinkChange,
    ) {
        assert_eq!((expected, change), current.on_link_state("AA", connected));
    }

    #[test]
    fn link_events_for_other_devices_are_ignored() {
        let current = connecting(false, true);
        assert_eq!(
            (current.clone(), LinkChange::Unchanged),
            current.on_link_state("BB", true)
        );
    }

    #[test]
    fn endpoint_resolution_waits_for_link_confirmation() {
        let (next, current) = connecting(false, false).on_endpoint_resolved(endpoint("AA"));
        assert!(current);
        assert_eq!(connecting(false, true), next);

        let (next, current) = connecting(true, false).on_endpoint_resolved(endpoint("AA"));
        assert!(current);
        assert_eq!(LinkProgress::Connected(endpoint("AA")), next);
    }

    #[test]
    fn endpoint_resolution_after_disconnect_is_rejected() {
        let (next, current) = LinkProgress::Disconnected.on_endpoint_resolved(endpoint("AA"));
        assert!(!current);
        assert_eq!(LinkProgress::Disconnected, next);
    }

    #[test]
    fn public_state_hides_handshake_details() {
        assert_eq!(
            ConnectionState::Connecting {
                device_id: "AA".into()
            },
            connecting(true, false).public()
        );
    }
}
