use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, instrument, trace, warn};

use super::model::{CharacteristicInfo, FoundDevice, LinkEndpoint, ServiceInfo};
use super::transport::{BleTransport, TRANSPORT_EVENT_CAPACITY, TransportEvent};
use crate::error::TransportError;
use crate::utils::format_hex;

#[derive(Debug, Default)]
struct PumpState {
    adapter_events: Option<JoinHandle<()>>,
    notifications: HashMap<String, JoinHandle<()>>,
}

/// Last adapter state reported to subscribers.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
struct AdapterFlags {
    discovering: bool,
    available: bool,
}

impl AdapterFlags {
    fn set_available(&mut self, available: bool) {
        self.available = available;
        // A powered-down adapter stops any scan in progress.
        self.discovering &= available;
    }
}

/// Applies `update` to the shared flags and returns the resulting state event.
fn adapter_state_event(
    flags: &Mutex<AdapterFlags>,
    update: impl FnOnce(&mut AdapterFlags),
) -> TransportEvent {
    let mut flags = flags.lock().unwrap_or_else(PoisonError::into_inner);
    update(&mut flags);
    TransportEvent::AdapterStateChanged {
        discovering: flags.discovering,
        available: flags.available,
    }
}

/// Host BLE stack backed by `btleplug`, using the first adapter.
#[derive(Debug)]
pub(crate) struct BtleplugTransport {
    adapter: Adapter,
    events: broadcast::Sender<TransportEvent>,
    pumps: Mutex<PumpState>,
    flags: Arc<Mutex<AdapterFlags>>,
}

impl BtleplugTransport {
    #[instrument(level = "debug")]
    pub(crate) async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapters)?;
        info!(adapter = %adapter.adapter_info().await?, "using BLE adapter");

        let (events, _) = broadcast::channel(TRANSPORT_EVENT_CAPACITY);
        Ok(Self {
            adapter,
            events,
            pumps: Mutex::new(PumpState::default()),
            flags: Arc::default(),
        })
    }

    fn pumps(&self) -> MutexGuard<'_, PumpState> {
        self.pumps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) {
        // No receivers just means nobody is listening yet.
        let _ = self.events.send(event);
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == device_id)
            .ok_or_else(|| TransportError::UnknownDevice {
                device_id: device_id.to_string(),
            })
    }

    async fn characteristic(
        &self,
        endpoint: &LinkEndpoint,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(endpoint.device_id()).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic.service_uuid.to_string().eq_ignore_ascii_case(endpoint.service_uuid())
                    && characteristic
                        .uuid
                        .to_string()
                        .eq_ignore_ascii_case(endpoint.characteristic_uuid())
            })
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                characteristic_uuid: endpoint.characteristic_uuid().to_string(),
            })?;
        Ok((peripheral, characteristic))
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    #[instrument(skip(self), level = "debug")]
    async fn open_adapter(&self) -> Result<(), TransportError> {
        if self.pumps().adapter_events.is_some() {
            return Ok(());
        }

        let stream = self.adapter.events().await?;
        let available = matches!(self.adapter.adapter_state().await?, CentralState::PoweredOn);
        let task = tokio::spawn(pump_adapter_events(
            self.adapter.clone(),
            stream,
            self.events.clone(),
            self.flags.clone(),
        ));
        self.pumps().adapter_events = Some(task);

        self.emit(adapter_state_event(&self.flags, |flags| {
            flags.set_available(available);
        }));
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn close_adapter(&self) -> Result<(), TransportError> {
        let mut pumps = self.pumps();
        if let Some(task) = pumps.adapter_events.take() {
            task.abort();
        }
        for (device_id, task) in pumps.notifications.drain() {
            trace!(device_id, "stopping notification pump");
            task.abort();
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_discovery(&self) -> Result<(), TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        self.emit(adapter_state_event(&self.flags, |flags| {
            flags.discovering = true;
        }));
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        self.emit(adapter_state_event(&self.flags, |flags| {
            flags.discovering = false;
        }));
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_link(&self, device_id: &str, link_timeout: Duration) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        let already_connected = peripheral.is_connected().await?;

        let linked = timeout(link_timeout, async {
            if !already_connected {
                peripheral.connect().await?;
            }
            peripheral.discover_services().await
        })
        .await;

        match linked {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::LinkTimeout {
                    device_id: device_id.to_string(),
                    timeout: link_timeout,
                });
            }
        }

        // The adapter only reports transitions, so an existing link is confirmed here.
        if already_connected {
            self.emit(TransportEvent::LinkStateChanged {
                device_id: device_id.to_string(),
                connected: true,
            });
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn close_link(&self, device_id: &str) -> Result<(), TransportError> {
        if let Some(task) = self.pumps().notifications.remove(device_id) {
            task.abort();
        }
        let peripheral = self.peripheral(device_id).await?;
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        Ok(collect_services(&peripheral))
    }

    #[instrument(skip(self), level = "debug")]
    async fn characteristics(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<CharacteristicInfo>, TransportError> {
        let peripheral = self.peripheral(device_id).await?;
        collect_services(&peripheral)
            .into_iter()
            .find(|service| service.uuid().eq_ignore_ascii_case(service_uuid))
            .map(ServiceInfo::into_characteristics)
            .ok_or_else(|| TransportError::UnknownService {
                service_uuid: service_uuid.to_string(),
            })
    }

    async fn write(&self, endpoint: &LinkEndpoint, value: &[u8]) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(endpoint).await?;
        let write_type = preferred_write_type(characteristic.properties).ok_or(
            TransportError::Rejected {
                operation: "write",
            },
        )?;
        trace!(value = %format_hex(value), ?write_type, "writing characteristic");
        peripheral.write(&characteristic, value, write_type).await?;
        Ok(())
    }

    #[instrument(skip(self, endpoint), level = "debug", fields(device_id = endpoint.device_id()))]
    async fn set_notify(
        &self,
        endpoint: &LinkEndpoint,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(endpoint).await?;
        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return Err(TransportError::Rejected {
                operation: "set_notify",
            });
        }

        if !enabled {
            if let Some(task) = self.pumps().notifications.remove(endpoint.device_id()) {
                task.abort();
            }
            peripheral.unsubscribe(&characteristic).await?;
            return Ok(());
        }

        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&characteristic).await?;
        let task = tokio::spawn(pump_notifications(
            notifications,
            endpoint.device_id().to_string(),
            self.events.clone(),
        ));
        if let Some(previous) = self
            .pumps()
            .notifications
            .insert(endpoint.device_id().to_string(), task)
        {
            previous.abort();
        }
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        let pumps = self.pumps.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pumps.adapter_events.take() {
            task.abort();
        }
        for task in pumps.notifications.values() {
            task.abort();
        }
    }
}

async fn pump_adapter_events(
    adapter: Adapter,
    mut stream: impl Stream<Item = CentralEvent> + Unpin,
    events: broadcast::Sender<TransportEvent>,
    flags: Arc<Mutex<AdapterFlags>>,
) {
    while let Some(event) = stream.next().await {
        let translated = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match found_device(&adapter, &id).await {
                    Ok(Some(device)) => TransportEvent::DeviceDiscovered(device),
                    Ok(None) => continue,
                    Err(error) => {
                        debug!(?error, "failed to read peripheral properties");
                        continue;
                    }
                }
            }
            CentralEvent::DeviceConnected(id) => TransportEvent::LinkStateChanged {
                device_id: id.to_string(),
                connected: true,
            },
            CentralEvent::DeviceDisconnected(id) => TransportEvent::LinkStateChanged {
                device_id: id.to_string(),
                connected: false,
            },
            CentralEvent::StateUpdate(state) => adapter_state_event(&flags, |flags| {
                flags.set_available(matches!(state, CentralState::PoweredOn));
            }),
            _ => continue,
        };
        let _ = events.send(translated);
    }
    warn!("adapter event stream ended");
}

async fn pump_notifications(
    mut notifications: impl Stream<Item = ValueNotification> + Unpin,
    device_id: String,
    events: broadcast::Sender<TransportEvent>,
) {
    while let Some(notification) = notifications.next().await {
        let _ = events.send(TransportEvent::ValueChanged {
            device_id: device_id.clone(),
            characteristic_uuid: notification.uuid.to_string().to_lowercase(),
            value: notification.value,
        });
    }
    debug!(device_id, "notification stream closed");
}

async fn found_device(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<FoundDevice>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    Ok(Some(FoundDevice::new(
        peripheral.id().to_string(),
        properties.local_name,
        properties.rssi,
    )))
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    let mut services: Vec<ServiceInfo> = peripheral
        .services()
        .into_iter()
        .map(|service| {
            let mut characteristics: Vec<CharacteristicInfo> = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid.to_string().to_lowercase(),
                        property_labels(characteristic.properties),
                    )
                })
                .collect();
            characteristics.sort_by(|left, right| left.uuid().cmp(right.uuid()));
            ServiceInfo::new(
                service.uuid.to_string().to_lowercase(),
                service.primary,
                characteristics,
            )
        })
        .collect();
    services.sort_by(|left, right| left.uuid().cmp(right.uuid()));
    services
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}

fn preferred_write_type(properties: CharPropFlags) -> Option<WriteType> {
    if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        Some(WriteType::WithoutResponse)
    } else if properties.contains(CharPropFlags::WRITE) {
        Some(WriteType::WithResponse)
    } else {
        None
    }
}
