//! BlueZ D-Bus transport.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    DiscoveryEvent, EVENT_CHANNEL_BUFFER_SIZE, PowerState, ScanError, ServiceData, Transport,
    TransportEvent, service_uuid,
};
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
    Session, Uuid,
};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

#[derive(Default)]
struct Tasks {
    watcher: Option<JoinHandle<()>>,
    discovery: Option<JoinHandle<()>>,
}

/// Transport backed by the default BlueZ adapter.
pub struct BluerTransport {
    _session: Session,
    adapter: Adapter,
    tx: mpsc::Sender<TransportEvent>,
    rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    tasks: Mutex<Tasks>,
}

impl BluerTransport {
    /// Connect to BlueZ and select the default adapter.
    pub async fn new() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

        Ok(Self {
            _session: session,
            adapter,
            tx,
            rx: Mutex::new(Some(rx)),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BluerTransport {
    fn drop(&mut self) {
        let tasks = self.tasks();
        for handle in [&tasks.watcher, &tasks.discovery].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl Transport for BluerTransport {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<TransportEvent>, ScanError>> {
        Box::pin(async move {
            let rx = self
                .rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(ScanError::AlreadySubscribed)?;

            let events = self.adapter.events().await?;
            let powered = self.adapter.is_powered().await?;
            let handle = tokio::spawn(watch_adapter(events, powered, self.tx.clone()));
            self.tasks().watcher = Some(handle);

            Ok(rx)
        })
    }

    fn start_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            // Report every advertisement, not only the first one per device
            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            self.adapter.set_discovery_filter(filter).await?;

            let discoveries = self.adapter.discover_devices_with_changes().await?;
            let handle = tokio::spawn(forward_discoveries(
                self.adapter.clone(),
                discoveries,
                self.tx.clone(),
            ));

            if let Some(previous) = self.tasks().discovery.replace(handle) {
                previous.abort();
            }
            Ok(())
        })
    }

    fn stop_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            // Dropping the discovery stream ends the BlueZ discovery session
            if let Some(handle) = self.tasks().discovery.take() {
                handle.abort();
            }
            Ok(())
        })
    }
}

/// Translate adapter property changes into power and scan lifecycle events.
async fn watch_adapter(
    events: impl Stream<Item = AdapterEvent>,
    powered: bool,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut events = std::pin::pin!(events);

    if tx
        .send(TransportEvent::PowerStateChanged(power_state(powered)))
        .await
        .is_err()
    {
        return;
    }

    while let Some(event) = events.next().await {
        let event = match event {
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) => {
                TransportEvent::PowerStateChanged(power_state(on))
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Discovering(true)) => {
                TransportEvent::ScanStarted
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Discovering(false)) => {
                TransportEvent::ScanStopped
            }
            _ => continue,
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

fn power_state(powered: bool) -> PowerState {
    if powered {
        PowerState::PoweredOn
    } else {
        PowerState::PoweredOff
    }
}

async fn forward_discoveries(
    adapter: Adapter,
    discoveries: impl Stream<Item = AdapterEvent>,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut discoveries = std::pin::pin!(discoveries);

    while let Some(event) = discoveries.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };

        match read_device(&adapter, address).await {
            Ok(Some(device)) => {
                if tx
                    .send(TransportEvent::DeviceDiscovered(device))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => trace!(%address, "Device not in range"),
            Err(e) => debug!(%address, error = %e, "Failed to read device properties"),
        }
    }
}

/// Collect the advertisement properties of a device. Devices without a
/// signal strength are cached by BlueZ but were not heard in this scan.
async fn read_device(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<DiscoveryEvent>, ScanError> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    Ok(Some(DiscoveryEvent {
        address: MacAddress::from(address).to_string(),
        rssi,
        local_name: device.name().await?,
        manufacturer_data: device
            .manufacturer_data()
            .await?
            .and_then(manufacturer_bytes),
        service_data: device
            .service_data()
            .await?
            .map(service_entries)
            .unwrap_or_default(),
    }))
}

/// BlueZ splits off the company identifier; put it back in wire order.
fn manufacturer_bytes(data: HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, payload) = data.into_iter().min_by_key(|(company, _)| *company)?;
    let mut bytes = company.to_le_bytes().to_vec();
    bytes.extend(payload);
    Some(bytes)
}

/// BlueZ reports service data as a map; order entries by identifier.
fn service_entries(data: HashMap<Uuid, Vec<u8>>) -> Vec<ServiceData> {
    let mut entries: Vec<ServiceData> = data
        .into_iter()
        .map(|(uuid, data)| ServiceData {
            uuid: service_uuid(uuid.as_u128()),
            data,
        })
        .collect();
    entries.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::sig_uuid;

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_manufacturer_bytes_restores_wire_order() {
        let data = HashMap::from([(0x0590, b"{t:1}".to_vec())]);
        let bytes = manufacturer_bytes(data).unwrap();
        assert_eq!(&bytes[..2], &[0x90, 0x05]);
        assert_eq!(&bytes[2..], b"{t:1}");
    }

    #[test]
    fn test_manufacturer_bytes_empty() {
        assert_eq!(manufacturer_bytes(HashMap::new()), None);
    }

    #[test]
    fn test_service_entries_sorted_and_shortened() {
        let data = HashMap::from([
            (Uuid::from_u128(sig_uuid(0xfeaa)), vec![0x10]),
            (Uuid::from_u128(sig_uuid(0x180f)), vec![0x64]),
        ]);
        let entries = service_entries(data);
        let ids: Vec<_> = entries.iter().map(|e| e.uuid.as_str()).collect();
        assert_eq!(ids, vec!["180f", "feaa"]);
        assert_eq!(entries[0].data, vec![0x64]);
    }
}
