//! Bluetooth LE transport abstraction.
//!
//! A [`Transport`] delivers typed [`TransportEvent`]s over a channel and
//! accepts scan start/stop requests. Two backends are available: BlueZ over
//! D-Bus and raw HCI sockets.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel buffer size for transport events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Bluetooth base UUID, `00000000-0000-1000-8000-00805f9b34fb`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

const BASE_UUID_MASK: u128 = (1 << 96) - 1;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The event stream has already been handed out
    #[error("Transport events already subscribed")]
    AlreadySubscribed,
}

/// Adapter power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

/// One service data entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    /// Lower-case hex identifier, shortened for SIG-assigned UUIDs
    pub uuid: String,
    pub data: Vec<u8>,
}

/// One observed advertisement from one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryEvent {
    /// Lower-case colon-separated address
    pub address: String,
    /// Signal strength in dBm
    pub rssi: i16,
    pub local_name: Option<String>,
    /// Manufacturer data including the little-endian company identifier
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: Vec<ServiceData>,
}

/// Events delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PowerStateChanged(PowerState),
    DeviceDiscovered(DiscoveryEvent),
    ScanStarted,
    ScanStopped,
}

/// Wireless transport abstraction, injected into the discovery loop so it can
/// be driven without Bluetooth hardware.
pub trait Transport: Send + Sync {
    /// Take the event stream. Only one subscriber is supported.
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<TransportEvent>, ScanError>>;

    fn start_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>>;

    fn stop_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>>;
}

/// Render a service UUID the way topics use it: 4 or 8 hex digits for
/// UUIDs derived from the Bluetooth base UUID, 32 hex digits otherwise.
///
/// ```
/// use ble_mqtt::scanner::{BLUETOOTH_BASE_UUID, sig_uuid, service_uuid};
///
/// assert_eq!(service_uuid(sig_uuid(0xfeaa)), "feaa");
/// assert_eq!(
///     service_uuid(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
///     "6e400001b5a3f393e0a9e50e24dcca9e"
/// );
/// ```
pub fn service_uuid(uuid: u128) -> String {
    if uuid & BASE_UUID_MASK == BLUETOOTH_BASE_UUID {
        let short = (uuid >> 96) as u32;
        if short <= 0xffff {
            return format!("{short:04x}");
        }
        return format!("{short:08x}");
    }
    format!("{uuid:032x}")
}

/// Expand a 16 or 32-bit SIG-assigned UUID to its full 128-bit form.
pub fn sig_uuid(short: u32) -> u128 {
    (u128::from(short) << 96) | BLUETOOTH_BASE_UUID
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Open the transport for the selected backend.
pub async fn open(backend: Backend) -> Result<Box<dyn Transport>, ScanError> {
    tracing::debug!(%backend, "Opening Bluetooth transport");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Box::new(bluer::BluerTransport::new().await?)),
        #[cfg(feature = "hci")]
        Backend::Hci => Ok(Box::new(hci::HciTransport::new(hci::DEFAULT_HCI_DEVICE)?)),
    }
}
