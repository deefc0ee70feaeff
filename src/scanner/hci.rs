//! Raw HCI socket transport.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! A raw socket cannot observe controller power changes, so the controller is
//! reported as powered on once the event stream is subscribed.

use super::{
    DiscoveryEvent, EVENT_CHANNEL_BUFFER_SIZE, PowerState, ScanError, ServiceData, Transport,
    TransportEvent, service_uuid, sig_uuid,
};
use crate::mac_address::MacAddress;
use futures::future::BoxFuture;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Mutex, PoisonError};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Controller used by [`crate::scanner::open`] (`hci0`).
pub const DEFAULT_HCI_DEVICE: u16 = 0;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// RSSI value reported when the controller has no measurement
const RSSI_UNAVAILABLE: i16 = 127;

// AD types
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
const AD_TYPE_SERVICE_DATA_32: u8 = 0x20;
const AD_TYPE_SERVICE_DATA_128: u8 = 0x21;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Configure passive LE scanning with a 10ms interval and window
fn set_scan_parameters(fd: &OwnedFd) -> Result<(), ScanError> {
    let params = LeSetScanParametersCmd {
        scan_type: LE_SCAN_PASSIVE,
        interval: 0x0010, // 10ms in 0.625ms units
        window: 0x0010,   // 10ms in 0.625ms units
        own_address_type: LE_PUBLIC_ADDRESS,
        filter_policy: FILTER_POLICY_ACCEPT_ALL,
    };

    let params_bytes = unsafe {
        std::slice::from_raw_parts(
            &params as *const LeSetScanParametersCmd as *const u8,
            mem::size_of::<LeSetScanParametersCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, params_bytes);
    send_hci_command(fd, &packet)
}

/// Enable or disable LE scanning. Duplicates are not filtered.
fn set_scan_enable(fd: &OwnedFd, enable: bool) -> Result<(), ScanError> {
    let command = LeSetScanEnableCmd {
        enable: u8::from(enable),
        filter_dup: 0x00,
    };

    let command_bytes = unsafe {
        std::slice::from_raw_parts(
            &command as *const LeSetScanEnableCmd as *const u8,
            mem::size_of::<LeSetScanEnableCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, command_bytes);
    send_hci_command(fd, &packet)
}

/// Advertisement fields collected from AD structures.
#[derive(Debug, Default, PartialEq)]
struct AdFields {
    local_name: Option<String>,
    manufacturer_data: Option<Vec<u8>>,
    service_data: Vec<ServiceData>,
}

fn service_data(uuid: u128, data: &[u8]) -> ServiceData {
    ServiceData {
        uuid: service_uuid(uuid),
        data: data.to_vec(),
    }
}

/// Walk the AD structures of an advertisement.
fn parse_ad_structures(ad_data: &[u8]) -> AdFields {
    let mut fields = AdFields::default();

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_NAME => {
                fields.local_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_SHORT_NAME if fields.local_name.is_none() => {
                fields.local_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_MANUFACTURER_DATA => {
                fields.manufacturer_data = Some(value.to_vec());
            }
            AD_TYPE_SERVICE_DATA_16 if value.len() >= 2 => {
                let short = u16::from_le_bytes([value[0], value[1]]);
                fields
                    .service_data
                    .push(service_data(sig_uuid(u32::from(short)), &value[2..]));
            }
            AD_TYPE_SERVICE_DATA_32 if value.len() >= 4 => {
                let short = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
                fields
                    .service_data
                    .push(service_data(sig_uuid(short), &value[4..]));
            }
            AD_TYPE_SERVICE_DATA_128 if value.len() >= 16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&value[..16]);
                fields
                    .service_data
                    .push(service_data(u128::from_le_bytes(uuid), &value[16..]));
            }
            _ => {}
        }

        offset += 1 + len;
    }

    fields
}

/// Parse an LE advertising report event into a discovery event
fn parse_advertising_report(data: &[u8]) -> Option<DiscoveryEvent> {
    // Minimum size for an advertising report
    if data.len() < 12 {
        return None;
    }

    // Skip HCI header (1 byte packet type + 1 byte event code + 1 byte param len + 1 byte subevent)
    let report = &data[4..];

    // Number of reports
    let num_reports = report[0] as usize;
    if num_reports == 0 {
        return None;
    }

    // Parse first report (we process one at a time)
    // Skip: num_reports(1) + event_type(1) + addr_type(1)
    if report.len() < 10 {
        return None;
    }

    // Extract address (6 bytes, in reverse order)
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    addr.reverse(); // HCI uses little-endian address

    let data_len = report[9] as usize;
    if report.len() < 10 + data_len {
        return None;
    }

    let ad_data = &report[10..10 + data_len];
    // RSSI follows the AD data
    let rssi = i16::from(*report.get(10 + data_len)? as i8);
    if rssi == RSSI_UNAVAILABLE {
        return None;
    }

    let fields = parse_ad_structures(ad_data);

    Some(DiscoveryEvent {
        address: MacAddress(addr).to_string(),
        rssi,
        local_name: fields.local_name,
        manufacturer_data: fields.manufacturer_data,
        service_data: fields.service_data,
    })
}

/// Transport bound to one HCI controller.
pub struct HciTransport {
    cmd_fd: OwnedFd,
    event_fd: Mutex<Option<OwnedFd>>,
    tx: mpsc::Sender<TransportEvent>,
    rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HciTransport {
    /// Open the event and command sockets for controller `dev_id` and set the
    /// scan parameters.
    pub fn new(dev_id: u16) -> Result<Self, ScanError> {
        // Socket for receiving advertising events
        let event_fd = open_hci_socket()?;
        bind_hci_socket(&event_fd, dev_id)?;
        set_hci_filter(&event_fd)?;

        // Separate socket for sending commands
        let cmd_fd = open_hci_socket()?;
        bind_hci_socket(&cmd_fd, dev_id)?;
        set_scan_parameters(&cmd_fd)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

        debug!(device = dev_id, "Opened HCI sockets");

        Ok(Self {
            cmd_fd,
            event_fd: Mutex::new(Some(event_fd)),
            tx,
            rx: Mutex::new(Some(rx)),
            reader: Mutex::new(None),
        })
    }
}

impl Drop for HciTransport {
    fn drop(&mut self) {
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Transport for HciTransport {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<TransportEvent>, ScanError>> {
        Box::pin(async move {
            let rx = self
                .rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(ScanError::AlreadySubscribed)?;
            let fd = self
                .event_fd
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(ScanError::AlreadySubscribed)?;

            // Wrap in AsyncFd for async I/O
            let async_fd = AsyncFd::new(fd)
                .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

            emit(&self.tx, TransportEvent::PowerStateChanged(PowerState::PoweredOn));

            let handle = tokio::spawn(read_events(async_fd, self.tx.clone()));
            *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

            Ok(rx)
        })
    }

    fn start_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            set_scan_enable(&self.cmd_fd, true)?;
            emit(&self.tx, TransportEvent::ScanStarted);
            Ok(())
        })
    }

    fn stop_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            set_scan_enable(&self.cmd_fd, false)?;
            emit(&self.tx, TransportEvent::ScanStopped);
            Ok(())
        })
    }
}

/// Queue a lifecycle event without waiting for channel capacity. The consumer
/// may itself be waiting on the scan command that produced the event.
fn emit(tx: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            debug!(?event, "Event channel full, dropping lifecycle event");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Read HCI events until the socket fails or the receiver is dropped.
async fn read_events(async_fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<TransportEvent>) {
    let mut buf = [0u8; 258]; // Max HCI event size

    loop {
        // Wait for the socket to be readable
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "HCI socket closed");
                break;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,  // EOF or empty read
                Ok(Err(_)) => break, // Read error
                Err(_) => break,     // WouldBlock - no more data
            };

            // Check if this is an LE advertising report
            if n >= 4
                && buf[0] == HCI_EVENT_PKT
                && buf[1] == EVT_LE_META_EVENT
                && buf[3] == EVT_LE_ADVERTISING_REPORT
            {
                match parse_advertising_report(&buf[..n]) {
                    Some(event) => {
                        if tx
                            .send(TransportEvent::DeviceDiscovered(event))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    None => trace!(len = n, "Ignoring malformed advertising report"),
                }
            }
        }
    }
}
