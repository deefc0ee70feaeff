//! Discovery orchestrator.
//!
//! [`Discovery`] consumes transport events, starts scanning once the adapter
//! is powered, filters and names discovered devices, and hands each accepted
//! advertisement to its own publish task.
//!
//! Scanning that stops without being asked to, or stops producing
//! advertisements for the configured stall timeout, is treated as a broken
//! Bluetooth stack: the loop waits [`SCAN_STOP_EXIT_DELAY`], disconnects from
//! the broker and returns a fatal [`Outcome`] so a supervisor can restart the
//! process.

use crate::alias::{Alias, KnownDevices};
use crate::config::Config;
use crate::pipeline::publish_discovery;
use crate::publisher::Publisher;
use crate::scanner::{DiscoveryEvent, PowerState, ScanError, Transport, TransportEvent};
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, Sleep, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

/// Delay between an unexpected scan stop and disconnecting.
pub const SCAN_STOP_EXIT_DELAY: Duration = Duration::from_secs(5);

/// How long in-flight publishes may run after a stop request.
pub const SHUTDOWN_FLUSH_WINDOW: Duration = Duration::from_secs(2);

/// Scanning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// Terminal
    Stopped,
}

/// Why [`Discovery::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped on request.
    Stopped,
    /// The transport stopped scanning on its own.
    ScanHalted,
    /// No advertisements arrived within the stall timeout.
    Stalled,
    /// The transport event stream ended.
    TransportClosed,
}

impl Outcome {
    /// Whether the process should exit with an error.
    pub fn is_fatal(self) -> bool {
        self != Outcome::Stopped
    }
}

/// Settings snapshot for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub known_devices: KnownDevices,
    /// Ignore devices without an alias
    pub only_known_devices: bool,
    /// Fatal silence period while scanning, `None` to disable
    pub stall_timeout: Option<Duration>,
}

impl DiscoveryOptions {
    /// Options from the config file, with command line aliases applied on top.
    pub fn from_config(config: &Config, aliases: &[Alias]) -> Self {
        Self {
            known_devices: config.known_devices().with_aliases(aliases),
            only_known_devices: config.only_known_devices,
            stall_timeout: config.stall_timeout(),
        }
    }
}

pub struct Discovery {
    options: DiscoveryOptions,
    publisher: Arc<dyn Publisher>,
    state: ScanState,
    tasks: JoinSet<()>,
}

impl Discovery {
    pub fn new(options: DiscoveryOptions, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            options,
            publisher,
            state: ScanState::Idle,
            tasks: JoinSet::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Process transport events until `shutdown` resolves or a fatal
    /// condition ends the loop. Fails only when the event stream cannot be
    /// subscribed.
    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Outcome, ScanError> {
        let mut events = transport.subscribe().await?;
        let mut shutdown = pin!(shutdown);
        let mut stall = pin!(sleep(self.options.stall_timeout.unwrap_or_default()));
        let watch_stall = self.options.stall_timeout.is_some();

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    return Ok(self.shutdown(transport).await);
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(self.transport_closed().await);
                    };
                    if let Some(outcome) = self.handle_event(transport, event, stall.as_mut()).await {
                        return Ok(outcome);
                    }
                }

                () = &mut stall, if watch_stall && self.state == ScanState::Scanning => {
                    error!(
                        timeout_secs = self.options.stall_timeout.unwrap_or_default().as_secs(),
                        "No BLE advertisements received, scanning has stalled"
                    );
                    return Ok(self.halt(Outcome::Stalled).await);
                }

                Some(result) = self.tasks.join_next() => {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        error!(error = %e, "Publish task panicked");
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        transport: &dyn Transport,
        event: TransportEvent,
        stall: Pin<&mut Sleep>,
    ) -> Option<Outcome> {
        match event {
            TransportEvent::PowerStateChanged(PowerState::PoweredOn) => {
                if self.state != ScanState::Idle {
                    debug!(state = ?self.state, "Adapter powered on, not starting scan");
                    return None;
                }
                info!("Starting BLE scanning");
                match transport.start_scanning().await {
                    Ok(()) => {
                        self.state = ScanState::Scanning;
                        self.rearm(stall);
                    }
                    Err(e) => error!(error = %e, "Failed to start BLE scanning"),
                }
            }
            TransportEvent::PowerStateChanged(PowerState::PoweredOff) => warn!("BLE powered off"),
            TransportEvent::PowerStateChanged(PowerState::Unknown) => {
                warn!("BLE adapter state unknown")
            }
            TransportEvent::ScanStarted => info!("BLE scanning started"),
            TransportEvent::ScanStopped => {
                if self.state == ScanState::Stopped {
                    debug!("BLE scanning stopped");
                    return None;
                }
                error!(
                    "BLE scanning stopped. Will quit in {} seconds",
                    SCAN_STOP_EXIT_DELAY.as_secs()
                );
                return Some(self.halt(Outcome::ScanHalted).await);
            }
            TransportEvent::DeviceDiscovered(event) => {
                if self.state != ScanState::Scanning {
                    trace!(address = %event.address, state = ?self.state, "Ignoring discovery");
                    return None;
                }
                self.rearm(stall);
                self.dispatch(event);
            }
        }
        None
    }

    fn rearm(&self, stall: Pin<&mut Sleep>) {
        if let Some(timeout) = self.options.stall_timeout {
            stall.reset(Instant::now() + timeout);
        }
    }

    /// Apply the known-device filter and spawn the publish sequence.
    fn dispatch(&mut self, event: DiscoveryEvent) {
        let known = &self.options.known_devices;
        if self.options.only_known_devices && !known.is_known(&event.address) {
            trace!(address = %event.address, "Skipping unknown device");
            return;
        }

        let device_id = known.resolve(&event.address).to_string();
        trace!(device = %device_id, rssi = event.rssi, "Device discovered");

        let publisher = Arc::clone(&self.publisher);
        self.tasks.spawn(async move {
            publish_discovery(publisher.as_ref(), &device_id, &event).await;
        });
    }

    async fn shutdown(&mut self, transport: &dyn Transport) -> Outcome {
        info!("Stopping BLE scanning");
        self.state = ScanState::Stopped;
        if let Err(e) = transport.stop_scanning().await {
            debug!(error = %e, "Failed to stop BLE scanning");
        }
        self.drain(SHUTDOWN_FLUSH_WINDOW).await;
        Outcome::Stopped
    }

    async fn transport_closed(&mut self) -> Outcome {
        error!("Bluetooth transport closed");
        self.state = ScanState::Stopped;
        self.drain(SHUTDOWN_FLUSH_WINDOW).await;
        self.disconnect().await;
        Outcome::TransportClosed
    }

    async fn halt(&mut self, outcome: Outcome) -> Outcome {
        self.state = ScanState::Stopped;
        sleep(SCAN_STOP_EXIT_DELAY).await;
        self.tasks.shutdown().await;
        self.disconnect().await;
        outcome
    }

    /// Wait up to `window` for publish tasks, then abandon the rest.
    async fn drain(&mut self, window: Duration) {
        if self.tasks.is_empty() {
            return;
        }
        debug!(pending = self.tasks.len(), "Waiting for in-flight publishes");

        let tasks = &mut self.tasks;
        if timeout(window, async { while tasks.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            warn!(abandoned = self.tasks.len(), "Abandoning in-flight publishes");
            self.tasks.shutdown().await;
        }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.publisher.disconnect().await {
            warn!(error = %e, "Failed to disconnect from MQTT broker");
        }
    }
}
