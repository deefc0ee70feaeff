use crate::publisher::{Message, PublishError, Publisher};
use crate::scanner::{
    DiscoveryEvent, EVENT_CHANNEL_BUFFER_SIZE, ScanError, ServiceData, Transport, TransportEvent,
};
use futures::future::BoxFuture;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// A stable address for unit tests.
pub const TEST_ADDRESS: &str = "aa:bb:cc:dd:ee:ff";

/// Build a discovery event with only the address and signal strength set.
///
/// Tests can override just the fields they care about.
pub fn base_event(address: &str, rssi: i16) -> DiscoveryEvent {
    DiscoveryEvent {
        address: address.to_string(),
        rssi,
        ..Default::default()
    }
}

pub fn service(uuid: &str, data: &[u8]) -> ServiceData {
    ServiceData {
        uuid: uuid.to_string(),
        data: data.to_vec(),
    }
}

/// Publisher that records every attempted message.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, Message, bool)>>,
    failing: Vec<String>,
    disconnects: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send to one of `topics`.
    pub fn failing_on(topics: &[&str]) -> Self {
        Self {
            failing: topics.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Every attempted topic, in order.
    pub fn topics(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _, _)| topic.clone())
            .collect()
    }

    /// Topics whose send succeeded, in order.
    pub fn delivered_topics(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, delivered)| *delivered)
            .map(|(topic, _, _)| topic.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, Message)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, message, _)| (topic.clone(), message.clone()))
            .collect()
    }

    pub fn message(&self, topic: &str) -> Option<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _, _)| t == topic)
            .map(|(_, message, _)| message.clone())
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Publisher for RecordingPublisher {
    fn send(&self, topic: String, message: Message) -> BoxFuture<'_, Result<(), PublishError>> {
        let fail = self.failing.contains(&topic);
        self.sent.lock().unwrap().push((topic.clone(), message, !fail));
        Box::pin(async move {
            if fail {
                Err(PublishError::Client(format!("refused {topic}")))
            } else {
                Ok(())
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Transport replaying a fixed script of events.
#[derive(Debug, Default)]
pub struct FakeTransport {
    events: Vec<TransportEvent>,
    keep_open: bool,
    fail_start: bool,
    sender: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeTransport {
    /// Replay `events`, then close the stream.
    pub fn new(events: Vec<TransportEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Keep the stream open after the script; more events can be pushed with
    /// [`FakeTransport::sender`].
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn sender(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.sender.lock().unwrap().clone()
    }

    /// `subscribe`, `start` and `stop` calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Transport for FakeTransport {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<TransportEvent>, ScanError>> {
        self.record("subscribe");
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE.max(self.events.len()));
        for event in &self.events {
            tx.try_send(event.clone()).unwrap();
        }
        if self.keep_open {
            *self.sender.lock().unwrap() = Some(tx);
        }
        Box::pin(async move { Ok(rx) })
    }

    fn start_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        self.record("start");
        let fail = self.fail_start;
        Box::pin(async move {
            if fail {
                Err(ScanError::Bluetooth("adapter busy".into()))
            } else {
                Ok(())
            }
        })
    }

    fn stop_scanning(&self) -> BoxFuture<'_, Result<(), ScanError>> {
        self.record("stop");
        Box::pin(async { Ok(()) })
    }
}
