//! Publish sequence for one discovery event.
//!
//! Every event produces, in order: a metadata summary, the manufacturer data
//! (raw and, for Espruino devices, its embedded fields), then each service
//! data entry (raw and decoded). Failed publishes are logged by
//! [`crate::publisher::publish`] and do not interrupt the sequence.

use crate::manufacturer::{EmbeddedDataError, ManufacturerFrame};
use crate::publisher::{
    Message, Publisher, RAW_SEGMENT, device_topic, field_topic, manufacturer_topic, publish,
    publish_object, publish_reading, service_topic,
};
use crate::registry::{self, AttributeData};
use crate::scanner::{DiscoveryEvent, ServiceData};
use serde::Serialize;
use tracing::{debug, error, warn};

/// Metadata published on the device topic. Absent or empty fields are left
/// out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    rssi: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer_data: Option<String>,
}

impl<'a> Summary<'a> {
    fn from_event(event: &'a DiscoveryEvent) -> Self {
        Self {
            rssi: event.rssi,
            name: event.local_name.as_deref().filter(|name| !name.is_empty()),
            manufacturer_data: event
                .manufacturer_data
                .as_deref()
                .filter(|data| !data.is_empty())
                .map(hex::encode),
        }
    }
}

/// Publish everything carried by `event` under the device segment `device_id`.
pub async fn publish_discovery(publisher: &dyn Publisher, device_id: &str, event: &DiscoveryEvent) {
    publish_summary(publisher, device_id, event).await;

    if let Some(frame) = event
        .manufacturer_data
        .as_deref()
        .and_then(ManufacturerFrame::parse)
    {
        publish_manufacturer(publisher, device_id, &frame).await;
    }

    for service in &event.service_data {
        publish_service(publisher, device_id, service).await;
    }
}

async fn publish_summary(publisher: &dyn Publisher, device_id: &str, event: &DiscoveryEvent) {
    match Message::json(&Summary::from_event(event)) {
        Ok(message) => {
            publish(publisher, device_topic(device_id), message).await;
        }
        Err(e) => warn!(device = %device_id, error = %e, "Failed to serialize device summary"),
    }
}

async fn publish_manufacturer(
    publisher: &dyn Publisher,
    device_id: &str,
    frame: &ManufacturerFrame<'_>,
) {
    let topic = manufacturer_topic(device_id, &frame.company_id);
    publish(publisher, topic.clone(), Message::Text(frame.payload_hex())).await;

    if !frame.is_espruino() {
        return;
    }

    match frame.embedded_object() {
        Ok(fields) => publish_object(publisher, &topic, fields).await,
        Err(EmbeddedDataError::NotAnObject) => {
            debug!(device = %device_id, "Manufacturer data is not an object, skipping fields");
        }
        Err(e) => error!(
            device = %device_id,
            data = %frame.payload_text(),
            error = %e,
            "Malformed JSON received in manufacturer data"
        ),
    }
}

async fn publish_service(publisher: &dyn Publisher, device_id: &str, service: &ServiceData) {
    let topic = service_topic(device_id, &service.uuid);
    publish(publisher, topic.clone(), Message::Text(hex::encode(&service.data))).await;

    match registry::decode(&service.uuid, &service.data) {
        AttributeData::Reading(reading) => {
            debug!(
                device = %device_id,
                service = registry::label(&service.uuid),
                fields = reading.len(),
                "Decoded service data"
            );
            publish_reading(publisher, &topic, &reading).await;
        }
        AttributeData::Absent => {
            debug!(
                device = %device_id,
                service = registry::label(&service.uuid),
                "Service data not recognised"
            );
        }
        AttributeData::Raw(data) => {
            publish(
                publisher,
                field_topic(&topic, RAW_SEGMENT),
                Message::Bytes(data.to_vec()),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingPublisher, TEST_ADDRESS, base_event, service};
    use serde_json::json;

    const DEVICE: &str = "/ble/advertise/aa:bb:cc:dd:ee:ff";

    fn text(s: &str) -> Message {
        Message::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_publish_order_for_full_event() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            local_name: Some("Puck.js".into()),
            manufacturer_data: Some(b"\x90\x05{t:21}".to_vec()),
            service_data: vec![
                service("180f", &[0x64]),
                service("6e400001b5a3f393e0a9e50e24dcca9e", &[0x01, 0x02]),
            ],
            ..base_event(TEST_ADDRESS, -60)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.messages(),
            vec![
                (
                    DEVICE.to_string(),
                    Message::Json(json!({
                        "rssi": -60,
                        "name": "Puck.js",
                        "manufacturerData": "90057b743a32317d",
                    }))
                ),
                (
                    format!("{DEVICE}/manufacturer/0590"),
                    text("7b743a32317d")
                ),
                (format!("{DEVICE}/manufacturer/0590/t"), Message::Json(json!(21))),
                (format!("{DEVICE}/180f"), text("64")),
                (format!("{DEVICE}/180f/battery"), text("100")),
                (
                    format!("{DEVICE}/6e400001b5a3f393e0a9e50e24dcca9e"),
                    text("0102")
                ),
                (
                    format!("{DEVICE}/6e400001b5a3f393e0a9e50e24dcca9e/raw"),
                    Message::Bytes(vec![0x01, 0x02])
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_summary_omits_absent_fields() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            local_name: Some(String::new()),
            manufacturer_data: Some(Vec::new()),
            ..base_event(TEST_ADDRESS, -71)
        };

        publish_discovery(&publisher, "kitchen", &event).await;

        // Empty manufacturer data has no manufacturer phase
        assert_eq!(
            publisher.messages(),
            vec![(
                "/ble/advertise/kitchen".to_string(),
                Message::Json(json!({"rssi": -71}))
            )]
        );
    }

    #[tokio::test]
    async fn test_malformed_espruino_data_still_publishes_raw() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            manufacturer_data: Some(b"\x90\x05{t:".to_vec()),
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.topics(),
            vec![DEVICE.to_string(), format!("{DEVICE}/manufacturer/0590")]
        );
    }

    #[tokio::test]
    async fn test_non_object_espruino_data_is_skipped() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            manufacturer_data: Some(b"\x90\x05[1,2]".to_vec()),
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(publisher.topics().len(), 2);
    }

    #[tokio::test]
    async fn test_other_manufacturers_publish_raw_only() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            manufacturer_data: Some(vec![0x99, 0x04, 0x05, 0x12]),
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.message(&format!("{DEVICE}/manufacturer/0499")),
            Some(text("0512"))
        );
        assert_eq!(publisher.topics().len(), 2);
    }

    #[tokio::test]
    async fn test_eddystone_fields() {
        let publisher = RecordingPublisher::new();
        let mut payload = vec![0x10, 0x00, 0x02];
        payload.extend_from_slice(b"example.com");
        let event = DiscoveryEvent {
            service_data: vec![service("feaa", &payload)],
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, "beacon", &event).await;

        assert_eq!(
            publisher.message("/ble/advertise/beacon/feaa/url"),
            Some(text("http://example.com"))
        );
        assert_eq!(
            publisher.message("/ble/advertise/beacon/feaa/rssi@1m"),
            Some(text("0"))
        );
    }

    #[tokio::test]
    async fn test_unrecognised_eddystone_frame_publishes_raw_only() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            service_data: vec![service("feaa", &[0x00, 0x01])],
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.topics(),
            vec![DEVICE.to_string(), format!("{DEVICE}/feaa")]
        );
    }

    #[tokio::test]
    async fn test_services_published_in_received_order() {
        let publisher = RecordingPublisher::new();
        let event = DiscoveryEvent {
            service_data: vec![
                service("2a6f", &[0x10, 0x0E]),
                service("2a6e", &[0x20, 0x4E]),
            ],
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.topics()[1..],
            [
                format!("{DEVICE}/2a6f"),
                format!("{DEVICE}/2a6f/humidity"),
                format!("{DEVICE}/2a6e"),
                format!("{DEVICE}/2a6e/temp"),
            ]
        );
        assert_eq!(publisher.message(&format!("{DEVICE}/2a6f/humidity")), Some(text("36")));
        assert_eq!(publisher.message(&format!("{DEVICE}/2a6e/temp")), Some(text("-56")));
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_stop_sequence() {
        let publisher = RecordingPublisher::failing_on(&[DEVICE]);
        let event = DiscoveryEvent {
            service_data: vec![service("180f", &[0x50])],
            ..base_event(TEST_ADDRESS, -50)
        };

        publish_discovery(&publisher, TEST_ADDRESS, &event).await;

        assert_eq!(
            publisher.delivered_topics(),
            vec![format!("{DEVICE}/180f"), format!("{DEVICE}/180f/battery")]
        );
    }
}
