//! Table of known service data identifiers.
//!
//! Maps the short hex identifiers found in advertisements to a display label
//! and, for the formats we understand, a payload decoder.

use crate::decoder::{self, Decoder};
use crate::reading::Reading;

/// One row of the identifier table.
#[derive(Debug, Clone, Copy)]
pub struct Attribute {
    /// Lower-case hex identifier, 4 chars for SIG-assigned, 32 for vendor UUIDs
    pub id: &'static str,
    /// Human-readable label
    pub label: &'static str,
    pub decoder: Option<Decoder>,
}

const ATTRIBUTES: &[Attribute] = &[
    Attribute {
        id: "1809",
        label: "Temperature",
        decoder: Some(decoder::temperature),
    },
    Attribute {
        id: "180a",
        label: "Device Information",
        decoder: None,
    },
    Attribute {
        id: "180f",
        label: "Battery Percentage",
        decoder: Some(decoder::battery),
    },
    Attribute {
        id: "181c",
        label: "User Data",
        decoder: None,
    },
    Attribute {
        id: "feaa",
        label: "Eddystone",
        decoder: Some(decoder::eddystone_url),
    },
    Attribute {
        id: "2a6e",
        label: "Temperature",
        decoder: Some(decoder::temperature_celsius),
    },
    Attribute {
        id: "2a6f",
        label: "Humidity",
        decoder: Some(decoder::humidity),
    },
    Attribute {
        id: "2a6d",
        label: "Pressure",
        decoder: Some(decoder::pressure),
    },
    Attribute {
        id: "6e400001b5a3f393e0a9e50e24dcca9e",
        label: "nus",
        decoder: None,
    },
    Attribute {
        id: "6e400002b5a3f393e0a9e50e24dcca9e",
        label: "nus_tx",
        decoder: None,
    },
    Attribute {
        id: "6e400003b5a3f393e0a9e50e24dcca9e",
        label: "nus_rx",
        decoder: None,
    },
];

/// Result of decoding a service payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData<'a> {
    /// A decoder produced a reading.
    Reading(Reading),
    /// A decoder is registered but did not recognise the payload.
    Absent,
    /// No decoder is registered; the payload is passed through untouched.
    Raw(&'a [u8]),
}

/// Find the table row for an identifier.
pub fn lookup(id: &str) -> Option<&'static Attribute> {
    ATTRIBUTES.iter().find(|attribute| attribute.id == id)
}

/// Display label for an identifier, or the identifier itself when unknown.
pub fn label(id: &str) -> &str {
    lookup(id).map_or(id, |attribute| attribute.label)
}

/// Decode a service payload with the decoder registered for `id`.
///
/// ```
/// use ble_mqtt::registry::{AttributeData, decode};
///
/// let payload = [0x01, 0x02];
/// assert_eq!(decode("abcd", &payload), AttributeData::Raw(&payload));
/// ```
pub fn decode<'a>(id: &str, data: &'a [u8]) -> AttributeData<'a> {
    match lookup(id).and_then(|attribute| attribute.decoder) {
        Some(decode) => decode(data).map_or(AttributeData::Absent, AttributeData::Reading),
        None => AttributeData::Raw(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::FieldValue;

    #[test]
    fn test_label_known() {
        assert_eq!(label("180f"), "Battery Percentage");
        assert_eq!(label("feaa"), "Eddystone");
        assert_eq!(label("6e400003b5a3f393e0a9e50e24dcca9e"), "nus_rx");
    }

    #[test]
    fn test_label_unknown_returns_identifier() {
        assert_eq!(label("beef"), "beef");
        assert_eq!(label(""), "");
    }

    #[test]
    fn test_identifiers_are_unique() {
        for (i, a) in ATTRIBUTES.iter().enumerate() {
            assert!(
                ATTRIBUTES[i + 1..].iter().all(|b| b.id != a.id),
                "duplicate identifier {}",
                a.id
            );
        }
    }

    #[test]
    fn test_decode_dispatches_by_identifier() {
        match decode("180f", &[0x64]) {
            AttributeData::Reading(reading) => {
                assert_eq!(reading.get("battery"), Some(&FieldValue::Number(100.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match decode("2a6f", &[0x10, 0x0E]) {
            AttributeData::Reading(reading) => {
                assert_eq!(reading.get("humidity"), Some(&FieldValue::Number(36.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_identifier_passes_payload_through() {
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(decode("1234", &payload), AttributeData::Raw(&payload[..]));
    }

    #[test]
    fn test_decode_labelled_identifier_without_decoder_is_raw() {
        let payload = [0x01];
        assert_eq!(decode("180a", &payload), AttributeData::Raw(&payload[..]));
    }

    #[test]
    fn test_decode_unrecognised_frame_is_absent() {
        assert_eq!(decode("feaa", &[0x00, 0x01]), AttributeData::Absent);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let payload = [0x10, 0xEC, 0x01, b'a', b'b'];
        assert_eq!(decode("feaa", &payload), decode("feaa", &payload));
        assert_eq!(decode("2a6d", &payload), decode("2a6d", &payload));
    }
}
