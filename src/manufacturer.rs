//! Manufacturer-specific advertisement data.
//!
//! The first two bytes are the Bluetooth SIG company identifier in
//! little-endian order; the rest is vendor defined. Espruino devices put
//! JSON5 text there, which is decoded into individual fields.

use crate::decoder::ascii;
use serde_json::{Map, Value};
use thiserror::Error;

/// Espruino company identifier, rendered as in [`ManufacturerFrame::company_id`].
pub const ESPRUINO_COMPANY_ID: &str = "0590";

/// Manufacturer data split into company identifier and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerFrame<'a> {
    /// Company identifier as big-endian lower-case hex, e.g. `"0590"`
    pub company_id: String,
    /// Everything after the company identifier
    pub payload: &'a [u8],
}

/// Errors from interpreting the embedded Espruino text.
#[derive(Error, Debug)]
pub enum EmbeddedDataError {
    #[error("malformed JSON in manufacturer data: {0}")]
    Malformed(#[from] json5::Error),
    #[error("manufacturer data is not a JSON object")]
    NotAnObject,
}

impl<'a> ManufacturerFrame<'a> {
    /// Split raw manufacturer data. Returns `None` for empty data.
    ///
    /// ```
    /// use ble_mqtt::manufacturer::ManufacturerFrame;
    ///
    /// let frame = ManufacturerFrame::parse(&[0x90, 0x05, 0x7b, 0x7d]).unwrap();
    /// assert_eq!(frame.company_id, "0590");
    /// assert_eq!(frame.payload, &[0x7b, 0x7d]);
    /// ```
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let split = data.len().min(2);
        let mut id_bytes = data[..split].to_vec();
        id_bytes.reverse();

        Some(Self {
            company_id: hex::encode(id_bytes),
            payload: &data[split..],
        })
    }

    pub fn is_espruino(&self) -> bool {
        self.company_id == ESPRUINO_COMPANY_ID
    }

    /// Payload as lower-case hex.
    pub fn payload_hex(&self) -> String {
        hex::encode(self.payload)
    }

    /// Parse the payload as JSON5 text into an object.
    pub fn embedded_object(&self) -> Result<Map<String, Value>, EmbeddedDataError> {
        match json5::from_str::<Value>(&ascii(self.payload))? {
            Value::Object(fields) => Ok(fields),
            _ => Err(EmbeddedDataError::NotAnObject),
        }
    }

    /// Payload decoded as ASCII, for diagnostics.
    pub fn payload_text(&self) -> String {
        ascii(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reverses_company_id() {
        let data = [0x90, 0x05, 0x01, 0x02, 0x03];
        let frame = ManufacturerFrame::parse(&data).unwrap();
        assert_eq!(frame.company_id, "0590");
        assert_eq!(frame.payload, &[0x01, 0x02, 0x03]);
        assert!(frame.is_espruino());
    }

    #[test]
    fn test_parse_other_company() {
        let frame = ManufacturerFrame::parse(&[0x99, 0x04, 0x05]).unwrap();
        assert_eq!(frame.company_id, "0499");
        assert!(!frame.is_espruino());
        assert_eq!(frame.payload_hex(), "05");
    }

    #[test]
    fn test_parse_identifier_only() {
        let frame = ManufacturerFrame::parse(&[0x4c, 0x00]).unwrap();
        assert_eq!(frame.company_id, "004c");
        assert!(frame.payload.is_empty());
        assert_eq!(frame.payload_hex(), "");
    }

    #[test]
    fn test_parse_single_byte() {
        let frame = ManufacturerFrame::parse(&[0xAB]).unwrap();
        assert_eq!(frame.company_id, "ab");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_parse_empty() {
        assert!(ManufacturerFrame::parse(&[]).is_none());
    }

    #[test]
    fn test_embedded_object_lenient_syntax() {
        let mut data = vec![0x90, 0x05];
        data.extend_from_slice(b"{t:21.5,name:'puck',}");
        let frame = ManufacturerFrame::parse(&data).unwrap();

        let fields = frame.embedded_object().unwrap();
        let keys: Vec<_> = fields.keys().cloned().collect();
        assert_eq!(keys, vec!["t".to_string(), "name".to_string()]);
        assert_eq!(fields["name"], Value::String("puck".to_string()));
        assert_eq!(fields["t"].as_f64(), Some(21.5));
    }

    #[test]
    fn test_embedded_object_malformed() {
        let mut data = vec![0x90, 0x05];
        data.extend_from_slice(b"{t:");
        let frame = ManufacturerFrame::parse(&data).unwrap();
        assert!(matches!(
            frame.embedded_object(),
            Err(EmbeddedDataError::Malformed(_))
        ));
    }

    #[test]
    fn test_embedded_object_rejects_non_objects() {
        for text in [&b"42"[..], b"'hi'", b"[1,2]", b"null"] {
            let mut data = vec![0x90, 0x05];
            data.extend_from_slice(text);
            let frame = ManufacturerFrame::parse(&data).unwrap();
            assert!(matches!(
                frame.embedded_object(),
                Err(EmbeddedDataError::NotAnObject)
            ));
        }
    }
}
