//! Service data payload decoders.
//!
//! Every decoder is a pure function over an arbitrary byte slice. Bytes past
//! the end of the payload read as zero, so short or empty payloads decode to
//! whatever the arithmetic yields instead of failing.

use crate::reading::Reading;

/// A decoder turns a raw service payload into a reading, or nothing when the
/// payload is not of the expected frame type.
pub type Decoder = fn(&[u8]) -> Option<Reading>;

/// Eddystone frame type for URL frames.
pub const EDDYSTONE_URL_FRAME: u8 = 0x10;

/// URL scheme prefixes indexed by the Eddystone-URL scheme byte.
pub const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

fn byte(data: &[u8], index: usize) -> u8 {
    data.get(index).copied().unwrap_or(0)
}

fn le16(data: &[u8]) -> f64 {
    f64::from(u16::from_le_bytes([byte(data, 0), byte(data, 1)]))
}

/// Values of 128 and above wrap to negative, as for an 8-bit two's complement
/// number. Applied to the final value, even when it has already been scaled.
fn wrap_signed(value: f64) -> f64 {
    if value >= 128.0 { value - 256.0 } else { value }
}

/// Decode bytes as 7-bit ASCII; the high bit of every byte is dropped.
pub fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(b & 0x7f)).collect()
}

/// Temperature service (`1809`).
///
/// Two-byte payloads are little-endian hundredths of a degree, anything else
/// is read as a single whole-degree byte.
pub fn temperature(data: &[u8]) -> Option<Reading> {
    let value = if data.len() == 2 {
        le16(data) / 100.0
    } else {
        f64::from(byte(data, 0))
    };

    Some(Reading::new().with("temp", wrap_signed(value)))
}

/// Temperature characteristic (`2a6e`), little-endian hundredths of a degree.
pub fn temperature_celsius(data: &[u8]) -> Option<Reading> {
    Some(Reading::new().with("temp", wrap_signed(le16(data) / 100.0)))
}

/// Humidity characteristic (`2a6f`), little-endian hundredths of a percent.
pub fn humidity(data: &[u8]) -> Option<Reading> {
    Some(Reading::new().with("humidity", le16(data) / 100.0))
}

/// Pressure characteristic (`2a6d`) in tenths of a pascal.
///
/// Byte 1 is placed in the top three byte positions and byte 0 in the lowest,
/// so only two payload bytes contribute. The top position is a 32-bit signed
/// shift and goes negative once byte 1 reaches 0x80.
pub fn pressure(data: &[u8]) -> Option<Reading> {
    let low = i64::from(byte(data, 0));
    let high = byte(data, 1);
    let value = i64::from(i32::from(high) << 24)
        + (i64::from(high) << 16)
        + (i64::from(high) << 8)
        + low;

    Some(Reading::new().with("pressure", value as f64 / 10.0))
}

/// Battery level service (`180f`), percent in a single byte.
pub fn battery(data: &[u8]) -> Option<Reading> {
    Some(Reading::new().with("battery", f64::from(byte(data, 0))))
}

/// Eddystone service (`feaa`). Only URL frames are decoded.
pub fn eddystone_url(data: &[u8]) -> Option<Reading> {
    if data.first() != Some(&EDDYSTONE_URL_FRAME) {
        return None;
    }

    let rssi = wrap_signed(f64::from(byte(data, 1)));
    let prefix = URL_SCHEMES
        .get(usize::from(byte(data, 2)))
        .copied()
        .unwrap_or("");
    let body = ascii(data.get(3..).unwrap_or_default());

    Some(
        Reading::new()
            .with("url", format!("{prefix}{body}"))
            .with("rssi@1m", rssi),
    )
}
