use crate::error::Result;
use crate::frame::Frame;
use log::*;
use serde_json::Value;

const DATA_FIELD: &[u8] = b"data:";

/// A decoded JSON value carried by a frame, together with its compact wire encoding.
///
/// Payloads are immutable once built and shared read-only between every
/// session stream that matches them.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    value: Value,
    encoded: String,
}

impl Payload {
    pub fn new(value: Value) -> Self {
        // Serializing an in-memory Value cannot fail: all map keys are strings.
        let encoded = value.to_string();
        Self { value, encoded }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The payload re-serialized on a single line, keys in upstream order.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

/// Extracts every payload from the `data:` lines of a frame.
///
/// All data lines are first decoded together as one multi-line value. If that
/// fails each line is decoded on its own and the lines that don't parse are
/// skipped. Frames without data (comments, upstream keep-alives) yield nothing.
pub fn extract_payloads(frame: &Frame) -> Vec<Payload> {
    let data_lines: Vec<&[u8]> = frame
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_FIELD))
        .map(<[u8]>::trim_ascii)
        .filter(|data| !data.is_empty())
        .collect();

    if data_lines.is_empty() {
        return Vec::new();
    }

    let joined = data_lines.join(&b'\n');
    if let Ok(payload) = decode(&joined) {
        return vec![payload];
    }

    data_lines
        .into_iter()
        .filter_map(|data| match decode(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                trace!("Skipping data line: {e}");
                None
            }
        })
        .collect()
}

fn decode(data: &[u8]) -> Result<Payload> {
    let value = serde_json::from_slice::<Value>(data)?;
    Ok(Payload::new(value))
}
