//! Outgoing messages: key=value fields plus named binary blobs.

use std::sync::Arc;

/// One named binary payload riding on a message.
pub struct MessageData {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MessageData {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> MessageData {
        MessageData {
            name: name.into(),
            bytes,
        }
    }
}

/// A message to the front end: `key=value` strings (a `#` prefix on the key
/// marks the value as numeric) and up to two binary blobs.
pub struct OutgoingMessage {
    pub fields: Vec<String>,
    pub blobs: Vec<MessageData>,
}

impl OutgoingMessage {
    pub fn new(fields: Vec<String>) -> OutgoingMessage {
        OutgoingMessage {
            fields,
            blobs: Vec::new(),
        }
    }

    pub fn with_blob(mut self, blob: MessageData) -> OutgoingMessage {
        assert!(self.blobs.len() < 2, "at most two blobs per message");
        self.blobs.push(blob);
        self
    }

    /// Value of a field, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.iter().find_map(|f| {
            let (k, v) = f.split_once('=')?;
            (k == key || k.strip_prefix('#') == Some(key)).then_some(v)
        })
    }
}

/// Host callback delivering a message to the front end. Called from worker
/// threads; one call per message.
pub type MessageCallback = Arc<dyn Fn(OutgoingMessage) + Send + Sync>;

/// Doubles travel as text with 17 significant digits, enough to round-trip.
pub fn fmt_double(v: f64) -> String {
    format!("{v:.16e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_handles_numeric_prefix() {
        let msg = OutgoingMessage::new(vec![
            "msg=tile".to_string(),
            "#row=3".to_string(),
            "seqs=1:2".to_string(),
        ]);
        assert_eq!(msg.field("msg"), Some("tile"));
        assert_eq!(msg.field("row"), Some("3"));
        assert_eq!(msg.field("seqs"), Some("1:2"));
        assert_eq!(msg.field("col"), None);
    }

    #[test]
    fn doubles_round_trip_through_text() {
        for v in [0.1, -1234.5678901234567, 1e-300, 2.0 / 3.0] {
            let s = fmt_double(v);
            assert_eq!(s.parse::<f64>().unwrap(), v, "{s}");
        }
    }
}
