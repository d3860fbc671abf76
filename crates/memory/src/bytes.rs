use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Canonical byte buffer with permissive ingress.
///
/// Callers may send binary fields as JSON byte arrays, Node-style
/// `{"type":"Buffer","data":[...]}` objects, numeric-keyed buffer views,
/// or base64 strings; all normalize here at the store boundary. Downstream
/// code only ever sees the canonical buffer. Serializes as base64.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Normalize any accepted JSON shape into canonical bytes.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => BASE64.decode(s).ok().map(Bytes),
            Value::Array(items) => collect_byte_array(items).map(Bytes),
            Value::Object(obj) => {
                // Node Buffer JSON: {"type":"Buffer","data":[...]}.
                if let Some(Value::Array(items)) = obj.get("data") {
                    return collect_byte_array(items).map(Bytes);
                }
                // Numeric-keyed view: {"0":104,"1":105}.
                let mut indexed: Vec<(usize, u8)> = Vec::with_capacity(obj.len());
                for (k, v) in obj {
                    let idx: usize = k.parse().ok()?;
                    let byte = v.as_u64().filter(|b| *b <= 0xFF)? as u8;
                    indexed.push((idx, byte));
                }
                indexed.sort_by_key(|(idx, _)| *idx);
                Some(Bytes(indexed.into_iter().map(|(_, b)| b).collect()))
            }
            _ => None,
        }
    }
}

fn collect_byte_array(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| v.as_u64().filter(|b| *b <= 0xFF).map(|b| b as u8))
        .collect()
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Bytes::from_value(&value)
            .ok_or_else(|| de::Error::custom("expected bytes as array, buffer, view, or base64"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_byte_array() {
        let b: Bytes = serde_json::from_value(json!([104, 105])).unwrap();
        assert_eq!(b.as_slice(), b"hi");
    }

    #[test]
    fn accepts_base64_string() {
        let b: Bytes = serde_json::from_value(json!("aGk=")).unwrap();
        assert_eq!(b.as_slice(), b"hi");
    }

    #[test]
    fn accepts_node_buffer_object() {
        let b: Bytes = serde_json::from_value(json!({"type": "Buffer", "data": [104, 105]})).unwrap();
        assert_eq!(b.as_slice(), b"hi");
    }

    #[test]
    fn accepts_numeric_keyed_view() {
        let b: Bytes = serde_json::from_value(json!({"1": 105, "0": 104})).unwrap();
        assert_eq!(b.as_slice(), b"hi");
    }

    #[test]
    fn rejects_out_of_range_bytes() {
        assert!(serde_json::from_value::<Bytes>(json!([300])).is_err());
        assert!(serde_json::from_value::<Bytes>(json!(42)).is_err());
    }

    #[test]
    fn serializes_as_base64() {
        assert_eq!(serde_json::to_value(Bytes(b"hi".to_vec())).unwrap(), json!("aGk="));
    }
}
