use serde_json::Value;

pub const SERIALIZER_DEFAULT: &str = "default";
pub const SERIALIZER_JSON: &str = "json";

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

/// Byte-level encoding of response payloads. The gateway uses the same
/// serializer for success and error bodies.
pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn marshal(&self, value: &Value) -> anyhow::Result<Vec<u8>>;
    fn unmarshal(&self, data: &[u8]) -> anyhow::Result<Value>;
}

/// JSON serializer registered under both `default` and `json`.
#[derive(Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn marshal(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal(&self, data: &[u8]) -> anyhow::Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}
