//! Token cost estimation for context payloads.

use serde_json::Value;

/// Estimates how many model tokens a payload will consume.
pub trait TokenEstimator: Send + Sync {
    /// Estimated token count for `payload`.
    fn estimate(&self, payload: &Value) -> u64;
}

/// Serialized JSON length divided by four, rounded up.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerializedLengthEstimator;

impl TokenEstimator for SerializedLengthEstimator {
    fn estimate(&self, payload: &Value) -> u64 {
        let len = match payload {
            // Count the text, not the surrounding quotes.
            Value::String(s) => s.len(),
            other => other.to_string().len(),
        };
        (len as u64).div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_payload() {
        let est = SerializedLengthEstimator;
        assert_eq!(est.estimate(&json!("")), 0);
        assert_eq!(est.estimate(&json!("abcd")), 1);
        assert_eq!(est.estimate(&json!("abcde")), 2);
    }

    #[test]
    fn structured_payload_uses_serialized_form() {
        let est = SerializedLengthEstimator;
        // {"a":1} is 7 bytes
        assert_eq!(est.estimate(&json!({"a": 1})), 2);
        assert_eq!(est.estimate(&Value::Null), 1);
    }
}
