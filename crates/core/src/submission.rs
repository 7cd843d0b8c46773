//! Job-submission payload carried by the broker.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::id::{AssetId, ModelTypeId, UserId};
use crate::job::TrainingTarget;

/// A request to train `model_type_id` on `asset_id` for `user_id`.
///
/// Wire form is a JSON object with integer fields; unknown fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub model_type_id: ModelTypeId,
}

impl JobSubmission {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Utf8(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
        // Derived struct decoding also accepts sequences by position.
        if !value.is_object() {
            return Err(DecodeError::Json(format!("expected an object, got {}", kind(&value))));
        }
        serde_json::from_value(value).map_err(|e| DecodeError::Json(e.to_string()))
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing three integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn target(&self) -> TrainingTarget {
        TrainingTarget::new(self.user_id, self.asset_id, self.model_type_id)
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_a_well_formed_payload() {
        let sub = JobSubmission::decode(br#"{"user_id": 1, "asset_id": 20, "model_type_id": 3}"#)
            .unwrap();
        assert_eq!(sub.user_id, UserId(1));
        assert_eq!(sub.asset_id, AssetId(20));
        assert_eq!(sub.model_type_id, ModelTypeId(3));
    }

    #[test]
    fn ignores_unknown_fields() {
        let sub = JobSubmission::decode(
            br#"{"user_id": 1, "asset_id": 2, "model_type_id": 3, "source": "api"}"#,
        )
        .unwrap();
        assert_eq!(sub.target(), TrainingTarget::new(UserId(1), AssetId(2), ModelTypeId(3)));
    }

    #[test]
    fn rejects_missing_and_mistyped_fields() {
        assert!(matches!(
            JobSubmission::decode(br#"{"user_id": 1, "asset_id": 2}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            JobSubmission::decode(br#"{"user_id": "1", "asset_id": 2, "model_type_id": 3}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            JobSubmission::decode(b"not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn rejects_positional_and_scalar_payloads() {
        for payload in [&b"[1, 2, 3]"[..], b"42", b"null", br#""user""#] {
            assert!(
                matches!(JobSubmission::decode(payload), Err(DecodeError::Json(_))),
                "accepted {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(matches!(
            JobSubmission::decode(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::Utf8(_))
        ));
    }

    proptest! {
        #[test]
        fn encoded_submissions_decode_to_themselves(u in any::<i64>(), a in any::<i64>(), m in any::<i64>()) {
            let sub = JobSubmission { user_id: UserId(u), asset_id: AssetId(a), model_type_id: ModelTypeId(m) };
            prop_assert_eq!(JobSubmission::decode(&sub.encode()).unwrap(), sub);
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = JobSubmission::decode(&bytes);
        }
    }
}
