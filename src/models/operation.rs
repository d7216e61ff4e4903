use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString, VariantNames};
use uuid::Uuid;

use crate::models::job::ImageFormat;

/// Operation type names as they appear on the wire and in the database.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Resize,
    Compress,
    Filter,
    Convert,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterKind {
    Grayscale,
    Blur,
    Sharpen,
}

/// Target dimensions for an exact resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ResizeParams {
    #[garde(range(min = 1, max = 16384))]
    pub width: u32,

    #[garde(range(min = 1, max = 16384))]
    pub height: u32,
}

/// Encode quality. The allowed range depends on the caller's trust tier
/// and is checked by the submission policy, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressParams {
    pub quality: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(rename = "type")]
    pub kind: FilterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertParams {
    pub format: ImageFormat,
}

/// A validated transformation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation_type", content = "parameters", rename_all = "lowercase")]
pub enum Operation {
    Resize(ResizeParams),
    Compress(CompressParams),
    Filter(FilterParams),
    Convert(ConvertParams),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Resize(_) => OperationKind::Resize,
            Operation::Compress(_) => OperationKind::Compress,
            Operation::Filter(_) => OperationKind::Filter,
            Operation::Convert(_) => OperationKind::Convert,
        }
    }

    /// Parameter bundle as stored alongside the operation type.
    pub fn parameters(&self) -> Result<Value, serde_json::Error> {
        match self {
            Operation::Resize(p) => serde_json::to_value(p),
            Operation::Compress(p) => serde_json::to_value(p),
            Operation::Filter(p) => serde_json::to_value(p),
            Operation::Convert(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild a persisted operation from its stored type and parameters.
    pub fn from_stored(kind: &str, parameters: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "operation_type": kind,
            "parameters": parameters,
        }))
    }
}

/// Operation exactly as submitted by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    pub operation_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Persisted operation attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Index in the submitted list, used as a tiebreaker on `created_at`.
    pub position: i32,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_form_round_trips() {
        let ops = [
            Operation::Resize(ResizeParams {
                width: 640,
                height: 480,
            }),
            Operation::Compress(CompressParams { quality: 70 }),
            Operation::Filter(FilterParams {
                kind: FilterKind::Grayscale,
            }),
            Operation::Convert(ConvertParams {
                format: ImageFormat::Webp,
            }),
        ];

        for op in ops {
            let params = op.parameters().unwrap();
            let restored = Operation::from_stored(op.kind().as_ref(), params).unwrap();
            assert_eq!(restored, op);
        }
    }

    #[test]
    fn filter_parameters_use_type_key() {
        let op = Operation::Filter(FilterParams {
            kind: FilterKind::Blur,
        });
        assert_eq!(op.parameters().unwrap(), serde_json::json!({ "type": "blur" }));
    }

    #[test]
    fn unknown_stored_kind_is_rejected() {
        assert!(Operation::from_stored("rotate", serde_json::json!({})).is_err());
    }
}
