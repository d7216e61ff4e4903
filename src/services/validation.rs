use garde::Validate;
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::models::job::{ImageFormat, TrustTier};
use crate::models::operation::{
    CompressParams, ConvertParams, FilterKind, FilterParams, Operation, OperationKind,
    RawOperation, ResizeParams,
};
use strum::VariantNames;

const MIB: usize = 1024 * 1024;

/// Quotas applied once per submission, selected by the caller's trust tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    pub tier: TrustTier,
    pub max_upload_bytes: usize,
    pub quality: RangeInclusive<i64>,
    /// `None` means unbounded.
    pub max_operations: Option<usize>,
}

impl TierPolicy {
    pub fn for_tier(tier: TrustTier) -> Self {
        match tier {
            TrustTier::Authenticated => Self {
                tier,
                max_upload_bytes: 10 * MIB,
                quality: 10..=95,
                max_operations: None,
            },
            TrustTier::Anonymous => Self {
                tier,
                max_upload_bytes: 2 * MIB,
                quality: 40..=80,
                max_operations: Some(2),
            },
        }
    }
}

/// Rejection of a submission before any job is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown operation type '{operation_type}'. Allowed: {}", .allowed.join(", "))]
    UnknownOperation {
        operation_type: String,
        allowed: Vec<&'static str>,
    },

    #[error("{operation} requires '{parameter}'")]
    MissingParameter {
        operation: OperationKind,
        parameter: &'static str,
    },

    #[error("{operation} parameter '{parameter}' is invalid: {reason}")]
    InvalidParameter {
        operation: OperationKind,
        parameter: &'static str,
        reason: String,
    },

    #[error("Invalid filter '{value}'. Allowed: {}", .allowed.join(", "))]
    UnsupportedFilter {
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("Invalid format '{value}'. Allowed: {}", .allowed.join(", "))]
    UnsupportedFormat {
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("At least one operation is required")]
    NoOperations,

    #[error("File size exceeds allowed limit ({}MB)", .limit / MIB)]
    FileTooLarge { size: usize, limit: usize },

    #[error("{tier} users: quality must be {}-{}", .allowed.start(), .allowed.end())]
    QualityOutOfRange {
        tier: TrustTier,
        quality: i64,
        allowed: RangeInclusive<i64>,
    },

    #[error("{tier} users can only perform {limit} operations")]
    TooManyOperations {
        tier: TrustTier,
        limit: usize,
        requested: usize,
    },

    #[error("Uploaded file is not a supported image. Allowed: {}", ImageFormat::VARIANTS.join(", "))]
    UnsupportedImage,
}

/// Validate one operation against its per-type schema.
///
/// Quality bounds are tier dependent and are left to [`validate_submission`].
pub fn validate_operation(raw: &RawOperation) -> Result<Operation, ValidationError> {
    let kind = OperationKind::from_str(&raw.operation_type).map_err(|_| {
        ValidationError::UnknownOperation {
            operation_type: raw.operation_type.clone(),
            allowed: OperationKind::VARIANTS.to_vec(),
        }
    })?;
    let params = &raw.parameters;

    match kind {
        OperationKind::Resize => {
            let resize = ResizeParams {
                width: dimension_param(params, kind, "width")?,
                height: dimension_param(params, kind, "height")?,
            };
            resize
                .validate()
                .map_err(|report| ValidationError::InvalidParameter {
                    operation: kind,
                    parameter: "width/height",
                    reason: report.to_string(),
                })?;
            Ok(Operation::Resize(resize))
        }
        OperationKind::Compress => {
            let quality = integer_param(params, kind, "quality")?;
            Ok(Operation::Compress(CompressParams { quality }))
        }
        OperationKind::Filter => {
            let value = string_param(params, kind, "type")?;
            let filter = FilterKind::from_str(value).map_err(|_| {
                ValidationError::UnsupportedFilter {
                    value: value.to_string(),
                    allowed: FilterKind::VARIANTS.to_vec(),
                }
            })?;
            Ok(Operation::Filter(FilterParams { kind: filter }))
        }
        OperationKind::Convert => {
            let value = string_param(params, kind, "format")?;
            let format = parse_format(value)?;
            Ok(Operation::Convert(ConvertParams { format }))
        }
    }
}

/// Parse a target encoding name, case-insensitively.
pub fn parse_format(value: &str) -> Result<ImageFormat, ValidationError> {
    ImageFormat::from_str(value.trim()).map_err(|_| ValidationError::UnsupportedFormat {
        value: value.to_string(),
        allowed: ImageFormat::VARIANTS.to_vec(),
    })
}

/// Validate a whole submission for the caller's trust tier.
///
/// Returns the typed operations in submission order. Any violation rejects
/// the entire submission.
pub fn validate_submission(
    tier: TrustTier,
    source_size: usize,
    operations: &[RawOperation],
) -> Result<Vec<Operation>, ValidationError> {
    let policy = TierPolicy::for_tier(tier);

    if source_size > policy.max_upload_bytes {
        return Err(ValidationError::FileTooLarge {
            size: source_size,
            limit: policy.max_upload_bytes,
        });
    }

    if operations.is_empty() {
        return Err(ValidationError::NoOperations);
    }

    if let Some(limit) = policy.max_operations {
        if operations.len() > limit {
            return Err(ValidationError::TooManyOperations {
                tier,
                limit,
                requested: operations.len(),
            });
        }
    }

    let validated = operations
        .iter()
        .map(validate_operation)
        .collect::<Result<Vec<_>, _>>()?;

    for op in &validated {
        if let Operation::Compress(CompressParams { quality }) = op {
            if !policy.quality.contains(quality) {
                return Err(ValidationError::QualityOutOfRange {
                    tier,
                    quality: *quality,
                    allowed: policy.quality.clone(),
                });
            }
        }
    }

    Ok(validated)
}

fn present<'a>(
    params: &'a Map<String, Value>,
    operation: OperationKind,
    parameter: &'static str,
) -> Result<&'a Value, ValidationError> {
    params
        .get(parameter)
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingParameter {
            operation,
            parameter,
        })
}

/// Accepts JSON integers, integral floats and numeric strings.
fn integer_param(
    params: &Map<String, Value>,
    operation: OperationKind,
    parameter: &'static str,
) -> Result<i64, ValidationError> {
    let value = present(params, operation, parameter)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ValidationError::InvalidParameter {
        operation,
        parameter,
        reason: format!("expected a whole number, got {}", value),
    })
}

fn dimension_param(
    params: &Map<String, Value>,
    operation: OperationKind,
    parameter: &'static str,
) -> Result<u32, ValidationError> {
    let value = integer_param(params, operation, parameter)?;
    u32::try_from(value).map_err(|_| ValidationError::InvalidParameter {
        operation,
        parameter,
        reason: format!("expected a positive number of pixels, got {}", value),
    })
}

fn string_param<'a>(
    params: &'a Map<String, Value>,
    operation: OperationKind,
    parameter: &'static str,
) -> Result<&'a str, ValidationError> {
    let value = present(params, operation, parameter)?;
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(ValidationError::MissingParameter {
            operation,
            parameter,
        }),
        None => Err(ValidationError::InvalidParameter {
            operation,
            parameter,
            reason: format!("expected a string, got {}", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(operation_type: &str, parameters: Value) -> RawOperation {
        RawOperation {
            operation_type: operation_type.to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }

    fn compress(quality: i64) -> RawOperation {
        raw("compress", json!({ "quality": quality }))
    }

    #[test]
    fn resize_requires_width_and_height() {
        let op = validate_operation(&raw("resize", json!({ "width": 800, "height": 600 }))).unwrap();
        assert_eq!(
            op,
            Operation::Resize(ResizeParams {
                width: 800,
                height: 600
            })
        );

        let err = validate_operation(&raw("resize", json!({ "width": 800 }))).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingParameter {
                operation: OperationKind::Resize,
                parameter: "height"
            }
        );
    }

    #[test]
    fn resize_accepts_numeric_strings() {
        let op = validate_operation(&raw("resize", json!({ "width": "320", "height": 240.0 }))).unwrap();
        assert_eq!(
            op,
            Operation::Resize(ResizeParams {
                width: 320,
                height: 240
            })
        );
    }

    #[test]
    fn resize_rejects_zero_and_negative_dimensions() {
        assert!(matches!(
            validate_operation(&raw("resize", json!({ "width": 0, "height": 10 }))),
            Err(ValidationError::InvalidParameter { .. })
        ));
        assert!(matches!(
            validate_operation(&raw("resize", json!({ "width": -5, "height": 10 }))),
            Err(ValidationError::InvalidParameter { .. })
        ));
        assert!(matches!(
            validate_operation(&raw("resize", json!({ "width": "wide", "height": 10 }))),
            Err(ValidationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn compress_requires_quality_but_not_a_range() {
        assert_eq!(
            validate_operation(&compress(150)).unwrap(),
            Operation::Compress(CompressParams { quality: 150 })
        );
        assert!(matches!(
            validate_operation(&raw("compress", json!({}))),
            Err(ValidationError::MissingParameter { parameter: "quality", .. })
        ));
    }

    #[test]
    fn unknown_filter_reports_allowed_values() {
        let err = validate_operation(&raw("filter", json!({ "type": "sepia" }))).unwrap_err();
        match &err {
            ValidationError::UnsupportedFilter { value, allowed } => {
                assert_eq!(value, "sepia");
                assert_eq!(allowed, &vec!["grayscale", "blur", "sharpen"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Invalid filter 'sepia'. Allowed: grayscale, blur, sharpen"
        );
    }

    #[test]
    fn convert_format_is_case_insensitive() {
        assert_eq!(
            validate_operation(&raw("convert", json!({ "format": "PNG" }))).unwrap(),
            Operation::Convert(ConvertParams {
                format: ImageFormat::Png
            })
        );

        let err = validate_operation(&raw("convert", json!({ "format": "tiff" }))).unwrap_err();
        assert_eq!(err.to_string(), "Invalid format 'tiff'. Allowed: jpg, png, webp");

        assert!(matches!(
            validate_operation(&raw("convert", json!({ "format": "" }))),
            Err(ValidationError::MissingParameter { parameter: "format", .. })
        ));
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let err = validate_operation(&raw("rotate", json!({ "degrees": 90 }))).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownOperation { .. }));
    }

    #[test]
    fn quality_bounds_depend_on_tier() {
        assert!(validate_submission(TrustTier::Authenticated, 1024, &[compress(95)]).is_ok());
        assert!(validate_submission(TrustTier::Authenticated, 1024, &[compress(10)]).is_ok());
        assert!(matches!(
            validate_submission(TrustTier::Authenticated, 1024, &[compress(97)]),
            Err(ValidationError::QualityOutOfRange { quality: 97, .. })
        ));

        assert!(validate_submission(TrustTier::Anonymous, 1024, &[compress(60)]).is_ok());
        let err = validate_submission(TrustTier::Anonymous, 1024, &[compress(90)]).unwrap_err();
        assert_eq!(err.to_string(), "Anonymous users: quality must be 40-80");
    }

    #[test]
    fn anonymous_callers_limited_to_two_operations() {
        let ops = vec![
            raw("resize", json!({ "width": 10, "height": 10 })),
            raw("filter", json!({ "type": "blur" })),
            raw("convert", json!({ "format": "png" })),
        ];

        assert!(matches!(
            validate_submission(TrustTier::Anonymous, 1024, &ops),
            Err(ValidationError::TooManyOperations {
                limit: 2,
                requested: 3,
                ..
            })
        ));
        assert_eq!(
            validate_submission(TrustTier::Authenticated, 1024, &ops)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn upload_size_limit_depends_on_tier() {
        let ops = [raw("filter", json!({ "type": "grayscale" }))];
        let three_mib = 3 * MIB;

        let err = validate_submission(TrustTier::Anonymous, three_mib, &ops).unwrap_err();
        assert_eq!(err.to_string(), "File size exceeds allowed limit (2MB)");
        assert!(validate_submission(TrustTier::Authenticated, three_mib, &ops).is_ok());
        assert!(matches!(
            validate_submission(TrustTier::Authenticated, 10 * MIB + 1, &ops),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn one_bad_operation_rejects_the_submission() {
        let ops = [
            raw("resize", json!({ "width": 10, "height": 10 })),
            raw("filter", json!({ "type": "sepia" })),
        ];
        assert!(validate_submission(TrustTier::Authenticated, 10, &ops).is_err());
    }

    #[test]
    fn empty_operation_list_is_rejected() {
        assert_eq!(
            validate_submission(TrustTier::Authenticated, 10, &[]),
            Err(ValidationError::NoOperations)
        );
    }

    #[test]
    fn validated_operations_keep_submission_order() {
        let ops = [
            raw("convert", json!({ "format": "webp" })),
            raw("resize", json!({ "width": 4, "height": 4 })),
        ];
        let validated = validate_submission(TrustTier::Anonymous, 10, &ops).unwrap();
        assert_eq!(validated[0].kind(), OperationKind::Convert);
        assert_eq!(validated[1].kind(), OperationKind::Resize);
    }
}
