use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use sizer_core::domain::calculation::{MetricKind, MetricValue, SizingResult};

pub const DEFAULT_MAX_FACTOR: f64 = 10.0;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AdjustmentRejection {
    #[error("adjusted result is not an object")]
    NotAnObject,
    #[error("key set differs (missing: {missing:?}, unexpected: {unexpected:?})")]
    KeyMismatch { missing: Vec<String>, unexpected: Vec<String> },
    #[error("`{key}` changed kind from {expected:?} to {found}")]
    KindMismatch { key: String, expected: MetricKind, found: String },
    #[error("`{key}` is negative ({value})")]
    Negative { key: String, value: f64 },
    #[error("`{key}` grew by {factor}x or more ({base} -> {candidate})")]
    TooLarge { key: String, base: f64, candidate: f64, factor: f64 },
    #[error("`{key}` shrank by {factor}x or more ({base} -> {candidate})")]
    TooSmall { key: String, base: f64, candidate: f64, factor: f64 },
}

/// Gate for model output: same keys, same kinds, bounded magnitude change.
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentValidator {
    max_factor: f64,
}

impl Default for AdjustmentValidator {
    fn default() -> Self {
        Self { max_factor: DEFAULT_MAX_FACTOR }
    }
}

impl AdjustmentValidator {
    pub fn new(max_factor: f64) -> Self {
        Self { max_factor: if max_factor > 1.0 { max_factor } else { DEFAULT_MAX_FACTOR } }
    }

    pub fn max_factor(&self) -> f64 {
        self.max_factor
    }

    /// Accepts the candidate as a replacement for `base` or rejects it whole.
    pub fn validate(
        &self,
        base: &SizingResult,
        candidate: &Value,
    ) -> Result<SizingResult, AdjustmentRejection> {
        let object = candidate.as_object().ok_or(AdjustmentRejection::NotAnObject)?;

        let base_keys: BTreeSet<&str> = base.keys().collect();
        let candidate_keys: BTreeSet<&str> = object.keys().map(String::as_str).collect();
        if base_keys != candidate_keys {
            return Err(AdjustmentRejection::KeyMismatch {
                missing: base_keys.difference(&candidate_keys).map(|key| (*key).to_owned()).collect(),
                unexpected: candidate_keys
                    .difference(&base_keys)
                    .map(|key| (*key).to_owned())
                    .collect(),
            });
        }

        let mut accepted = SizingResult::new();
        for (key, base_value) in base.iter() {
            let raw = &object[key];
            let value = MetricValue::from_json(raw)
                .filter(|value| value.kind() == base_value.kind())
                .ok_or_else(|| AdjustmentRejection::KindMismatch {
                    key: key.to_owned(),
                    expected: base_value.kind(),
                    found: describe_json(raw),
                })?;

            if let (Some(base_number), Some(number)) = (base_value.as_f64(), value.as_f64()) {
                self.check_magnitude(key, base_number, number)?;
            }
            accepted.insert(key, value);
        }

        Ok(accepted)
    }

    fn check_magnitude(&self, key: &str, base: f64, candidate: f64) -> Result<(), AdjustmentRejection> {
        if candidate < 0.0 {
            return Err(AdjustmentRejection::Negative { key: key.to_owned(), value: candidate });
        }
        if base > 0.0 && candidate >= base * self.max_factor {
            return Err(AdjustmentRejection::TooLarge {
                key: key.to_owned(),
                base,
                candidate,
                factor: self.max_factor,
            });
        }
        if candidate > 0.0 && base >= candidate * self.max_factor {
            return Err(AdjustmentRejection::TooSmall {
                key: key.to_owned(),
                base,
                candidate,
                factor: self.max_factor,
            });
        }
        Ok(())
    }
}

fn describe_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(_) => "boolean".to_owned(),
        Value::Number(number) if number.is_f64() => "Float".to_owned(),
        Value::Number(_) => "Integer".to_owned(),
        Value::String(_) => "Text".to_owned(),
        Value::Array(_) => "array".to_owned(),
        Value::Object(_) => "object".to_owned(),
    }
}
