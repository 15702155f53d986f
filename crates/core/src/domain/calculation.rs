use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::service::FlowKind;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalculationId(pub i64);

impl fmt::Display for CalculationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated answer to one flow parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Choice(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Boolean(_) | Self::Choice(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(true) => f.write_str("да"),
            Self::Boolean(false) => f.write_str("нет"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => f.write_str(&format_number(*value)),
            Self::Choice(value) => f.write_str(value),
        }
    }
}

/// Renders whole floats without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Integer,
    Float,
    Text,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Integer(_) => MetricKind::Integer,
            Self::Float(_) => MetricKind::Float,
            Self::Text(_) => MetricKind::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// JSON integers and floats are distinct kinds: `3` is an integer, `3.0` a float.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Some(Self::Integer(integer))
                } else if number.is_f64() {
                    number.as_f64().map(Self::Float)
                } else {
                    None
                }
            }
            Value::String(text) => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(value) => Value::from(*value),
            Self::Float(value) => Value::from(*value),
            Self::Text(value) => Value::from(value.clone()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => f.write_str(&format_number(*value)),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Named sizing metrics, ordered by metric name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizingResult {
    metrics: BTreeMap<String, MetricValue>,
}

impl SizingResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: MetricValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        self.metrics.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricValue::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.metrics.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> =
            self.metrics.iter().map(|(name, value)| (name.clone(), value.to_json())).collect();
        Value::Object(map)
    }
}

impl FromIterator<(String, MetricValue)> for SizingResult {
    fn from_iter<T: IntoIterator<Item = (String, MetricValue)>>(iter: T) -> Self {
        Self { metrics: iter.into_iter().collect() }
    }
}

pub type ParameterSet = BTreeMap<String, ParamValue>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCalculation {
    pub user_id: UserId,
    pub flow: FlowKind,
    pub input_params: ParameterSet,
    pub result: SizingResult,
    pub ai_adjustments: Option<String>,
    pub additional_conditions: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub id: CalculationId,
    pub user_id: UserId,
    pub flow: FlowKind,
    pub input_params: ParameterSet,
    pub result: SizingResult,
    pub ai_adjustments: Option<String>,
    pub additional_conditions: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CalculationRecord {
    pub fn from_new(id: CalculationId, new: NewCalculation, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            flow: new.flow,
            input_params: new.input_params,
            result: new.result,
            ai_adjustments: new.ai_adjustments,
            additional_conditions: new.additional_conditions,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{format_number, MetricKind, MetricValue, ParamValue, SizingResult};

    #[test]
    fn json_integer_and_float_are_distinct_metric_kinds() {
        assert_eq!(MetricValue::from_json(&json!(3)).map(|v| v.kind()), Some(MetricKind::Integer));
        assert_eq!(MetricValue::from_json(&json!(3.0)).map(|v| v.kind()), Some(MetricKind::Float));
        assert_eq!(
            MetricValue::from_json(&json!("8 vCPU")).map(|v| v.kind()),
            Some(MetricKind::Text)
        );
        assert_eq!(MetricValue::from_json(&json!(null)), None);
        assert_eq!(MetricValue::from_json(&json!([1])), None);
    }

    #[test]
    fn sizing_result_serializes_as_flat_object() {
        let result = SizingResult::new()
            .with("brokers_count", MetricValue::Integer(3))
            .with("throughput_mb_sec", MetricValue::Float(9.77));

        let encoded = serde_json::to_value(&result).expect("serialize");
        assert_eq!(encoded, json!({"brokers_count": 3, "throughput_mb_sec": 9.77}));
        assert_eq!(encoded, result.to_json());

        let decoded: SizingResult = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, result);
    }

    #[test]
    fn param_values_render_for_summaries() {
        assert_eq!(ParamValue::Integer(5000).to_string(), "5000");
        assert_eq!(ParamValue::Float(0.25).to_string(), "0.25");
        assert_eq!(ParamValue::Float(2.0).to_string(), "2");
        assert_eq!(ParamValue::Boolean(true).to_string(), "да");
        assert_eq!(format_number(12.5), "12.5");
    }
}
