use thiserror::Error;

use crate::domain::calculation::{format_number, ParamValue};
use crate::flows::schema::{CustomParser, ParameterSpec, ValueKind};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("`{parameter}` expects {expected}")]
    TypeMismatch { parameter: String, expected: ValueKind },
    #[error("`{parameter}` must be within {min}..={max}")]
    OutOfRange { parameter: String, min: f64, max: f64 },
    #[error("`{parameter}`: {message}")]
    Custom { parameter: String, message: String },
}

impl ValidationError {
    pub fn parameter(&self) -> &str {
        match self {
            Self::TypeMismatch { parameter, .. }
            | Self::OutOfRange { parameter, .. }
            | Self::Custom { parameter, .. } => parameter,
        }
    }

    /// Text shown to the user above the retry keyboard.
    pub fn hint(&self) -> String {
        match self {
            Self::TypeMismatch { expected: ValueKind::Integer, .. } => {
                "Введите целое число.".to_owned()
            }
            Self::TypeMismatch { expected: ValueKind::Float, .. } => {
                "Введите число, например 2.5".to_owned()
            }
            Self::TypeMismatch { expected: ValueKind::Boolean, .. } => {
                "Ответьте «да» или «нет».".to_owned()
            }
            Self::TypeMismatch { expected: ValueKind::Enum, .. } => {
                "Выберите один из предложенных вариантов.".to_owned()
            }
            Self::OutOfRange { min, max, .. } => format!(
                "Значение должно быть от {} до {}.",
                format_number(*min),
                format_number(*max)
            ),
            Self::Custom { message, .. } => message.clone(),
        }
    }
}

/// Turns raw text (typed or a quick-pick value) into a typed parameter value.
pub fn parse(spec: &ParameterSpec, raw: &str) -> Result<ParamValue, ValidationError> {
    if let Some(parser) = spec.custom_parser {
        return parser.parse(spec.name, raw);
    }

    let value = coerce(spec, raw.trim())?;
    if let (Some(bounds), Some(number)) = (spec.bounds, value.as_f64()) {
        if !bounds.contains(number) {
            return Err(ValidationError::OutOfRange {
                parameter: spec.name.to_owned(),
                min: bounds.min,
                max: bounds.max,
            });
        }
    }
    Ok(value)
}

fn coerce(spec: &ParameterSpec, raw: &str) -> Result<ParamValue, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        parameter: spec.name.to_owned(),
        expected: spec.value_kind,
    };

    match spec.value_kind {
        ValueKind::Integer => raw.parse::<i64>().map(ParamValue::Integer).map_err(|_| mismatch()),
        ValueKind::Float => raw
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(ParamValue::Float)
            .ok_or_else(mismatch),
        ValueKind::Boolean => match raw.to_lowercase().as_str() {
            "true" => Ok(ParamValue::Boolean(true)),
            "false" => Ok(ParamValue::Boolean(false)),
            _ => Err(mismatch()),
        },
        ValueKind::Enum => spec
            .choices
            .iter()
            .find(|choice| choice.raw.eq_ignore_ascii_case(raw))
            .map(|choice| ParamValue::Choice(choice.raw.to_owned()))
            .ok_or_else(mismatch),
    }
}

impl CustomParser {
    pub fn parse(self, parameter: &str, raw: &str) -> Result<ParamValue, ValidationError> {
        match self {
            Self::YesNo => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "да" | "д" | "1" | "+" => Ok(ParamValue::Boolean(true)),
                "false" | "no" | "n" | "нет" | "н" | "0" | "-" => Ok(ParamValue::Boolean(false)),
                _ => Err(ValidationError::Custom {
                    parameter: parameter.to_owned(),
                    message: "Ответьте «да» или «нет».".to_owned(),
                }),
            },
        }
    }
}
