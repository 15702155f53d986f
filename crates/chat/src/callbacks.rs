use std::fmt;
use std::str::FromStr;

use sizer_core::domain::calculation::CalculationId;
use thiserror::Error;

/// Bot API limit for `callback_data`.
pub const MAX_CALLBACK_BYTES: usize = 64;

/// Typed inline-button payloads. The cursor never travels inside them; the session does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// `range:<param>:<value>`
    Pick { parameter: String, raw: String },
    /// `custom:<param>`
    Custom { parameter: String },
    /// `back:<param>`, where `<param>` is the stage the button was rendered for.
    Back { from: String },
    /// `retry:<param>`
    Retry { parameter: String },
    /// `conditions:skip`
    SkipConditions,
    /// `conditions:custom`
    CustomConditions,
    /// `pay:<calculation_id>`
    Pay { calculation_id: CalculationId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("empty callback data")]
    Empty,
    #[error("unknown callback action `{0}`")]
    UnknownAction(String),
    #[error("callback `{0}` is missing its argument")]
    MissingArgument(String),
    #[error("invalid calculation id `{0}`")]
    InvalidCalculationId(String),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            Self::Pick { parameter, raw } => format!("range:{parameter}:{raw}"),
            Self::Custom { parameter } => format!("custom:{parameter}"),
            Self::Back { from } => format!("back:{from}"),
            Self::Retry { parameter } => format!("retry:{parameter}"),
            Self::SkipConditions => "conditions:skip".to_owned(),
            Self::CustomConditions => "conditions:custom".to_owned(),
            Self::Pay { calculation_id } => format!("pay:{calculation_id}"),
        }
    }

    pub fn parse(data: &str) -> Result<Self, CallbackError> {
        let data = data.trim();
        if data.is_empty() {
            return Err(CallbackError::Empty);
        }
        let (verb, rest) = data.split_once(':').unwrap_or((data, ""));
        let argument = |name: &str| -> Result<String, CallbackError> {
            if rest.is_empty() {
                Err(CallbackError::MissingArgument(name.to_owned()))
            } else {
                Ok(rest.to_owned())
            }
        };

        match verb {
            "range" => match rest.split_once(':') {
                Some((parameter, raw)) if !parameter.is_empty() && !raw.is_empty() => {
                    Ok(Self::Pick { parameter: parameter.to_owned(), raw: raw.to_owned() })
                }
                _ => Err(CallbackError::MissingArgument(verb.to_owned())),
            },
            "custom" => Ok(Self::Custom { parameter: argument(verb)? }),
            "back" => Ok(Self::Back { from: argument(verb)? }),
            "retry" => Ok(Self::Retry { parameter: argument(verb)? }),
            "conditions" => match rest {
                "skip" => Ok(Self::SkipConditions),
                "custom" => Ok(Self::CustomConditions),
                "" => Err(CallbackError::MissingArgument(verb.to_owned())),
                other => Err(CallbackError::UnknownAction(format!("conditions:{other}"))),
            },
            "pay" => {
                let raw = argument(verb)?;
                raw.parse::<i64>()
                    .map(|id| Self::Pay { calculation_id: CalculationId(id) })
                    .map_err(|_| CallbackError::InvalidCalculationId(raw))
            }
            other => Err(CallbackError::UnknownAction(other.to_owned())),
        }
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CallbackAction {
    type Err = CallbackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use sizer_core::domain::calculation::CalculationId;
    use sizer_core::flows::{schema_for, CONDITIONS_STAGE};
    use sizer_core::FlowKind;

    use super::{CallbackAction, CallbackError, MAX_CALLBACK_BYTES};

    #[test]
    fn parses_every_action_shape() {
        assert_eq!(
            CallbackAction::parse("range:messages_per_sec:5000"),
            Ok(CallbackAction::Pick {
                parameter: "messages_per_sec".to_owned(),
                raw: "5000".to_owned()
            })
        );
        assert_eq!(
            CallbackAction::parse("back:additional_conditions"),
            Ok(CallbackAction::Back { from: CONDITIONS_STAGE.to_owned() })
        );
        assert_eq!(CallbackAction::parse("conditions:skip"), Ok(CallbackAction::SkipConditions));
        assert_eq!(
            CallbackAction::parse("pay:42"),
            Ok(CallbackAction::Pay { calculation_id: CalculationId(42) })
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(CallbackAction::parse(""), Err(CallbackError::Empty));
        assert_eq!(
            CallbackAction::parse("range:messages_per_sec"),
            Err(CallbackError::MissingArgument("range".to_owned()))
        );
        assert_eq!(
            CallbackAction::parse("pay:abc"),
            Err(CallbackError::InvalidCalculationId("abc".to_owned()))
        );
        assert_eq!(
            CallbackAction::parse("skip_conditions"),
            Err(CallbackError::UnknownAction("skip_conditions".to_owned()))
        );
        assert!(CallbackAction::parse("conditions:later").is_err());
    }

    #[test]
    fn every_catalog_quick_pick_fits_the_callback_limit() {
        for flow in FlowKind::ALL {
            for parameter in schema_for(flow).parameters {
                for choice in parameter.choices {
                    let action = CallbackAction::Pick {
                        parameter: parameter.name.to_owned(),
                        raw: choice.raw.to_owned(),
                    };
                    let encoded = action.encode();
                    assert!(encoded.len() <= MAX_CALLBACK_BYTES, "{encoded} too long");
                    assert_eq!(encoded.parse::<CallbackAction>(), Ok(action));
                }
            }
        }
    }
}
