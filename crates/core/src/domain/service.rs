use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four sizing flows. Each kind maps onto one static parameter schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Kafka,
    Kubernetes,
    Redis,
    #[serde(rename = "rabbitmq")]
    RabbitMq,
}

impl FlowKind {
    pub const ALL: [FlowKind; 4] =
        [FlowKind::Kafka, FlowKind::Kubernetes, FlowKind::Redis, FlowKind::RabbitMq];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Kubernetes => "kubernetes",
            Self::Redis => "redis",
            Self::RabbitMq => "rabbitmq",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Kafka => "Kafka",
            Self::Kubernetes => "Kubernetes",
            Self::Redis => "Redis",
            Self::RabbitMq => "RabbitMQ",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown flow `{0}` (expected kafka|kubernetes|redis|rabbitmq)")]
pub struct UnknownFlow(pub String);

impl FromStr for FlowKind {
    type Err = UnknownFlow;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "redis" => Ok(Self::Redis),
            "rabbitmq" | "rabbit" => Ok(Self::RabbitMq),
            other => Err(UnknownFlow(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FlowKind;

    #[test]
    fn flow_ids_round_trip_through_their_string_form() {
        for kind in FlowKind::ALL {
            assert_eq!(kind.as_str().parse::<FlowKind>(), Ok(kind));
        }
        assert_eq!("K8S".parse::<FlowKind>(), Ok(FlowKind::Kubernetes));
        assert!("postgres".parse::<FlowKind>().is_err());
    }
}
