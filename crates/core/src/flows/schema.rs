use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::domain::calculation::ParamValue;
use crate::domain::service::FlowKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    Enum,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Integer => "an integer",
            Self::Float => "a number",
            Self::Boolean => "a yes/no answer",
            Self::Enum => "one of the listed options",
        };
        f.write_str(label)
    }
}

/// Inclusive numeric bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A quick-pick button: the raw value fed to the validator and the label shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Choice {
    pub raw: &'static str,
    pub label: &'static str,
}

const fn choice(raw: &'static str, label: &'static str) -> Choice {
    Choice { raw, label }
}

/// Parsers for values that are not plain numbers. Output is trusted as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CustomParser {
    YesNo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub order: u16,
    pub value_kind: ValueKind,
    pub bounds: Option<Bounds>,
    pub choices: &'static [Choice],
    pub prompt_text: &'static str,
    /// Summary line; `{value}` is replaced with the collected value.
    pub display_template: &'static str,
    pub custom_parser: Option<CustomParser>,
}

impl ParameterSpec {
    pub fn render(&self, value: &ParamValue) -> String {
        self.display_template.replace("{value}", &value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlowSchema {
    pub kind: FlowKind,
    pub title: &'static str,
    pub parameters: &'static [ParameterSpec],
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("flow {0} declares no parameters")]
    Empty(FlowKind),
    #[error("flow {flow} declares parameter `{name}` more than once")]
    DuplicateName { flow: FlowKind, name: &'static str },
    #[error("flow {flow} reuses order {order}")]
    DuplicateOrder { flow: FlowKind, order: u16 },
}

impl FlowSchema {
    /// Parameters sorted by ascending `order`.
    pub fn ordered(&self) -> Vec<&ParameterSpec> {
        let mut parameters: Vec<&ParameterSpec> = self.parameters.iter().collect();
        parameters.sort_by_key(|parameter| parameter.order);
        parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    pub fn first(&self) -> Option<&ParameterSpec> {
        self.parameters.iter().min_by_key(|parameter| parameter.order)
    }

    pub fn last(&self) -> Option<&ParameterSpec> {
        self.parameters.iter().max_by_key(|parameter| parameter.order)
    }

    pub fn next_after(&self, name: &str) -> Option<&ParameterSpec> {
        let current = self.parameter(name)?.order;
        self.parameters
            .iter()
            .filter(|parameter| parameter.order > current)
            .min_by_key(|parameter| parameter.order)
    }

    pub fn previous_before(&self, name: &str) -> Option<&ParameterSpec> {
        let current = self.parameter(name)?.order;
        self.parameters
            .iter()
            .filter(|parameter| parameter.order < current)
            .max_by_key(|parameter| parameter.order)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.parameters.is_empty() {
            return Err(SchemaError::Empty(self.kind));
        }

        let mut names = BTreeSet::new();
        let mut orders = BTreeSet::new();
        for parameter in self.parameters {
            if !names.insert(parameter.name) {
                return Err(SchemaError::DuplicateName { flow: self.kind, name: parameter.name });
            }
            if !orders.insert(parameter.order) {
                return Err(SchemaError::DuplicateOrder { flow: self.kind, order: parameter.order });
            }
        }
        Ok(())
    }
}

pub fn schema_for(kind: FlowKind) -> &'static FlowSchema {
    match kind {
        FlowKind::Kafka => &KAFKA,
        FlowKind::Kubernetes => &KUBERNETES,
        FlowKind::Redis => &REDIS,
        FlowKind::RabbitMq => &RABBITMQ,
    }
}

const YES_NO: &[Choice] = &[choice("true", "✅ Да"), choice("false", "❌ Нет")];

static KAFKA: FlowSchema = FlowSchema {
    kind: FlowKind::Kafka,
    title: "☕ Kafka",
    parameters: &[
        ParameterSpec {
            name: "messages_per_sec",
            order: 1,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 10_000_000.0)),
            choices: &[
                choice("1000", "1 000"),
                choice("5000", "5 000"),
                choice("10000", "10 000"),
                choice("50000", "50 000"),
                choice("100000", "100 000"),
                choice("500000", "500 000"),
            ],
            prompt_text: "📨 Сколько сообщений в секунду должен принимать кластер?",
            display_template: "📨 Сообщений в секунду: {value}",
            custom_parser: None,
        },
        ParameterSpec {
            name: "message_size_kb",
            order: 2,
            value_kind: ValueKind::Float,
            bounds: Some(Bounds::new(0.1, 10_240.0)),
            choices: &[
                choice("1", "1 KB"),
                choice("2", "2 KB"),
                choice("5", "5 KB"),
                choice("10", "10 KB"),
                choice("50", "50 KB"),
                choice("100", "100 KB"),
            ],
            prompt_text: "📦 Средний размер сообщения в KB?",
            display_template: "📦 Размер сообщения: {value} KB",
            custom_parser: None,
        },
        ParameterSpec {
            name: "retention_hours",
            order: 3,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 8_760.0)),
            choices: &[
                choice("24", "1 день"),
                choice("72", "3 дня"),
                choice("168", "7 дней"),
                choice("336", "14 дней"),
                choice("720", "30 дней"),
                choice("2160", "90 дней"),
            ],
            prompt_text: "🕒 Сколько часов хранить сообщения (retention)?",
            display_template: "🕒 Хранение: {value} ч",
            custom_parser: None,
        },
        ParameterSpec {
            name: "replication_factor",
            order: 4,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 5.0)),
            choices: &[
                choice("1", "1"),
                choice("2", "2"),
                choice("3", "3 (рекомендуется)"),
                choice("5", "5"),
            ],
            prompt_text: "🔁 Фактор репликации?",
            display_template: "🔁 Фактор репликации: {value}",
            custom_parser: None,
        },
    ],
};

static KUBERNETES: FlowSchema = FlowSchema {
    kind: FlowKind::Kubernetes,
    title: "⎈ Kubernetes",
    parameters: &[
        ParameterSpec {
            name: "pods_count",
            order: 1,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 100_000.0)),
            choices: &[
                choice("10", "10"),
                choice("50", "50"),
                choice("100", "100"),
                choice("200", "200"),
                choice("500", "500"),
                choice("1000", "1 000"),
            ],
            prompt_text: "🧩 Сколько подов планируется запускать?",
            display_template: "🧩 Подов: {value}",
            custom_parser: None,
        },
        ParameterSpec {
            name: "avg_cpu_per_pod",
            order: 2,
            value_kind: ValueKind::Float,
            bounds: Some(Bounds::new(0.05, 64.0)),
            choices: &[
                choice("0.1", "0.1 vCPU"),
                choice("0.25", "0.25 vCPU"),
                choice("0.5", "0.5 vCPU"),
                choice("1", "1 vCPU"),
                choice("2", "2 vCPU"),
                choice("4", "4 vCPU"),
            ],
            prompt_text: "⚙️ Сколько vCPU в среднем нужно одному поду?",
            display_template: "⚙️ CPU на под: {value} vCPU",
            custom_parser: None,
        },
        ParameterSpec {
            name: "avg_ram_per_pod_gb",
            order: 3,
            value_kind: ValueKind::Float,
            bounds: Some(Bounds::new(0.0625, 512.0)),
            choices: &[
                choice("0.25", "256 MB"),
                choice("0.5", "512 MB"),
                choice("1", "1 GB"),
                choice("2", "2 GB"),
                choice("4", "4 GB"),
                choice("8", "8 GB"),
            ],
            prompt_text: "🧠 Сколько RAM (GB) в среднем нужно одному поду?",
            display_template: "🧠 RAM на под: {value} GB",
            custom_parser: None,
        },
        ParameterSpec {
            name: "high_availability",
            order: 4,
            value_kind: ValueKind::Boolean,
            bounds: None,
            choices: YES_NO,
            prompt_text: "🛡 Нужна ли высокая доступность (HA)?",
            display_template: "🛡 Высокая доступность: {value}",
            custom_parser: Some(CustomParser::YesNo),
        },
    ],
};

static REDIS: FlowSchema = FlowSchema {
    kind: FlowKind::Redis,
    title: "🗄️ Redis",
    parameters: &[
        ParameterSpec {
            name: "dataset_size_gb",
            order: 1,
            value_kind: ValueKind::Float,
            bounds: Some(Bounds::new(0.1, 10_000.0)),
            choices: &[
                choice("1", "1 GB"),
                choice("5", "5 GB"),
                choice("10", "10 GB"),
                choice("50", "50 GB"),
                choice("100", "100 GB"),
                choice("500", "500 GB"),
            ],
            prompt_text: "💾 Каков объём данных в GB?",
            display_template: "💾 Объём данных: {value} GB",
            custom_parser: None,
        },
        ParameterSpec {
            name: "operations_per_sec",
            order: 2,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 10_000_000.0)),
            choices: &[
                choice("1000", "1 000"),
                choice("10000", "10 000"),
                choice("50000", "50 000"),
                choice("100000", "100 000"),
                choice("500000", "500 000"),
                choice("1000000", "1 000 000"),
            ],
            prompt_text: "⚡ Сколько операций в секунду ожидается?",
            display_template: "⚡ Операций в секунду: {value}",
            custom_parser: None,
        },
        ParameterSpec {
            name: "high_availability",
            order: 3,
            value_kind: ValueKind::Boolean,
            bounds: None,
            choices: YES_NO,
            prompt_text: "🛡 Нужна ли высокая доступность (реплики)?",
            display_template: "🛡 Высокая доступность: {value}",
            custom_parser: Some(CustomParser::YesNo),
        },
        ParameterSpec {
            name: "persistence",
            order: 4,
            value_kind: ValueKind::Boolean,
            bounds: None,
            choices: YES_NO,
            prompt_text: "💽 Нужна ли персистентность (RDB/AOF)?",
            display_template: "💽 Персистентность: {value}",
            custom_parser: Some(CustomParser::YesNo),
        },
    ],
};

static RABBITMQ: FlowSchema = FlowSchema {
    kind: FlowKind::RabbitMq,
    title: "🐰 RabbitMQ",
    parameters: &[
        ParameterSpec {
            name: "messages_per_sec",
            order: 1,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(1.0, 1_000_000.0)),
            choices: &[
                choice("100", "100"),
                choice("1000", "1 000"),
                choice("5000", "5 000"),
                choice("10000", "10 000"),
                choice("50000", "50 000"),
                choice("100000", "100 000"),
            ],
            prompt_text: "📨 Сколько сообщений в секунду должен обрабатывать брокер?",
            display_template: "📨 Сообщений в секунду: {value}",
            custom_parser: None,
        },
        ParameterSpec {
            name: "message_size_kb",
            order: 2,
            value_kind: ValueKind::Float,
            bounds: Some(Bounds::new(0.1, 10_240.0)),
            choices: &[
                choice("1", "1 KB"),
                choice("5", "5 KB"),
                choice("10", "10 KB"),
                choice("50", "50 KB"),
                choice("100", "100 KB"),
                choice("512", "512 KB"),
            ],
            prompt_text: "📦 Средний размер сообщения в KB?",
            display_template: "📦 Размер сообщения: {value} KB",
            custom_parser: None,
        },
        ParameterSpec {
            name: "queue_depth",
            order: 3,
            value_kind: ValueKind::Integer,
            bounds: Some(Bounds::new(0.0, 100_000_000.0)),
            choices: &[
                choice("1000", "1 000"),
                choice("10000", "10 000"),
                choice("100000", "100 000"),
                choice("1000000", "1 000 000"),
            ],
            prompt_text: "📚 Сколько сообщений в среднем лежит в очередях?",
            display_template: "📚 Глубина очередей: {value}",
            custom_parser: None,
        },
        ParameterSpec {
            name: "high_availability",
            order: 4,
            value_kind: ValueKind::Boolean,
            bounds: None,
            choices: YES_NO,
            prompt_text: "🛡 Нужен ли кластер с высокой доступностью?",
            display_template: "🛡 Высокая доступность: {value}",
            custom_parser: Some(CustomParser::YesNo),
        },
    ],
};
