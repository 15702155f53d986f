use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sizer_agent::{
    AdjustmentStatus, AdjustmentValidator, AgentRuntime, ChatCompletionsClient, InjectionGuard,
    LlmAdjustmentModel,
};
use sizer_chat::cards;
use sizer_core::audit::{AuditContext, InMemoryAuditSink};
use sizer_core::billing::estimate_monthly_cost;
use sizer_core::config::AppConfig;
use sizer_core::errors::ErrorClass;
use sizer_core::flows::{input, FlowEngine};
use sizer_core::{FlowKind, StandardFormulas, UserId};
use sizer_db::repositories::{InMemoryCalculationRepository, InMemoryUserRepository};

use crate::commands::{block_on, exit, load_config, CommandResult};

/// Calculations run from the CLI are attributed to this user id.
const CLI_USER: UserId = UserId(0);

#[derive(Clone, Debug, Default)]
pub struct CalcRequest {
    pub flow: String,
    /// `name=value` pairs, one per parameter.
    pub assignments: Vec<String>,
    pub conditions: Option<String>,
    pub with_model: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct CalcFailure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl CalcFailure {
    fn input(message: impl Into<String>) -> Self {
        Self { error_class: "invalid_input", message: message.into(), exit_code: exit::INPUT }
    }
}

pub fn run(request: CalcRequest) -> CommandResult {
    let config = if request.with_model {
        match load_config("calc") {
            Ok(config) => config,
            Err(failure) => return failure,
        }
    } else {
        AppConfig::default()
    };

    match block_on("calc", calculate(&config, &request)) {
        Ok(Ok(report)) => CommandResult::success("calc", report),
        Ok(Err(failure)) => {
            CommandResult::failure("calc", failure.error_class, failure.message, failure.exit_code)
        }
        Err(failure) => failure,
    }
}

async fn calculate(config: &AppConfig, request: &CalcRequest) -> Result<String, CalcFailure> {
    let flow =
        request.flow.parse::<FlowKind>().map_err(|error| CalcFailure::input(error.to_string()))?;
    let values = parse_assignments(&request.assignments)?;

    let engine = FlowEngine::new(config.sessions.min_conditions_length);
    let schema = engine.schema(flow);
    if let Some(unknown) = values.keys().find(|name| schema.parameter(name).is_none()) {
        return Err(CalcFailure::input(format!("flow {flow} has no parameter `{unknown}`")));
    }

    let (mut session, _) = engine.start(flow).map_err(|error| CalcFailure::input(error.to_string()))?;
    for spec in schema.ordered() {
        let raw = values
            .get(spec.name)
            .ok_or_else(|| CalcFailure::input(format!("missing --set {}=<value>", spec.name)))?;
        let value = input::parse(spec, raw).map_err(|error| CalcFailure::input(error.to_string()))?;
        engine
            .advance(&mut session, spec.name, value)
            .map_err(|error| CalcFailure::input(error.to_string()))?;
    }

    let runtime = build_runtime(config, engine, request.with_model);
    let context = AuditContext::new(None, Some(flow), "cli-calc", "cli");
    let outcome = runtime
        .run(&context, CLI_USER, &session, request.conditions.as_deref())
        .await
        .map_err(|error| {
            let (error_class, exit_code) = match error.class() {
                ErrorClass::UserInput | ErrorClass::Sequence => ("invalid_input", exit::INPUT),
                ErrorClass::SecurityViolation => ("security_violation", exit::INPUT),
                _ => ("calculation", exit::CALCULATION),
            };
            CalcFailure { error_class, message: error.to_string(), exit_code }
        })?;

    let comment = match &outcome.adjustment {
        AdjustmentStatus::Applied { comment } => Some(comment.as_str()),
        AdjustmentStatus::NotRequested | AdjustmentStatus::Degraded(_) => None,
    };
    let result = &outcome.calculation.result;

    let mut lines = vec![cards::result_card(flow, result, comment).text];
    if let AdjustmentStatus::Degraded(reason) = &outcome.adjustment {
        lines.push(format!("(base result kept: {reason})"));
    }
    let estimate =
        estimate_monthly_cost(flow, result, &config.billing.prices, &config.billing.currency);
    lines.push(String::new());
    lines.extend(
        estimate
            .lines
            .iter()
            .map(|line| format!("{}: {} {}", line.label, cards::money(line.amount), estimate.currency)),
    );
    lines.push(format!("Итого в месяц: {} {}", cards::money(estimate.total), estimate.currency));

    Ok(lines.join("\n"))
}

fn parse_assignments(assignments: &[String]) -> Result<BTreeMap<String, String>, CalcFailure> {
    assignments
        .iter()
        .map(|assignment| {
            assignment
                .split_once('=')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| CalcFailure::input(format!("expected NAME=VALUE, got `{assignment}`")))
        })
        .collect()
}

fn build_runtime(config: &AppConfig, engine: FlowEngine, with_model: bool) -> AgentRuntime {
    let runtime = AgentRuntime::new(
        Arc::new(StandardFormulas),
        Arc::new(InMemoryCalculationRepository::default()),
        Arc::new(InMemoryUserRepository::default()),
        Arc::new(InMemoryAuditSink::default()),
    )
    .with_engine(engine)
    .with_guard(InjectionGuard::from_config(&config.guard))
    .with_validator(AdjustmentValidator::new(config.guard.max_adjustment_factor));

    if !with_model {
        return runtime;
    }
    match ChatCompletionsClient::from_config(&config.llm) {
        Ok(client) => runtime.with_model(Arc::new(LlmAdjustmentModel::new(
            Arc::new(client),
            Duration::from_secs(config.llm.timeout_secs),
        ))),
        Err(_) => runtime,
    }
}

#[cfg(test)]
mod tests {
    use sizer_core::config::AppConfig;

    use super::{calculate, exit, parse_assignments, CalcRequest};

    fn kafka(extra: &[&str]) -> CalcRequest {
        let mut assignments: Vec<String> = [
            "messages_per_sec=5000",
            "message_size_kb=2",
            "retention_hours=72",
            "replication_factor=3",
        ]
        .iter()
        .map(|pair| pair.to_string())
        .collect();
        assignments.extend(extra.iter().map(|pair| pair.to_string()));
        CalcRequest { flow: "kafka".to_string(), assignments, ..CalcRequest::default() }
    }

    #[tokio::test]
    async fn complete_parameters_produce_a_card_and_an_estimate() {
        let report = calculate(&AppConfig::default(), &kafka(&[])).await.expect("calculation");

        assert!(report.contains("Результаты расчёта для Kafka"));
        assert!(report.contains("Количество брокеров"));
        assert!(report.contains("Итого в месяц"));
    }

    #[tokio::test]
    async fn conditions_without_a_model_keep_the_base_result() {
        let mut request = kafka(&[]);
        request.conditions = Some("нужна высокая доступность 99.99%".to_string());

        let report = calculate(&AppConfig::default(), &request).await.expect("calculation");
        assert!(report.contains("base result kept"));
    }

    #[tokio::test]
    async fn missing_and_unknown_parameters_are_input_errors() {
        let mut missing = kafka(&[]);
        missing.assignments.pop();
        let failure = calculate(&AppConfig::default(), &missing).await.expect_err("missing");
        assert_eq!(failure.exit_code, exit::INPUT);
        assert!(failure.message.contains("replication_factor"));

        let failure = calculate(&AppConfig::default(), &kafka(&["pods_count=3"]))
            .await
            .expect_err("unknown parameter");
        assert!(failure.message.contains("pods_count"));
    }

    #[tokio::test]
    async fn out_of_range_values_and_unknown_flows_are_rejected() {
        let failure = calculate(&AppConfig::default(), &kafka(&["replication_factor=9"]))
            .await
            .expect_err("out of range");
        assert_eq!(failure.error_class, "invalid_input");

        let request = CalcRequest { flow: "postgres".to_string(), ..CalcRequest::default() };
        let failure = calculate(&AppConfig::default(), &request).await.expect_err("flow");
        assert!(failure.message.contains("postgres"));
    }

    #[test]
    fn assignments_need_a_name_and_an_equals_sign() {
        assert!(parse_assignments(&["brokers".to_string()]).is_err());
        assert!(parse_assignments(&["=3".to_string()]).is_err());
        let parsed = parse_assignments(&[" retention_hours = 24 ".to_string()]).expect("parsed");
        assert_eq!(parsed.get("retention_hours").map(String::as_str), Some("24"));
    }
}
