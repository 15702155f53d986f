use sizer_core::flows::schema_for;
use sizer_core::FlowKind;

pub const CALCULATION_HISTORY_LABEL: &str = "📊 История расчётов";
pub const PAYMENT_HISTORY_LABEL: &str = "💰 История платежей";
pub const HELP_LABEL: &str = "ℹ️ Помощь";
pub const CANCEL_LABEL: &str = "❌ Отмена";

/// Text input that is a command rather than an answer to the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuCommand {
    Start,
    Help,
    Menu,
    Cancel,
    StartFlow(FlowKind),
    CalculationHistory,
    PaymentHistory,
}

/// Recognises slash commands, main-menu labels and plain service names.
/// Anything else is left to the active session.
pub fn parse_command(text: &str) -> Option<MenuCommand> {
    let text = text.trim();
    if let Some(command) = text.strip_prefix('/') {
        let name = command.split_whitespace().next().unwrap_or_default();
        let name = name.split('@').next().unwrap_or_default().to_ascii_lowercase();
        return match name.as_str() {
            "start" => Some(MenuCommand::Start),
            "help" => Some(MenuCommand::Help),
            "menu" => Some(MenuCommand::Menu),
            "cancel" => Some(MenuCommand::Cancel),
            other => flow_alias(other).map(MenuCommand::StartFlow),
        };
    }

    match text {
        CALCULATION_HISTORY_LABEL => return Some(MenuCommand::CalculationHistory),
        PAYMENT_HISTORY_LABEL => return Some(MenuCommand::PaymentHistory),
        HELP_LABEL => return Some(MenuCommand::Help),
        CANCEL_LABEL => return Some(MenuCommand::Cancel),
        _ => {}
    }

    if let Some(flow) = FlowKind::ALL.into_iter().find(|flow| schema_for(*flow).title == text) {
        return Some(MenuCommand::StartFlow(flow));
    }
    flow_alias(&text.to_lowercase()).map(MenuCommand::StartFlow)
}

fn flow_alias(word: &str) -> Option<FlowKind> {
    match word {
        "кафка" => Some(FlowKind::Kafka),
        "кубер" | "кубернетес" => Some(FlowKind::Kubernetes),
        "редис" => Some(FlowKind::Redis),
        "раббит" => Some(FlowKind::RabbitMq),
        other => other.parse().ok(),
    }
}
