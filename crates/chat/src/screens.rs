use sizer_core::domain::calculation::format_number;
use sizer_core::flows::{schema_for, CustomParser, ParameterSpec, Screen, ValidationError};
use sizer_core::FlowKind;

use crate::blocks::{MessageBuilder, MessageTemplate};
use crate::callbacks::CallbackAction;
use crate::commands::{CALCULATION_HISTORY_LABEL, HELP_LABEL, PAYMENT_HISTORY_LABEL};
use crate::locale::{self, Language, Phrase};

pub const CUSTOM_VALUE_LABEL: &str = "✏️ Ввести своё значение";
pub const BACK_LABEL: &str = "◀️ Назад";
pub const RETRY_LABEL: &str = "↩️ Вернуться к выбору";
pub const SKIP_CONDITIONS_LABEL: &str = "⏭️ Пропустить";
pub const CUSTOM_CONDITIONS_LABEL: &str = "✏️ Ввести условия";
pub const CONDITIONS_BACK_LABEL: &str = "↩️ Назад";

const SUMMARY_PREFIX: &str = "✅ Установлено: ";
const QUICK_PICKS_PER_ROW: usize = 2;

const DOC_LINKS: [(&str, &str); 4] = [
    ("📖 Документация Kafka", "https://kafka.apache.org/documentation/"),
    ("📖 Документация Kubernetes", "https://kubernetes.io/docs/"),
    ("📖 Документация Redis", "https://redis.io/documentation"),
    ("📖 Документация RabbitMQ", "https://www.rabbitmq.com/documentation.html"),
];

/// Renders the screen the engine asked for.
pub fn render_screen(screen: &Screen, min_conditions_length: usize, language: Language) -> MessageTemplate {
    match screen {
        Screen::Parameter { flow, parameter, summary } => parameter_screen(*flow, parameter, summary),
        Screen::Conditions { flow, summary } => {
            conditions_screen(*flow, summary, min_conditions_length, language)
        }
    }
}

fn header(flow: FlowKind, summary: &[String]) -> MessageBuilder {
    let builder = MessageBuilder::new(format!("{} Расчёт кластера", schema_for(flow).title));
    if summary.is_empty() {
        return builder.blank();
    }
    builder
        .blank()
        .lines(summary.iter().map(|line| format!("{SUMMARY_PREFIX}{line}")))
        .blank()
}

fn parameter_screen(flow: FlowKind, parameter: &ParameterSpec, summary: &[String]) -> MessageTemplate {
    let mut builder = header(flow, summary).line(parameter.prompt_text);
    for pair in parameter.choices.chunks(QUICK_PICKS_PER_ROW) {
        builder = builder.inline_row(|row| {
            for choice in pair {
                row.action(
                    choice.label,
                    &CallbackAction::Pick {
                        parameter: parameter.name.to_owned(),
                        raw: choice.raw.to_owned(),
                    },
                );
            }
        });
    }
    builder
        .inline_row(|row| {
            row.action(
                CUSTOM_VALUE_LABEL,
                &CallbackAction::Custom { parameter: parameter.name.to_owned() },
            );
        })
        .inline_row(|row| {
            row.action(BACK_LABEL, &CallbackAction::Back { from: parameter.name.to_owned() });
        })
        .build()
}

fn conditions_keyboard(builder: MessageBuilder) -> MessageBuilder {
    builder
        .inline_row(|row| {
            row.action(SKIP_CONDITIONS_LABEL, &CallbackAction::SkipConditions);
        })
        .inline_row(|row| {
            row.action(CUSTOM_CONDITIONS_LABEL, &CallbackAction::CustomConditions);
        })
        .inline_row(|row| {
            row.action(
                CONDITIONS_BACK_LABEL,
                &CallbackAction::Back { from: sizer_core::flows::CONDITIONS_STAGE.to_owned() },
            );
        })
}

fn conditions_screen(
    flow: FlowKind,
    summary: &[String],
    min_conditions_length: usize,
    language: Language,
) -> MessageTemplate {
    let prompt = locale::with_min(language, Phrase::ConditionsPrompt, min_conditions_length);
    conditions_keyboard(header(flow, summary).line(prompt)).build()
}

/// Free-text entry for a parameter that also has quick picks.
pub fn custom_value_prompt(parameter: &ParameterSpec) -> MessageTemplate {
    let hint = match (parameter.custom_parser, parameter.bounds) {
        (Some(CustomParser::YesNo), _) => "Введите «да» или «нет»:".to_owned(),
        (None, Some(bounds)) => format!(
            "Введите значение от {} до {}:",
            format_number(bounds.min),
            format_number(bounds.max)
        ),
        (None, None) => "Введите значение:".to_owned(),
    };
    MessageBuilder::new(format!("✏️ {}", parameter.prompt_text))
        .blank()
        .line(hint)
        .inline_row(|row| {
            row.action(RETRY_LABEL, &CallbackAction::Retry { parameter: parameter.name.to_owned() });
        })
        .build()
}

pub fn custom_conditions_prompt(min_conditions_length: usize, language: Language) -> MessageTemplate {
    MessageBuilder::new(format!(
        "✏️ {}",
        locale::with_min(language, Phrase::ConditionsPrompt, min_conditions_length)
    ))
    .inline_row(|row| {
        row.action(
            CONDITIONS_BACK_LABEL,
            &CallbackAction::Back { from: sizer_core::flows::CONDITIONS_STAGE.to_owned() },
        );
    })
    .build()
}

pub fn validation_error(error: &ValidationError) -> MessageTemplate {
    MessageBuilder::new(format!("❌ {}", error.hint()))
        .inline_row(|row| {
            row.action(
                RETRY_LABEL,
                &CallbackAction::Retry { parameter: error.parameter().to_owned() },
            );
        })
        .build()
}

pub fn conditions_too_short(min_conditions_length: usize, language: Language) -> MessageTemplate {
    conditions_keyboard(MessageBuilder::new(locale::with_min(
        language,
        Phrase::ConditionsTooShort,
        min_conditions_length,
    )))
    .build()
}

/// Persistent reply keyboard with the four flows and the history screens.
pub fn main_menu(text: impl Into<String>) -> MessageTemplate {
    let titles = FlowKind::ALL.map(|flow| schema_for(flow).title);
    MessageBuilder::new(text)
        .reply_row(|row| {
            row.button(titles[0]).button(titles[1]);
        })
        .reply_row(|row| {
            row.button(titles[2]).button(titles[3]);
        })
        .reply_row(|row| {
            row.button(CALCULATION_HISTORY_LABEL).button(PAYMENT_HISTORY_LABEL);
        })
        .reply_row(|row| {
            row.button(HELP_LABEL);
        })
        .build()
}

pub fn greeting(language: Language) -> MessageTemplate {
    main_menu(format!(
        "{}\n\nВыберите сервис из меню ниже для расчёта необходимых ресурсов.",
        locale::text(language, Phrase::Greeting)
    ))
}

pub fn menu() -> MessageTemplate {
    main_menu("Главное меню. Выберите сервис:")
}

pub fn cancelled() -> MessageTemplate {
    main_menu("Операция отменена.")
}

pub fn unknown_command() -> MessageTemplate {
    main_menu("Неизвестная команда. Используйте меню для выбора действия.")
}

pub fn help() -> MessageTemplate {
    let services = FlowKind::ALL.map(|flow| {
        let scope = match flow {
            FlowKind::Kafka => "расчёт брокеров и хранилища",
            FlowKind::Kubernetes => "расчёт нод и ресурсов",
            FlowKind::Redis => "расчёт памяти и инстансов",
            FlowKind::RabbitMq => "расчёт нод и очередей",
        };
        format!("{} - {scope}", schema_for(flow).title)
    });

    let mut builder = MessageBuilder::new("🤖 Бот помощник по сайзингу инфраструктурных сервисов")
        .blank()
        .line("Доступные команды:")
        .line("/start - Запуск бота")
        .line("/help - Справка")
        .line("/menu - Главное меню")
        .line("/cancel - Отменить расчёт")
        .blank()
        .line("Доступные расчёты:")
        .lines(services)
        .blank()
        .line(
            "🤖 AI-корректировка: В конце расчёта вы можете указать дополнительные условия, \
             и ИИ скорректирует результаты с учётом ваших требований.",
        )
        .blank()
        .line("Просто выберите нужный сервис из меню!");
    for (label, url) in DOC_LINKS {
        builder = builder.inline_row(|row| {
            row.link(label, url);
        });
    }
    builder.build()
}

pub fn blocked() -> MessageTemplate {
    MessageBuilder::new("⛔ Ваш аккаунт заблокирован за попытку prompt injection.")
        .remove_keyboard()
        .build()
}

pub fn injection_detected(language: Language) -> MessageTemplate {
    MessageBuilder::new(locale::text(language, Phrase::InjectionDetected)).remove_keyboard().build()
}

pub fn notice(language: Language, phrase: Phrase) -> MessageTemplate {
    MessageTemplate::plain(locale::text(language, phrase))
}

#[cfg(test)]
mod tests {
    use sizer_core::domain::calculation::ParamValue;
    use sizer_core::flows::{FlowEngine, ValidationError, ValueKind};
    use sizer_core::FlowKind;

    use super::{
        custom_value_prompt, help, main_menu, render_screen, validation_error, BACK_LABEL,
        CUSTOM_VALUE_LABEL,
    };
    use crate::locale::Language;

    #[test]
    fn first_parameter_screen_has_quick_picks_in_pairs_then_custom_and_back() {
        let engine = FlowEngine::default();
        let (_, screen) = engine.start(FlowKind::Kafka).expect("start");
        let message = render_screen(&screen, 10, Language::Ru);

        assert!(message.text.starts_with("☕ Kafka Расчёт кластера"));
        assert!(message.text.contains("Сколько сообщений в секунду"));
        let rows = message.inline_rows();
        assert_eq!(rows.len(), 5, "six picks in three rows, custom, back");
        assert!(rows[..3].iter().all(|row| row.len() == 2));
        assert_eq!(rows[3][0].text, CUSTOM_VALUE_LABEL);
        assert_eq!(rows[4][0].text, BACK_LABEL);
        assert_eq!(message.callbacks()[0], "range:messages_per_sec:1000");
        assert_eq!(message.callbacks()[7], "back:messages_per_sec");
    }

    #[test]
    fn later_screens_list_collected_values() {
        let engine = FlowEngine::default();
        let (mut session, _) = engine.start(FlowKind::Kafka).expect("start");
        let screen = engine
            .advance(&mut session, "messages_per_sec", ParamValue::Integer(5000))
            .expect("advance");

        let message = render_screen(&screen, 10, Language::Ru);
        assert!(message.text.contains("✅ Установлено: 📨 Сообщений в секунду: 5000"));
    }

    #[test]
    fn conditions_screen_offers_skip_custom_and_back() {
        let engine = FlowEngine::default();
        let (mut session, _) = engine.start(FlowKind::Kubernetes).expect("start");
        for (name, value) in [
            ("pods_count", ParamValue::Integer(100)),
            ("avg_cpu_per_pod", ParamValue::Float(0.5)),
            ("avg_ram_per_pod_gb", ParamValue::Float(1.0)),
            ("high_availability", ParamValue::Boolean(true)),
        ] {
            engine.advance(&mut session, name, value).expect("advance");
        }
        let screen = engine.current_screen(&session).expect("screen");

        let message = render_screen(&screen, 12, Language::En);
        assert!(message.text.contains("minimum 12 characters"));
        assert_eq!(
            message.callbacks(),
            vec!["conditions:skip", "conditions:custom", "back:additional_conditions"]
        );
    }

    #[test]
    fn validation_error_offers_a_way_back_to_the_choices() {
        let error = ValidationError::OutOfRange {
            parameter: "replication_factor".to_owned(),
            min: 1.0,
            max: 5.0,
        };
        let message = validation_error(&error);
        assert_eq!(message.text, "❌ Значение должно быть от 1 до 5.");
        assert_eq!(message.callbacks(), vec!["retry:replication_factor"]);

        let mismatch = ValidationError::TypeMismatch {
            parameter: "pods_count".to_owned(),
            expected: ValueKind::Integer,
        };
        assert_eq!(validation_error(&mismatch).callbacks(), vec!["retry:pods_count"]);
    }

    #[test]
    fn custom_prompt_shows_the_accepted_range() {
        let schema = sizer_core::flows::schema_for(FlowKind::Kafka);
        let parameter = schema.parameter("replication_factor").expect("parameter");
        let message = custom_value_prompt(parameter);
        assert!(message.text.contains("от 1 до 5"));
        assert_eq!(message.callbacks(), vec!["retry:replication_factor"]);
    }

    #[test]
    fn menu_and_help_carry_their_keyboards() {
        let menu = main_menu("x");
        assert_eq!(
            menu.reply_labels(),
            vec![
                "☕ Kafka",
                "⎈ Kubernetes",
                "🗄️ Redis",
                "🐰 RabbitMQ",
                "📊 История расчётов",
                "💰 История платежей",
                "ℹ️ Помощь"
            ]
        );

        let help = help();
        assert_eq!(help.inline_rows().len(), 4);
        assert!(help.inline_rows().iter().flatten().all(|button| button.url.is_some()));
        assert!(help.text.contains("/menu - Главное меню"));
    }
}
