/// Interface language. Only the greeting and the conditions-stage notices are translated;
/// everything else is Russian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    Ru,
    En,
}

impl Language {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some(code) if code.to_ascii_lowercase().starts_with("en") => Self::En,
            _ => Self::Ru,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phrase {
    Greeting,
    ConditionsPrompt,
    ConditionsTooShort,
    InjectionDetected,
    Analysing,
    AdjustmentFailed,
}

pub fn text(language: Language, phrase: Phrase) -> &'static str {
    match (language, phrase) {
        (Language::Ru, Phrase::Greeting) => {
            "Добро пожаловать в бот помощник по сайзингу инфраструктурных сервисов! 🚀"
        }
        (Language::En, Phrase::Greeting) => "Welcome to the Infrastructure Sizing Helper Bot! 🚀",
        (Language::Ru, Phrase::ConditionsPrompt) => {
            "Опишите дополнительные условия (минимум {min} символов) или напишите \"нет\"/\"skip\":"
        }
        (Language::En, Phrase::ConditionsPrompt) => {
            "Describe additional conditions (minimum {min} characters) or write \"no\"/\"skip\":"
        }
        (Language::Ru, Phrase::ConditionsTooShort) => {
            "Пожалуйста, опишите условия подробнее (минимум {min} символов) или напишите \"нет\"/\"skip\" для пропуска."
        }
        (Language::En, Phrase::ConditionsTooShort) => {
            "Please describe the conditions in more detail (minimum {min} characters) or write \"no\"/\"skip\" to skip."
        }
        (Language::Ru, Phrase::InjectionDetected) => {
            "⚠️ Обнаружена попытка prompt injection. Ваш аккаунт заблокирован."
        }
        (Language::En, Phrase::InjectionDetected) => {
            "⚠️ Prompt injection attempt detected. Your account has been banned."
        }
        (Language::Ru, Phrase::Analysing) => "🤖 Анализирую дополнительные условия с помощью ИИ...",
        (Language::En, Phrase::Analysing) => "🤖 Analyzing additional conditions using AI...",
        (Language::Ru, Phrase::AdjustmentFailed) => {
            "❌ Ошибка при обработке через ИИ. Используются базовые расчёты."
        }
        (Language::En, Phrase::AdjustmentFailed) => {
            "❌ Error processing via AI. Using basic calculations."
        }
    }
}

/// Phrase with its `{min}` placeholder filled in.
pub fn with_min(language: Language, phrase: Phrase, min_length: usize) -> String {
    text(language, phrase).replace("{min}", &min_length.to_string())
}
