use serde::{ Serialize, Deserialize, Deserializer };
use serde::de::DeserializeOwned;
use serde_json::{ json, Value as JsonValue };

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that provides accurate and concise answers.";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const MAX_TEMPERATURE: f64 = 2.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    System,
}

/// User-facing preferences. Stored locally in camelCase, mirrored to the
/// backend under its snake_case names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub use_documents: bool,
    pub save_history: bool,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            use_documents: false,
            save_history: true,
            theme: Theme::Light,
        }
    }
}

impl Settings {
    /// Overlays every present key of `partial` onto `self`.
    pub fn merged(mut self, partial: PartialSettings) -> Self {
        if let Some(temperature) = partial.temperature {
            if temperature.is_finite() {
                self.temperature = temperature.clamp(0.0, MAX_TEMPERATURE);
            }
        }
        if let Some(max_tokens) = partial.max_tokens.filter(|t| *t > 0) {
            self.max_tokens = max_tokens;
        }
        if let Some(system_prompt) = partial.system_prompt {
            self.system_prompt = system_prompt;
        }
        if let Some(use_documents) = partial.use_documents {
            self.use_documents = use_documents;
        }
        if let Some(save_history) = partial.save_history {
            self.save_history = save_history;
        }
        if let Some(theme) = partial.theme {
            self.theme = theme;
        }
        self
    }

    pub fn from_partial(partial: PartialSettings) -> Self {
        Self::default().merged(partial)
    }

    /// The prompt to send with a turn; blank prompts fall back to the default.
    pub fn effective_system_prompt(&self) -> &str {
        if self.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.system_prompt
        }
    }

    pub fn to_backend_payload(&self) -> JsonValue {
        json!({
            "system_prompt": self.system_prompt,
            "save_chat_history": self.save_history,
            "use_docs_toggle": self.use_documents,
            "model_temperature": self.temperature,
            "model_max_tokens": self.max_tokens,
            "theme_selector": self.theme,
        })
    }
}

/// Any subset of settings, as read from the local cache or `GET /settings`.
/// Keys are accepted in camelCase, snake_case (backend) and kebab-case (form
/// ids); a value of the wrong type is treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PartialSettings {
    #[serde(default, deserialize_with = "lenient", alias = "model_temperature", alias = "model-temperature")]
    pub temperature: Option<f64>,

    #[serde(
        default,
        deserialize_with = "lenient",
        rename = "maxTokens",
        alias = "max_tokens",
        alias = "model_max_tokens",
        alias = "model-max-tokens"
    )]
    pub max_tokens: Option<u32>,

    #[serde(
        default,
        deserialize_with = "lenient",
        rename = "systemPrompt",
        alias = "system_prompt",
        alias = "system-prompt"
    )]
    pub system_prompt: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient",
        rename = "useDocuments",
        alias = "use_documents",
        alias = "use_docs_toggle",
        alias = "use-docs-toggle"
    )]
    pub use_documents: Option<bool>,

    #[serde(
        default,
        deserialize_with = "lenient",
        rename = "saveHistory",
        alias = "save_history",
        alias = "save_chat_history",
        alias = "save-chat-history"
    )]
    pub save_history: Option<bool>,

    #[serde(default, deserialize_with = "lenient", alias = "theme_selector", alias = "theme-selector")]
    pub theme: Option<Theme>,
}

impl PartialSettings {
    pub fn from_json(value: JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl From<&Settings> for PartialSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            temperature: Some(settings.temperature),
            max_tokens: Some(settings.max_tokens),
            system_prompt: Some(settings.system_prompt.clone()),
            use_documents: Some(settings.use_documents),
            save_history: Some(settings.save_history),
            theme: Some(settings.theme),
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where D: Deserializer<'de>, T: DeserializeOwned
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
