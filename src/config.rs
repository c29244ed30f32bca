use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Notion rejects more than this many children in a single append call.
pub const APPEND_BATCH_LIMIT: usize = 100;

/// Which text-generation API backs the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
}

impl LlmProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => bail!("Unknown LLM_PROVIDER '{}'. Expected 'anthropic' or 'openai'", other),
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-haiku-20240307",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    fn default_api_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Notion
    pub notion_token: String,
    pub notion_database_id: String,
    pub notion_api_url: String,

    // Language model
    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_api_url: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,

    // Locales
    pub source_locale: String,
    pub target_locales: Vec<String>,

    // Translation retries
    pub translation_max_retries: u32,
    pub translation_retry_backoff: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let llm_provider = match std::env::var("LLM_PROVIDER") {
            Ok(value) => LlmProvider::parse(&value)?,
            Err(_) => LlmProvider::Anthropic,
        };

        let llm_api_key = match llm_provider {
            LlmProvider::Anthropic => {
                std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY not set")?
            }
            LlmProvider::OpenAi => {
                std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?
            }
        };

        let source_locale =
            std::env::var("SOURCE_LOCALE").unwrap_or_else(|_| "pt-BR".to_string());

        let target_locales = parse_locale_list(
            &std::env::var("TARGET_LOCALES").unwrap_or_else(|_| "en,es,fr,it,ja".to_string()),
            &source_locale,
        );
        if target_locales.is_empty() {
            bail!("TARGET_LOCALES must name at least one locale other than {}", source_locale);
        }

        Ok(Self {
            // Notion
            notion_token: std::env::var("NOTION_TOKEN").context("NOTION_TOKEN not set")?,
            notion_database_id: std::env::var("NOTION_DATABASE_ID")
                .context("NOTION_DATABASE_ID not set")?,
            notion_api_url: std::env::var("NOTION_API_URL")
                .unwrap_or_else(|_| "https://api.notion.com/v1".to_string()),

            // Language model
            llm_provider,
            llm_api_key,
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| llm_provider.default_model().to_string()),
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| llm_provider.default_api_url().to_string()),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
            llm_temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.3),

            // Locales
            source_locale,
            target_locales,

            // Translation retries
            translation_max_retries: std::env::var("TRANSLATION_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            translation_retry_backoff: Duration::from_millis(
                std::env::var("TRANSLATION_RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
        })
    }
}

/// Split a comma-separated locale list, keeping first-seen order and dropping
/// blanks, duplicates and the source locale itself.
pub fn parse_locale_list(raw: &str, source_locale: &str) -> Vec<String> {
    let mut locales: Vec<String> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if code != source_locale && !locales.iter().any(|l| l == code) {
            locales.push(code.to_string());
        }
    }
    locales
}
