use crate::extract::TranslatableUnit;
use crate::llm::{LlmError, TextGenerator};
use crate::locale;
use crate::retry::{with_retry_if, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TranslateError {
    /// The model's reply held no parseable JSON object.
    #[error("Could not parse JSON from translation response: {0}")]
    Parse(String),

    /// The reply parsed but lacks a title or a blocks array.
    #[error("Invalid translation response structure: {0}")]
    Structure(String),

    #[error(transparent)]
    Transport(#[from] LlmError),
}

impl TranslateError {
    /// Only malformed replies are worth asking again for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranslateError::Parse(_) | TranslateError::Structure(_))
    }
}

/// A unit paired with its translated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedUnit {
    pub index: usize,
    pub kind: String,
    pub block_id: String,
    pub source_text: String,
    pub translated_text: String,
}

impl TranslatedUnit {
    pub fn new(unit: &TranslatableUnit, translated_text: String) -> Self {
        Self {
            index: unit.index,
            kind: unit.kind.clone(),
            block_id: unit.block_id.clone(),
            source_text: unit.text.clone(),
            translated_text,
        }
    }

    /// The unit with its own text standing in for the translation.
    pub fn untranslated(unit: &TranslatableUnit) -> Self {
        Self::new(unit, unit.text.clone())
    }
}

/// Translated title and one entry per input unit, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub title: String,
    pub units: Vec<TranslatedUnit>,
}

#[derive(Serialize)]
struct PromptContent<'a> {
    title: &'a str,
    blocks: &'a [TranslatableUnit],
}

#[derive(Debug, Deserialize)]
struct TranslatedEntry {
    index: usize,
    text: String,
}

#[derive(Debug)]
struct TranslatedContent {
    title: String,
    entries: Vec<TranslatedEntry>,
}

/// Translates a page's title and text units with a language model.
pub struct Translator<G> {
    generator: G,
    source_locale: String,
    retry: RetryConfig,
}

impl<G: TextGenerator> Translator<G> {
    pub fn new(generator: G, source_locale: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            generator,
            source_locale: source_locale.into(),
            retry,
        }
    }

    pub fn source_locale(&self) -> &str {
        &self.source_locale
    }

    /// Translate `title` and `units` into `target_locale`.
    ///
    /// Asking for the source locale returns the input untouched without a
    /// model call. Malformed replies are retried with the configured fixed
    /// backoff; transport errors are returned immediately.
    pub async fn translate(
        &self,
        title: &str,
        units: &[TranslatableUnit],
        target_locale: &str,
    ) -> Result<Translation, TranslateError> {
        if target_locale == self.source_locale {
            return Ok(Translation {
                title: title.to_string(),
                units: units.iter().map(TranslatedUnit::untranslated).collect(),
            });
        }

        let target_language = locale::prompt_name(target_locale);
        info!(
            "Translating {} text blocks to {}",
            units.len(),
            target_language
        );

        let prompt = build_prompt(
            locale::prompt_name(&self.source_locale),
            target_language,
            title,
            units,
        );

        let content = with_retry_if(
            &self.retry,
            &format!("Translation to {}", target_locale),
            || async {
                let response = self.generator.generate(&prompt).await?;
                let content = parse_response(&response)?;
                check_unit_count(&content, units.len())?;
                Ok(content)
            },
            TranslateError::is_retryable,
        )
        .await?;

        Ok(merge(content, units))
    }
}

/// Build the single prompt sent for a page.
fn build_prompt(
    source_language: &str,
    target_language: &str,
    title: &str,
    units: &[TranslatableUnit],
) -> String {
    let content = serde_json::to_string_pretty(&PromptContent {
        title,
        blocks: units,
    })
    .unwrap_or_default();

    format!(
        r#"You are a professional translator. Translate the following blog post from {source} to {target}.

CRITICAL: Your response must be ONLY a valid JSON object. Do not include any explanation, markdown formatting, or text before or after the JSON.

TRANSLATION RULES:
- Maintain the same tone, style, and formality level
- Keep the same formatting and structure
- Preserve special characters properly (use Unicode escape sequences if needed)
- Return every block with its original index
- DO NOT translate:
  * Brand names
  * Product names
  * URLs
  * Code snippets
  * Proper nouns (names of people, places, organizations)

Original content:
{content}

REQUIRED RESPONSE FORMAT (valid JSON only):
{{
  "title": "translated title here",
  "blocks": [
    {{
      "index": 0,
      "type": "paragraph",
      "text": "translated text here"
    }}
  ]
}}

Remember: Return ONLY the JSON object, nothing else."#,
        source = source_language,
        target = target_language,
        content = content,
    )
}

/// Find the first balanced `{...}` span in `text`, skipping braces inside
/// JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse the model's reply, tolerating prose or code fences around the JSON.
fn extract_json(response: &str) -> Result<Value, TranslateError> {
    if let Ok(value) = serde_json::from_str(response) {
        return Ok(value);
    }

    let candidate = first_json_object(response).ok_or_else(|| {
        let preview: String = response.chars().take(200).collect();
        TranslateError::Parse(format!("no JSON object found in response: {}...", preview))
    })?;

    serde_json::from_str(candidate).map_err(|e| TranslateError::Parse(e.to_string()))
}

fn parse_response(response: &str) -> Result<TranslatedContent, TranslateError> {
    let value = extract_json(response)?;

    let title = match value.get("title").and_then(Value::as_str) {
        Some(title) if !title.trim().is_empty() => title.to_string(),
        _ => {
            return Err(TranslateError::Structure(
                "missing or empty \"title\"".to_string(),
            ))
        }
    };

    let blocks = value
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::Structure("\"blocks\" is not an array".to_string()))?;

    let entries = blocks
        .iter()
        .filter_map(|entry| match TranslatedEntry::deserialize(entry) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring malformed translated block {}: {}", entry, e);
                None
            }
        })
        .collect();

    Ok(TranslatedContent { title, entries })
}

/// Replies must carry exactly one entry per input unit; anything else is
/// treated like any other malformed reply and asked for again.
fn check_unit_count(content: &TranslatedContent, expected: usize) -> Result<(), TranslateError> {
    if content.entries.len() != expected {
        return Err(TranslateError::Structure(format!(
            "expected {} translated blocks, got {}",
            expected,
            content.entries.len()
        )));
    }
    Ok(())
}

/// Pair every input unit with its translation, falling back to the source
/// text for any index the reply does not cover (duplicated or stray indices).
fn merge(content: TranslatedContent, units: &[TranslatableUnit]) -> Translation {
    let translated_units = units
        .iter()
        .map(|unit| {
            match content.entries.iter().find(|entry| entry.index == unit.index) {
                Some(entry) => TranslatedUnit::new(unit, entry.text.clone()),
                None => {
                    debug!("No translation for block {}, keeping source text", unit.index);
                    TranslatedUnit::untranslated(unit)
                }
            }
        })
        .collect();

    Translation {
        title: content.title,
        units: translated_units,
    }
}
