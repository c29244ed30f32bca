//! Locale registry: display names used when prompting the language model.

/// Metadata for a locale the blog knows how to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleInfo {
    /// Locale tag as stored in the `Locale` select property (e.g., "en", "pt-BR")
    pub code: &'static str,

    /// Name given to the model, with the native spelling in parentheses
    pub prompt_name: &'static str,
}

const LOCALES: &[LocaleInfo] = &[
    LocaleInfo {
        code: "en",
        prompt_name: "English",
    },
    LocaleInfo {
        code: "es",
        prompt_name: "Spanish (Español)",
    },
    LocaleInfo {
        code: "fr",
        prompt_name: "French (Français)",
    },
    LocaleInfo {
        code: "it",
        prompt_name: "Italian (Italiano)",
    },
    LocaleInfo {
        code: "ja",
        prompt_name: "Japanese (日本語)",
    },
    LocaleInfo {
        code: "pt-BR",
        prompt_name: "Brazilian Portuguese (Português Brasileiro)",
    },
];

/// Look up a locale by its tag.
pub fn lookup(code: &str) -> Option<&'static LocaleInfo> {
    LOCALES.iter().find(|info| info.code == code)
}

/// Name to use for `code` in prompts. Unknown tags are passed through as-is
/// so that new locales work without a registry entry.
pub fn prompt_name(code: &str) -> &str {
    lookup(code).map(|info| info.prompt_name).unwrap_or(code)
}
