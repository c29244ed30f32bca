//! Translate published blog posts from the source locale into every
//! configured target locale, writing each translation back to Notion as a
//! sibling record that shares the source's slug.

pub mod config;
pub mod document;
pub mod extract;
pub mod llm;
pub mod locale;
pub mod notion;
pub mod reassemble;
pub mod retry;
pub mod sync;
pub mod translator;
