//! Translate every published source-locale post into each missing target locale.
//!
//! Usage:
//!   cargo run                    # Wait 3 seconds, then process all posts
//!   cargo run -- --yes           # Start immediately
//!
//! Required environment variables:
//! - NOTION_TOKEN
//! - NOTION_DATABASE_ID
//! - ANTHROPIC_API_KEY (or OPENAI_API_KEY with LLM_PROVIDER=openai)
//!
//! Optional:
//! - SOURCE_LOCALE (defaults to pt-BR)
//! - TARGET_LOCALES (defaults to en,es,fr,it,ja)
//! - LLM_MODEL, LLM_API_URL, LLM_MAX_TOKENS, LLM_TEMPERATURE

use anyhow::Result;
use blog_translate_sync::{config::Config, locale, sync};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "translate-all", about = "Translate all published posts into missing locales")]
struct Args {
    /// Skip the cancel window before writing to Notion
    #[arg(short, long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file (ignored in CI)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blog_translate_sync=info".parse()?)
                .add_directive("translate_all=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let targets: Vec<&str> = config
        .target_locales
        .iter()
        .map(|code| locale::prompt_name(code))
        .collect();

    info!("🚀 Batch translation of all {} posts", config.source_locale);
    info!("This will translate every post into: {}", targets.join(", "));

    if !args.yes {
        warn!("⚠️  This may take a while. Press Ctrl+C within 3 seconds to cancel...");
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    let syncer = sync::build_syncer(&config)?;
    let report = syncer.sync_all(&config.source_locale).await?;
    report.log_summary();

    if report.has_failures() {
        warn!("Some translations failed; rerun to retry the missing locales");
    }

    Ok(())
}
