//! Translate a single post into each missing target locale.
//!
//! Usage:
//!   cargo run --bin translate-post -- <page-id-or-url>
//!
//! Accepts a bare page id (dashed or not) or any Notion URL ending in one.
//! Uses the same environment variables as `translate-all`.

use anyhow::{bail, Context, Result};
use blog_translate_sync::{
    config::Config,
    notion::{extract_page_id, ContentStore},
    sync,
};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "translate-post", about = "Translate one post into missing locales")]
struct Args {
    /// Notion page id or URL of the source post
    page: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blog_translate_sync=info".parse()?)
                .add_directive("translate_post=info".parse()?),
        )
        .init();

    let Some(page_id) = extract_page_id(&args.page) else {
        bail!("Could not find a Notion page id in '{}'", args.page);
    };

    let config = Config::from_env()?;
    let syncer = sync::build_syncer(&config)?;

    info!("📄 Fetching post {}...", page_id);
    let record = syncer
        .store()
        .get_record(&page_id)
        .await
        .with_context(|| format!("Failed to fetch page {}", page_id))?;

    info!(
        "Title: {}",
        record.title().as_deref().unwrap_or("(untitled)")
    );
    match record.locale() {
        Some(locale) if locale == config.source_locale => {}
        Some(locale) => warn!(
            "⚠️  Post locale is {}, not {}; translating anyway",
            locale, config.source_locale
        ),
        None => warn!("⚠️  Post has no locale set; translating anyway"),
    }

    let report = syncer.sync_record(&record).await?;
    report.log_summary();

    if report.failed() > 0 {
        warn!("Some translations failed; rerun to retry the missing locales");
    }

    Ok(())
}
