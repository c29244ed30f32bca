//! Fan-out of source posts into their missing target locales.
//!
//! Per source × locale the flow is: check existence, then either skip or
//! translate → create page → append blocks. Each locale is isolated: a
//! failure is recorded in the report and the next locale still runs.
//! Records that already exist are the only completion marker, so a failed
//! locale is picked up again by the next run.

use crate::config::{Config, APPEND_BATCH_LIMIT};
use crate::document::{to_creation_format, Block, WriteBlock};
use crate::extract::{extract, TranslatableUnit};
use crate::llm::{self, TextGenerator};
use crate::notion::{ContentStore, NotionClient, SourceRecord, StoreError};
use crate::reassemble::reassemble;
use crate::retry::RetryConfig;
use crate::translator::Translator;
use anyhow::Context;
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Source record fields the pipeline cannot do without.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Record {0} has no title")]
    MissingTitle(String),

    #[error("Record {0} has no slug")]
    MissingSlug(String),
}

/// Failures that stop a whole source record before any locale is attempted.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An append that stopped part way. Earlier calls stay written.
#[derive(Debug, Error)]
#[error("Failed writing block batch {batch}: {source} ({persisted} blocks already written)")]
pub struct AppendError {
    /// 1-based number of the append call that failed
    pub batch: usize,
    /// Blocks written before the failure, nested ones included
    pub persisted: usize,
    #[source]
    pub source: StoreError,
}

#[derive(Default)]
struct AppendProgress {
    calls: usize,
    persisted: usize,
}

impl AppendProgress {
    fn error(&self, source: StoreError) -> AppendError {
        AppendError {
            batch: self.calls,
            persisted: self.persisted,
            source,
        }
    }
}

/// Part of `block` that goes into its parent's append call, and the children
/// that must be appended under it once it exists.
///
/// A call carries at most one level of children below each block and at most
/// `batch_limit` entries per list, so deeper or wider subtrees are deferred.
fn split_for_append(block: &WriteBlock, batch_limit: usize) -> (WriteBlock, &[WriteBlock]) {
    let inline = block.children.len() <= batch_limit
        && block.children.iter().all(|child| child.children.is_empty());
    if inline {
        let none: &[WriteBlock] = &[];
        (block.clone(), none)
    } else {
        (block.without_children(), &block.children)
    }
}

fn append_level<'a, S>(
    store: &'a S,
    parent_id: &'a str,
    blocks: &'a [WriteBlock],
    batch_limit: usize,
    progress: &'a mut AppendProgress,
) -> BoxFuture<'a, Result<(), AppendError>>
where
    S: ContentStore + ?Sized,
{
    Box::pin(async move {
        for chunk in blocks.chunks(batch_limit) {
            let (payload, deferred): (Vec<WriteBlock>, Vec<&[WriteBlock]>) = chunk
                .iter()
                .map(|block| split_for_append(block, batch_limit))
                .unzip();

            progress.calls += 1;
            let ids = store
                .append_blocks(parent_id, &payload)
                .await
                .map_err(|source| progress.error(source))?;
            if ids.len() != payload.len() {
                return Err(progress.error(StoreError::Decode(format!(
                    "append under {} returned {} ids for {} blocks",
                    parent_id,
                    ids.len(),
                    payload.len()
                ))));
            }
            progress.persisted += payload.iter().map(WriteBlock::subtree_len).sum::<usize>();

            for (id, children) in ids.iter().zip(deferred) {
                if !children.is_empty() {
                    append_level(store, id, children, batch_limit, progress).await?;
                }
            }
        }
        Ok(())
    })
}

/// Append `blocks` under `record_id` in sequential calls.
///
/// Each call holds at most `batch_limit` blocks and at most two levels of
/// nesting; deeper or wider children follow in calls on their created parent.
/// Returns the number of blocks written, nested ones included.
pub async fn append_in_batches<S>(
    store: &S,
    record_id: &str,
    blocks: &[WriteBlock],
    batch_limit: usize,
) -> Result<usize, AppendError>
where
    S: ContentStore + ?Sized,
{
    let mut progress = AppendProgress::default();
    append_level(store, record_id, blocks, batch_limit.max(1), &mut progress).await?;
    Ok(progress.persisted)
}

/// Where a locale attempt stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedStage {
    Translate,
    Reassemble,
    WritePage,
    WriteBlocks { page_id: String, persisted: usize },
}

/// Terminal state of one source × locale pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocaleOutcome {
    /// A record for this locale already existed.
    Skipped,
    Done { page_id: String, blocks: usize },
    Failed { stage: FailedStage, message: String },
}

/// What happened to one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub source_id: String,
    pub slug: String,
    /// One entry per target locale, in configured order.
    pub outcomes: Vec<(String, LocaleOutcome)>,
}

impl RecordReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, LocaleOutcome::Done { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, LocaleOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, LocaleOutcome::Failed { .. }))
    }

    /// True when every target locale already existed.
    pub fn was_complete(&self) -> bool {
        self.skipped() == self.outcomes.len()
    }

    fn count(&self, predicate: impl Fn(&LocaleOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }

    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!("📊 Translation summary for {}", self.slug);
        info!("   ✅ Successful: {}", self.created());
        if self.failed() > 0 {
            info!("   ❌ Failed: {}", self.failed());
        }
        if self.skipped() > 0 {
            info!("   ⏭️  Skipped: {}", self.skipped());
        }
        info!("{}", "=".repeat(60));
    }
}

/// Totals across a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: usize,
    /// Records skipped for missing title or slug
    pub invalid: usize,
    /// Records with every locale already present
    pub complete: usize,
    /// Records that failed before any locale was attempted
    pub failed_records: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn add(&mut self, report: &RecordReport) {
        if report.was_complete() {
            self.complete += 1;
        }
        self.created += report.created();
        self.skipped += report.skipped();
        self.failed += report.failed();
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.failed_records > 0
    }

    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!("📊 Final summary");
        info!("   Total posts processed: {}", self.records);
        info!("   ✅ Translations created: {}", self.created);
        info!("   ⏭️  Posts skipped (already translated): {}", self.complete);
        if self.invalid > 0 {
            info!("   ⏭️  Posts skipped (missing title or slug): {}", self.invalid);
        }
        if self.failed > 0 {
            info!("   ❌ Failed translations: {}", self.failed);
        }
        if self.failed_records > 0 {
            info!("   ❌ Posts that could not be processed: {}", self.failed_records);
        }
        info!("{}", "=".repeat(60));
    }
}

/// Drives source records through translation into every target locale.
pub struct Syncer<S, G> {
    store: S,
    translator: Translator<G>,
    target_locales: Vec<String>,
    batch_limit: usize,
}

impl<S, G> Syncer<S, G>
where
    S: ContentStore,
    G: TextGenerator,
{
    pub fn new(store: S, translator: Translator<G>, target_locales: Vec<String>) -> Self {
        Self {
            store,
            translator,
            target_locales,
            batch_limit: APPEND_BATCH_LIMIT,
        }
    }

    /// Override the append batch size. Only useful against fake stores.
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create every missing translation of `record`.
    ///
    /// Fails as a whole only when the record lacks a title or slug, or when
    /// the existence check or block fetch fails. Per-locale failures end up
    /// in the report.
    pub async fn sync_record(&self, record: &SourceRecord) -> Result<RecordReport, SyncError> {
        let title = record
            .title()
            .ok_or_else(|| InputError::MissingTitle(record.id.clone()))?;
        let slug = record
            .slug()
            .ok_or_else(|| InputError::MissingSlug(record.id.clone()))?;

        let existing = self.store.existing_locales(&slug).await?;
        let (present, missing): (Vec<&String>, Vec<&String>) = self
            .target_locales
            .iter()
            .partition(|locale| existing.contains(*locale));

        if !present.is_empty() {
            info!("⏭️  Skipping (already exist): {}", join(&present));
        }

        let mut outcomes: Vec<(String, LocaleOutcome)> = self
            .target_locales
            .iter()
            .map(|locale| (locale.clone(), LocaleOutcome::Skipped))
            .collect();

        if missing.is_empty() {
            info!("✅ All translations already exist for {}, nothing to do", slug);
            return Ok(RecordReport {
                source_id: record.id.clone(),
                slug,
                outcomes,
            });
        }

        info!("🌍 Will translate to: {}", join(&missing));

        // The source tree is fetched once and shared by every locale.
        let blocks = self.store.get_blocks(&record.id).await?;
        let units = extract(&blocks);
        info!("Found {} blocks with {} text units", blocks.len(), units.len());

        for (locale, outcome) in outcomes.iter_mut() {
            if !missing.contains(&&*locale) {
                continue;
            }
            info!("🌐 Translating to {}...", locale);
            *outcome = self
                .sync_locale(record, &title, &blocks, &units, locale)
                .await;
        }

        Ok(RecordReport {
            source_id: record.id.clone(),
            slug,
            outcomes,
        })
    }

    async fn sync_locale(
        &self,
        record: &SourceRecord,
        title: &str,
        blocks: &[Block],
        units: &[TranslatableUnit],
        locale: &str,
    ) -> LocaleOutcome {
        let translation = match self.translator.translate(title, units, locale).await {
            Ok(translation) => translation,
            Err(e) => return failed(locale, FailedStage::Translate, &e),
        };

        let rebuilt = match reassemble(blocks, &translation.units) {
            Ok(rebuilt) => rebuilt,
            Err(e) => return failed(locale, FailedStage::Reassemble, &e),
        };
        let write_blocks: Vec<WriteBlock> = rebuilt
            .iter()
            .map(|block| to_creation_format(block, None))
            .collect();

        let page = match self
            .store
            .create_record(record, &translation.title, locale)
            .await
        {
            Ok(page) => page,
            Err(e) => return failed(locale, FailedStage::WritePage, &e),
        };
        info!("✓ Page created: {}", page.id);

        match append_in_batches(&self.store, &page.id, &write_blocks, self.batch_limit).await {
            Ok(count) => {
                info!("✅ Created {} version with {} blocks", locale, count);
                LocaleOutcome::Done {
                    page_id: page.id,
                    blocks: count,
                }
            }
            Err(e) => {
                let persisted = e.persisted;
                failed(
                    locale,
                    FailedStage::WriteBlocks {
                        page_id: page.id,
                        persisted,
                    },
                    &e,
                )
            }
        }
    }

    /// Sync every published record in `source_locale`.
    ///
    /// Only a failure to list the records aborts the run; anything that goes
    /// wrong for a single record is counted and the batch moves on.
    pub async fn sync_all(&self, source_locale: &str) -> Result<BatchReport, StoreError> {
        let records = self.store.query_source_records(source_locale).await?;
        let mut report = BatchReport {
            records: records.len(),
            ..BatchReport::default()
        };

        if records.is_empty() {
            info!("No {} posts found", source_locale);
            return Ok(report);
        }
        info!("Found {} {} posts", records.len(), source_locale);

        for (i, record) in records.iter().enumerate() {
            info!("{}", "=".repeat(60));
            info!(
                "📄 [{}/{}] {} ({})",
                i + 1,
                records.len(),
                record.title().unwrap_or_else(|| record.id.clone()),
                record
                    .published_on()
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| "undated".to_string())
            );

            match self.sync_record(record).await {
                Ok(record_report) => report.add(&record_report),
                Err(SyncError::Input(e)) => {
                    warn!("⏭️  Skipping post {}: {}", i + 1, e);
                    report.invalid += 1;
                }
                Err(SyncError::Store(e)) => {
                    error!("❌ Could not process post {}: {}", i + 1, e);
                    report.failed_records += 1;
                }
            }
        }

        Ok(report)
    }
}

/// The production wiring: Notion on one side, the configured model on the other.
pub type NotionSyncer = Syncer<NotionClient, Box<dyn TextGenerator>>;

pub fn build_syncer(config: &Config) -> anyhow::Result<NotionSyncer> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("Failed to build HTTP client")?;

    let translator = Translator::new(
        llm::from_config(client.clone(), config),
        config.source_locale.clone(),
        RetryConfig::fixed(
            config.translation_max_retries,
            config.translation_retry_backoff,
        ),
    );

    Ok(Syncer::new(
        NotionClient::new(client, config),
        translator,
        config.target_locales.clone(),
    ))
}

fn failed(locale: &str, stage: FailedStage, error: &dyn std::fmt::Display) -> LocaleOutcome {
    error!("❌ Failed to create {} translation: {}", locale, error);
    LocaleOutcome::Failed {
        stage,
        message: error.to_string(),
    }
}

fn join(locales: &[&String]) -> String {
    locales
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BlockKind;
    use crate::notion::NewRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every append call and fails the configured one.
    #[derive(Default)]
    struct AppendRecorder {
        calls: Mutex<Vec<(String, Vec<WriteBlock>)>>,
        fail_on_call: Option<usize>,
    }

    impl AppendRecorder {
        fn sizes(&self) -> Vec<usize> {
            let calls = self.calls.lock().unwrap();
            calls.iter().map(|(_, blocks)| blocks.len()).collect()
        }
    }

    #[async_trait]
    impl ContentStore for AppendRecorder {
        async fn query_source_records(&self, _: &str) -> Result<Vec<SourceRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn get_record(&self, id: &str) -> Result<SourceRecord, StoreError> {
            Err(StoreError::Decode(format!("no record {}", id)))
        }

        async fn get_blocks(&self, _: &str) -> Result<Vec<Block>, StoreError> {
            Ok(Vec::new())
        }

        async fn existing_locales(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_record(
            &self,
            _: &SourceRecord,
            _: &str,
            _: &str,
        ) -> Result<NewRecord, StoreError> {
            Ok(NewRecord {
                id: "new".to_string(),
            })
        }

        async fn append_blocks(
            &self,
            parent_id: &str,
            blocks: &[WriteBlock],
        ) -> Result<Vec<String>, StoreError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((parent_id.to_string(), blocks.to_vec()));
            if Some(calls.len()) == self.fail_on_call {
                return Err(StoreError::Api {
                    status: 409,
                    body: "conflict".to_string(),
                });
            }
            let call = calls.len();
            Ok((0..blocks.len())
                .map(|i| format!("c{}-{}", call, i))
                .collect())
        }
    }

    fn divider(id: &str) -> Block {
        Block::new(id, BlockKind::Divider)
    }

    fn dividers(count: usize) -> Vec<WriteBlock> {
        (0..count)
            .map(|i| to_creation_format(&divider(&format!("d{}", i)), None))
            .collect()
    }

    #[tokio::test]
    async fn test_append_chunks_into_limit_sized_calls() {
        let store = AppendRecorder::default();

        let written = append_in_batches(&store, "page", &dividers(250), 100)
            .await
            .unwrap();

        assert_eq!(written, 250);
        assert_eq!(store.sizes(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_append_failure_reports_persisted_batches() {
        let store = AppendRecorder {
            fail_on_call: Some(2),
            ..AppendRecorder::default()
        };

        let err = append_in_batches(&store, "page", &dividers(250), 100)
            .await
            .unwrap_err();

        assert_eq!(err.batch, 2);
        assert_eq!(err.persisted, 100);
        assert!(err.to_string().contains("100 blocks already written"));
        // No further calls after the failure
        assert_eq!(store.sizes(), vec![100, 100]);
    }

    #[tokio::test]
    async fn test_shallow_children_ride_along_with_parent() {
        let store = AppendRecorder::default();
        let toggle = divider("t").with_children(vec![divider("a"), divider("b")]);

        let written = append_in_batches(&store, "page", &[to_creation_format(&toggle, None)], 100)
            .await
            .unwrap();

        assert_eq!(written, 3);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1[0].children.len(), 2);
    }

    #[tokio::test]
    async fn test_deep_children_follow_under_created_parent() {
        let store = AppendRecorder::default();
        // page > a > b > c
        let chain = divider("a")
            .with_children(vec![divider("b").with_children(vec![divider("c")])]);

        let written = append_in_batches(&store, "page", &[to_creation_format(&chain, None)], 100)
            .await
            .unwrap();

        assert_eq!(written, 3);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "page");
        assert!(calls[0].1[0].children.is_empty());
        // b goes under the id returned for a, carrying c inline
        assert_eq!(calls[1].0, "c1-0");
        assert_eq!(calls[1].1.len(), 1);
        assert_eq!(calls[1].1[0].children.len(), 1);
    }

    #[tokio::test]
    async fn test_wide_children_are_batched_under_parent() {
        let store = AppendRecorder::default();
        let children: Vec<Block> = (0..150).map(|i| divider(&format!("k{}", i))).collect();
        let toggle = divider("t").with_children(children);

        let written = append_in_batches(&store, "page", &[to_creation_format(&toggle, None)], 100)
            .await
            .unwrap();

        assert_eq!(written, 151);
        assert_eq!(store.sizes(), vec![1, 100, 50]);
        let calls = store.calls.lock().unwrap();
        assert!(calls[0].1[0].children.is_empty());
        assert_eq!(calls[1].0, "c1-0");
        assert_eq!(calls[2].0, "c1-0");
    }

    #[tokio::test]
    async fn test_nested_failure_counts_blocks_already_written() {
        let store = AppendRecorder {
            fail_on_call: Some(3),
            ..AppendRecorder::default()
        };
        let children: Vec<Block> = (0..150).map(|i| divider(&format!("k{}", i))).collect();
        let toggle = divider("t").with_children(children);

        let err = append_in_batches(&store, "page", &[to_creation_format(&toggle, None)], 100)
            .await
            .unwrap_err();

        assert_eq!(err.batch, 3);
        assert_eq!(err.persisted, 101);
    }

    #[tokio::test]
    async fn test_append_nothing_makes_no_calls() {
        let store = AppendRecorder::default();

        assert_eq!(append_in_batches(&store, "page", &[], 100).await.unwrap(), 0);
        assert!(store.sizes().is_empty());
    }

    #[test]
    fn test_record_report_counts() {
        let report = RecordReport {
            source_id: "s".to_string(),
            slug: "slug".to_string(),
            outcomes: vec![
                ("en".to_string(), LocaleOutcome::Skipped),
                (
                    "es".to_string(),
                    LocaleOutcome::Done {
                        page_id: "p".to_string(),
                        blocks: 3,
                    },
                ),
                (
                    "fr".to_string(),
                    LocaleOutcome::Failed {
                        stage: FailedStage::Translate,
                        message: "boom".to_string(),
                    },
                ),
            ],
        };

        assert_eq!(report.created(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.was_complete());

        let mut batch = BatchReport::default();
        batch.add(&report);
        batch.add(&report);
        assert_eq!(batch.created, 2);
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.complete, 0);
        assert!(batch.has_failures());
    }
}
