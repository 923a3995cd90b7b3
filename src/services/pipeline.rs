use serde::Serialize;

use crate::ai::{ClassificationRun, Classifier};
use crate::db::Repository;
use crate::error::Result;
use crate::feed::FeedFetcher;
use crate::settings::PipelineSettings;

use super::{briefing, tagger};

/// Counts from one poll-and-classify cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub must_read_tagged: usize,
    pub unclassified: usize,
    pub classified: usize,
    pub failed_batches: usize,
    pub classification_skipped: bool,
}

/// Poll → store → tag → classify, plus briefing assembly. Every step is
/// idempotent or guarded in the store, so overlapping runs are safe.
pub struct Pipeline {
    repo: Repository,
    fetcher: FeedFetcher,
    classifier: Classifier,
    default_author: String,
}

impl Pipeline {
    pub fn new(
        repo: Repository,
        fetcher: FeedFetcher,
        classifier: Classifier,
        default_author: String,
    ) -> Self {
        Self {
            repo,
            fetcher,
            classifier,
            default_author,
        }
    }

    /// One full cycle. Feed and batch failures are absorbed and logged; only
    /// storage errors surface.
    pub async fn poll_and_classify(&self) -> Result<CycleReport> {
        tracing::info!("Starting poll cycle");
        let settings = PipelineSettings::load(&self.repo).await?;
        let mut report = CycleReport::default();

        if settings.list_ids.is_empty() {
            tracing::info!("No list ids configured; nothing to poll");
        }

        let posts = self
            .fetcher
            .fetch_lists(&settings.list_ids, &self.default_author)
            .await;
        report.fetched = posts.len();

        let inserted = self.repo.store_posts(posts).await?;
        report.inserted = inserted.len();
        tracing::info!(
            "Stored {} new posts out of {} fetched",
            report.inserted,
            report.fetched
        );

        report.must_read_tagged =
            tagger::tag_must_reads(&self.repo, &settings.must_read_accounts).await?;

        let unclassified = self.repo.fetch_unclassified().await?;
        report.unclassified = unclassified.len();

        if !unclassified.is_empty() {
            let run = self
                .classifier
                .classify(&self.repo, &settings, &unclassified)
                .await;
            report.classified = run.classified();
            report.failed_batches = run.failed_batches();
            report.classification_skipped = run == ClassificationRun::Skipped;
        }

        tracing::info!(
            "Poll cycle complete. {} new, {} must-read, {} of {} classified, {} failed batches",
            report.inserted,
            report.must_read_tagged,
            report.classified,
            report.unclassified,
            report.failed_batches
        );
        Ok(report)
    }

    pub async fn generate_briefing(&self) -> Result<Option<i64>> {
        briefing::generate_briefing(&self.repo).await
    }
}
