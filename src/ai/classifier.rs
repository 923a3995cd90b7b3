use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Classification, Post, MUST_READ};
use crate::settings::PipelineSettings;

use super::gemini::{CategorizationRequest, CategorizationService};

const BATCH_SIZE: usize = 25;
const TEMPERATURE: f32 = 0.1;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// What the model sees for each post. Media URLs are reduced to a flag.
#[derive(Debug, Serialize)]
struct PostDescriptor<'a> {
    id: &'a str,
    author: &'a str,
    text: &'a str,
    has_media: bool,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    id: Option<String>,
    category: Option<String>,
    confidence: Option<f64>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerdictPayload {
    Bare(Vec<Value>),
    Wrapped { classifications: Vec<Value> },
}

/// Result of one batch. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Classified { attempted: usize, applied: usize },
    Failed { attempted: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationRun {
    /// No credential configured; nothing was sent.
    Skipped,
    Completed(Vec<BatchOutcome>),
}

impl ClassificationRun {
    pub fn classified(&self) -> usize {
        match self {
            Self::Skipped => 0,
            Self::Completed(outcomes) => outcomes
                .iter()
                .map(|o| match o {
                    BatchOutcome::Classified { applied, .. } => *applied,
                    BatchOutcome::Failed { .. } => 0,
                })
                .sum(),
        }
    }

    pub fn failed_batches(&self) -> usize {
        match self {
            Self::Skipped => 0,
            Self::Completed(outcomes) => outcomes
                .iter()
                .filter(|o| matches!(o, BatchOutcome::Failed { .. }))
                .count(),
        }
    }
}

pub struct Classifier {
    service: Option<Arc<dyn CategorizationService>>,
    batch_size: usize,
}

impl Classifier {
    pub fn new(service: Option<Arc<dyn CategorizationService>>) -> Self {
        Self {
            service,
            batch_size: BATCH_SIZE,
        }
    }

    /// Classifies `posts` in fixed-size batches, one after another. Each
    /// batch commits on its own; a failed batch leaves its posts for the
    /// next cycle.
    pub async fn classify(
        &self,
        repo: &Repository,
        settings: &PipelineSettings,
        posts: &[Post],
    ) -> ClassificationRun {
        let Some(service) = &self.service else {
            tracing::warn!("No Gemini API key set, skipping classification");
            return ClassificationRun::Skipped;
        };

        let mut outcomes = Vec::new();
        for (index, batch) in posts.chunks(self.batch_size).enumerate() {
            let outcome = match self
                .classify_batch(service.as_ref(), repo, settings, batch)
                .await
            {
                Ok(applied) => {
                    tracing::info!(
                        "Classified batch {} ({} posts, {} updated)",
                        index + 1,
                        batch.len(),
                        applied
                    );
                    BatchOutcome::Classified {
                        attempted: batch.len(),
                        applied,
                    }
                }
                Err(e) => {
                    tracing::error!("Classification of batch {} failed: {}", index + 1, e);
                    BatchOutcome::Failed {
                        attempted: batch.len(),
                        reason: e.to_string(),
                    }
                }
            };

            let ids = batch.iter().map(|p| p.id.clone()).collect();
            if let Err(e) = repo.record_classification_attempt(ids).await {
                tracing::warn!("Failed to record classification attempt: {}", e);
            }

            outcomes.push(outcome);
        }

        ClassificationRun::Completed(outcomes)
    }

    async fn classify_batch(
        &self,
        service: &dyn CategorizationService,
        repo: &Repository,
        settings: &PipelineSettings,
        batch: &[Post],
    ) -> Result<usize> {
        let request = build_request(settings, batch)?;
        let text = service.categorize(&request).await?;

        let batch_ids: HashSet<&str> = batch.iter().map(|p| p.id.as_str()).collect();
        // must_read is only ever set by the tagger
        let allowed: HashSet<&str> = settings
            .categories
            .iter()
            .map(|c| c.key.as_str())
            .filter(|key| *key != MUST_READ)
            .collect();
        let verdicts: Vec<Classification> = parse_verdicts(&text)?
            .into_iter()
            .filter(|v| {
                if !batch_ids.contains(v.post_id.as_str()) {
                    tracing::debug!("Ignoring verdict for post outside batch: {}", v.post_id);
                    return false;
                }
                if !allowed.contains(v.category.as_str()) {
                    tracing::debug!(
                        "Ignoring verdict with unusable category '{}' for post {}",
                        v.category,
                        v.post_id
                    );
                    return false;
                }
                true
            })
            .collect();

        repo.apply_classifications(verdicts).await
    }
}

fn build_request(settings: &PipelineSettings, batch: &[Post]) -> Result<CategorizationRequest> {
    let descriptors: Vec<PostDescriptor> = batch
        .iter()
        .map(|post| PostDescriptor {
            id: &post.id,
            author: &post.author,
            text: &post.content_text,
            has_media: post.has_media(),
        })
        .collect();

    Ok(CategorizationRequest {
        model: settings.model.clone(),
        system_instruction: settings.classification_prompt.clone(),
        user_message: serde_json::to_string_pretty(&descriptors)?,
        temperature: TEMPERATURE,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodes the model's answer. Accepts a bare array or an object with a
/// `classifications` array. Entries without an id or category are dropped.
fn parse_verdicts(text: &str) -> Result<Vec<Classification>> {
    let payload: VerdictPayload = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AppError::ClassifierApi(format!("malformed response: {}", e)))?;

    let items = match payload {
        VerdictPayload::Bare(items) => items,
        VerdictPayload::Wrapped { classifications } => classifications,
    };

    let verdicts = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawVerdict>(item) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::debug!("Skipping unreadable classification entry: {}", e);
                None
            }
        })
        .filter_map(|raw| {
            let post_id = raw.id.filter(|id| !id.is_empty())?;
            let category = raw.category.filter(|c| !c.is_empty())?;
            Some(Classification {
                post_id,
                category,
                confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
                reason: raw.reason.unwrap_or_default(),
            })
        })
        .collect();

    Ok(verdicts)
}
