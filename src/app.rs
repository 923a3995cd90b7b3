use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::ai::{CategorizationService, Classifier, GeminiClient, generate_classification_prompt};
use crate::cli::{Command, SettingsCommand};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::{default_categories, Briefing, CategoryDef, Post};
use crate::scheduler::Scheduler;
use crate::services::{CycleReport, Pipeline};
use crate::settings::{self, default_settings, ScheduleConfig};

const SCHEDULE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct App {
    repository: Repository,
    pipeline: Arc<Pipeline>,
    scheduler: Scheduler,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let service = match config.api_key() {
            Some(key) => {
                Some(Arc::new(GeminiClient::new(key.to_string())?) as Arc<dyn CategorizationService>)
            }
            None => None,
        };
        Self::with_service(config, service).await
    }

    /// Builds the context around an explicit categorization service (or none).
    pub async fn with_service(
        config: &Config,
        service: Option<Arc<dyn CategorizationService>>,
    ) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        repository.seed_settings(default_settings()).await?;

        let fetcher = FeedFetcher::new(&config.feed_base_url)?;
        let pipeline = Arc::new(Pipeline::new(
            repository.clone(),
            fetcher,
            Classifier::new(service),
            config.default_author.clone(),
        ));
        let scheduler = Scheduler::new(Arc::clone(&pipeline));

        Ok(Self {
            repository,
            pipeline,
            scheduler,
        })
    }

    /// Executes one subcommand and returns what should be printed.
    pub async fn run(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Serve => {
                self.serve().await?;
                Ok(String::new())
            }
            Command::Poll => {
                let report = self.poll_now().await?;
                Ok(serde_json::to_string_pretty(&report)?)
            }
            Command::Brief => Ok(match self.generate_briefing_now().await? {
                Some(id) => format!("Created briefing #{}", id),
                None => "No classified posts waiting; no briefing created".to_string(),
            }),
            Command::Briefings => {
                let briefings = self.list_briefings().await?;
                if briefings.is_empty() {
                    return Ok("No briefings yet".to_string());
                }
                Ok(briefings
                    .iter()
                    .map(format_briefing)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::Posts {
                briefing_id,
                category,
            } => {
                let posts = self.briefing_posts(briefing_id, category).await?;
                Ok(serde_json::to_string_pretty(&posts)?)
            }
            Command::Reclassify { post_id, category } => {
                self.reclassify(&post_id, &category).await?;
                Ok(format!("{} -> {}", post_id, category))
            }
            Command::ResetPrompt => self.reset_classification_prompt().await,
            Command::Settings(SettingsCommand::List) => {
                let all = self.repository.get_all_settings().await?;
                Ok(serde_json::to_string_pretty(&all)?)
            }
            Command::Settings(SettingsCommand::Get { key }) => {
                let value = self.get_setting(&key).await?;
                Ok(serde_json::to_string_pretty(&value)?)
            }
            Command::Settings(SettingsCommand::Set { key, value }) => {
                let value: Value = serde_json::from_str(&value)?;
                self.update_setting(&key, value).await?;
                Ok(format!("Updated {}", key))
            }
        }
    }

    pub async fn poll_now(&self) -> Result<CycleReport> {
        self.pipeline.poll_and_classify().await
    }

    pub async fn generate_briefing_now(&self) -> Result<Option<i64>> {
        self.pipeline.generate_briefing().await
    }

    pub async fn list_briefings(&self) -> Result<Vec<Briefing>> {
        self.repository.list_briefings().await
    }

    pub async fn briefing_posts(&self, briefing_id: i64, category: Option<String>) -> Result<Vec<Post>> {
        if self.repository.get_briefing(briefing_id).await?.is_none() {
            return Err(AppError::BriefingNotFound(briefing_id));
        }
        self.repository.posts_in_briefing(briefing_id, category).await
    }

    /// Manual override. The category must be one of the configured keys.
    pub async fn reclassify(&self, post_id: &str, category: &str) -> Result<()> {
        let categories = self.categories().await?;
        if !categories.iter().any(|c| c.key == category) {
            return Err(AppError::UnknownCategory(category.to_string()));
        }
        if !self.repository.reclassify(post_id, category).await? {
            return Err(AppError::PostNotFound(post_id.to_string()));
        }
        tracing::info!("Post {} reclassified as {}", post_id, category);
        Ok(())
    }

    /// Rebuilds the classification prompt from the stored category table and
    /// stores it, replacing any hand-edited prompt.
    pub async fn reset_classification_prompt(&self) -> Result<String> {
        let prompt = generate_classification_prompt(&self.categories().await?);
        self.repository
            .set_setting(settings::CLASSIFICATION_PROMPT, &prompt)
            .await?;
        tracing::info!("Classification prompt regenerated");
        Ok(prompt)
    }

    pub async fn get_setting(&self, key: &str) -> Result<Value> {
        self.repository
            .get_setting_value(key)
            .await?
            .ok_or_else(|| AppError::Config(format!("No setting named '{}'", key)))
    }

    pub async fn update_setting(&self, key: &str, value: Value) -> Result<()> {
        settings::validate(key, &value)?;
        self.repository.set_setting(key, &value).await?;
        if settings::is_schedule_key(key) {
            tracing::info!("Schedule setting {} changed; a running serve picks it up within a minute", key);
        }
        if key == settings::CATEGORIES {
            tracing::info!("Categories changed; run reset-prompt to regenerate the classification prompt");
        }
        Ok(())
    }

    async fn categories(&self) -> Result<Vec<CategoryDef>> {
        Ok(self
            .repository
            .get_setting(settings::CATEGORIES)
            .await?
            .unwrap_or_else(default_categories))
    }

    /// Runs the scheduled jobs until Ctrl-C, re-reading the schedule settings
    /// once a minute.
    pub async fn serve(&mut self) -> Result<()> {
        let schedule = ScheduleConfig::load(&self.repository).await?;
        self.scheduler.reschedule(&schedule)?;

        let mut check = tokio::time::interval(SCHEDULE_CHECK_INTERVAL);
        check.tick().await;

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    tracing::info!("Shutting down");
                    break;
                }
                _ = check.tick() => self.refresh_schedule().await,
            }
        }
        Ok(())
    }

    /// Reschedules when the stored schedule differs from the running one.
    async fn refresh_schedule(&mut self) {
        match ScheduleConfig::load(&self.repository).await {
            Ok(schedule) if self.scheduler.current() != Some(&schedule) => {
                if let Err(e) = self.scheduler.reschedule(&schedule) {
                    tracing::error!("Keeping previous schedule: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read schedule settings: {}", e),
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown();
        self.repository.close().await
    }
}

fn format_briefing(briefing: &Briefing) -> String {
    format!(
        "#{:<5} {}  {:>4} posts  {} .. {}",
        briefing.id,
        briefing.generated_at.format("%Y-%m-%d %H:%M"),
        briefing.post_count,
        briefing.period_start.format("%Y-%m-%d %H:%M"),
        briefing.period_end.format("%Y-%m-%d %H:%M")
    )
}
