//! Pipeline tunables kept in the settings store, decoded into typed form.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::ai::generate_classification_prompt;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{default_categories, CategoryDef, MustReadAccount};

pub const LIST_IDS: &str = "twitter_list_ids";
pub const MUST_READ_ACCOUNTS: &str = "must_read_accounts";
pub const BRIEFING_TIMES: &str = "briefing_times";
pub const BRIEFING_DAYS: &str = "briefing_days";
pub const BRIEFING_TIMEZONE: &str = "briefing_timezone";
pub const POLL_INTERVAL_MINUTES: &str = "poll_interval_minutes";
pub const CATEGORIES: &str = "categories";
pub const CLASSIFICATION_PROMPT: &str = "classification_prompt";
pub const GEMINI_MODEL: &str = "gemini_model";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const SCHEDULE_KEYS: [&str; 4] = [
    POLL_INTERVAL_MINUTES,
    BRIEFING_TIMES,
    BRIEFING_DAYS,
    BRIEFING_TIMEZONE,
];

/// Recurring-job configuration. Compared by value to detect changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub poll_interval_minutes: u64,
    pub briefing_times: Vec<String>,
    pub briefing_days: Vec<String>,
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 12,
            briefing_times: vec!["09:00".to_string(), "16:00".to_string()],
            briefing_days: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            timezone: "Europe/London".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub async fn load(repo: &Repository) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval_minutes: repo
                .get_setting(POLL_INTERVAL_MINUTES)
                .await?
                .unwrap_or(defaults.poll_interval_minutes),
            briefing_times: repo
                .get_setting(BRIEFING_TIMES)
                .await?
                .unwrap_or(defaults.briefing_times),
            briefing_days: repo
                .get_setting(BRIEFING_DAYS)
                .await?
                .unwrap_or(defaults.briefing_days),
            timezone: repo
                .get_setting(BRIEFING_TIMEZONE)
                .await?
                .unwrap_or(defaults.timezone),
        })
    }
}

/// Everything one poll-and-classify cycle reads from settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub list_ids: Vec<String>,
    pub must_read_accounts: Vec<MustReadAccount>,
    pub categories: Vec<CategoryDef>,
    pub classification_prompt: String,
    pub model: String,
}

impl PipelineSettings {
    pub async fn load(repo: &Repository) -> Result<Self> {
        let categories = repo
            .get_setting(CATEGORIES)
            .await?
            .unwrap_or_else(default_categories);
        let classification_prompt = match repo.get_setting::<String>(CLASSIFICATION_PROMPT).await? {
            Some(prompt) if !prompt.trim().is_empty() => prompt,
            _ => generate_classification_prompt(&categories),
        };
        let model = match repo.get_setting::<String>(GEMINI_MODEL).await? {
            Some(model) if !model.trim().is_empty() => model,
            _ => DEFAULT_MODEL.to_string(),
        };

        Ok(Self {
            list_ids: repo.get_setting(LIST_IDS).await?.unwrap_or_default(),
            must_read_accounts: repo.get_setting(MUST_READ_ACCOUNTS).await?.unwrap_or_default(),
            categories,
            classification_prompt,
            model,
        })
    }
}

pub fn default_settings() -> BTreeMap<String, Value> {
    let schedule = ScheduleConfig::default();
    let categories = default_categories();

    let mut defaults = BTreeMap::new();
    defaults.insert(LIST_IDS.to_string(), json!(["2026289137762898094"]));
    defaults.insert(MUST_READ_ACCOUNTS.to_string(), json!([]));
    defaults.insert(BRIEFING_TIMES.to_string(), json!(schedule.briefing_times));
    defaults.insert(BRIEFING_DAYS.to_string(), json!(schedule.briefing_days));
    defaults.insert(BRIEFING_TIMEZONE.to_string(), json!(schedule.timezone));
    defaults.insert(
        POLL_INTERVAL_MINUTES.to_string(),
        json!(schedule.poll_interval_minutes),
    );
    defaults.insert(
        CLASSIFICATION_PROMPT.to_string(),
        json!(generate_classification_prompt(&categories)),
    );
    defaults.insert(CATEGORIES.to_string(), json!(categories));
    defaults.insert(GEMINI_MODEL.to_string(), json!(DEFAULT_MODEL));
    defaults
}

pub fn is_schedule_key(key: &str) -> bool {
    SCHEDULE_KEYS.contains(&key)
}

fn check<T: DeserializeOwned>(key: &str, value: &Value) -> Result<()> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|source| AppError::Settings {
            key: key.to_string(),
            source,
        })
}

/// Rejects a value for a known key that would not decode into its type.
/// Unknown keys are accepted as-is.
pub fn validate(key: &str, value: &Value) -> Result<()> {
    match key {
        LIST_IDS | BRIEFING_TIMES | BRIEFING_DAYS => check::<Vec<String>>(key, value),
        MUST_READ_ACCOUNTS => check::<Vec<MustReadAccount>>(key, value),
        POLL_INTERVAL_MINUTES => check::<u64>(key, value),
        CATEGORIES => check::<Vec<CategoryDef>>(key, value),
        BRIEFING_TIMEZONE | CLASSIFICATION_PROMPT | GEMINI_MODEL => check::<String>(key, value),
        _ => Ok(()),
    }
}
