//! Recurring jobs
//!
//! - `poll`: one poll-and-classify cycle every `poll_interval_minutes`
//! - `briefing_N`: briefing assembly at each configured time on the
//!   configured weekdays, evaluated in the configured timezone
//!
//! Rescheduling replaces the whole job set; two jobs with the same name
//! never run side by side.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{AppError, Result};
use crate::services::Pipeline;
use crate::settings::ScheduleConfig;

struct Job {
    name: String,
    handle: JoinHandle<()>,
}

/// Validated form of a `ScheduleConfig`.
struct SchedulePlan {
    poll_every: Duration,
    timezone: Tz,
    briefings: Vec<Schedule>,
}

impl SchedulePlan {
    fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let timezone: Tz = config.timezone.parse().map_err(|_| {
            AppError::Schedule(format!("Invalid timezone: {}", config.timezone))
        })?;

        let briefings = if config.briefing_days.is_empty() {
            Vec::new()
        } else {
            config
                .briefing_times
                .iter()
                .map(|time| parse_cron(&briefing_cron(time, &config.briefing_days)?))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            poll_every: Duration::from_secs(config.poll_interval_minutes.max(1) * 60),
            timezone,
            briefings,
        })
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    jobs: Vec<Job>,
    current: Option<ScheduleConfig>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            jobs: Vec::new(),
            current: None,
        }
    }

    /// Replaces every registered job with the ones `config` describes. An
    /// invalid config leaves the existing jobs untouched.
    pub fn reschedule(&mut self, config: &ScheduleConfig) -> Result<()> {
        let plan = SchedulePlan::from_config(config)?;

        self.shutdown();

        self.jobs.push(Job {
            name: "poll".to_string(),
            handle: spawn_poll_job(Arc::clone(&self.pipeline), plan.poll_every),
        });

        if plan.briefings.is_empty() {
            tracing::warn!("No briefing times or days configured; briefings only run on demand");
        }
        for (i, schedule) in plan.briefings.into_iter().enumerate() {
            let name = format!("briefing_{}", i);
            let handle = spawn_briefing_job(
                Arc::clone(&self.pipeline),
                name.clone(),
                schedule,
                plan.timezone,
            );
            self.jobs.push(Job { name, handle });
        }

        self.current = Some(config.clone());
        tracing::info!(
            "Scheduled jobs: {} (poll every {} min, timezone {})",
            self.job_names().join(", "),
            config.poll_interval_minutes.max(1),
            config.timezone
        );
        Ok(())
    }

    pub fn current(&self) -> Option<&ScheduleConfig> {
        self.current.as_ref()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.name.clone()).collect()
    }

    /// Aborts every job. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        for job in self.jobs.drain(..) {
            job.handle.abort();
        }
        self.current = None;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_poll_job(pipeline: Arc<Pipeline>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = pipeline.poll_and_classify().await {
                tracing::error!("Scheduled poll failed: {}", e);
            }
        }
    })
}

fn spawn_briefing_job(
    pipeline: Arc<Pipeline>,
    name: String,
    schedule: Schedule,
    timezone: Tz,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = Utc::now();
        loop {
            let Some(next) = next_run_after(&schedule, timezone, cursor) else {
                tracing::warn!("Job {} has no upcoming run; stopping", name);
                return;
            };
            tracing::debug!("Job {} next runs at {}", name, next);

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            if let Err(e) = pipeline.generate_briefing().await {
                tracing::error!("Scheduled briefing ({}) failed: {}", name, e);
            }
            cursor = resume_after(next, Utc::now());
        }
    })
}

/// Where to look for the run after one that fired at `fired`. Never earlier
/// than `fired`, so a wall clock behind the timer cannot repeat a run.
fn resume_after(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    fired.max(now)
}

/// Builds a 6-field cron expression (`sec min hour dom month dow`) for a
/// `HH:MM` time on the given weekdays (`mon`..`sun`).
pub fn briefing_cron(time: &str, days: &[String]) -> Result<String> {
    let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| AppError::Schedule(format!("Invalid briefing time '{}'", time)))?;

    let days = days
        .iter()
        .map(|day| weekday_name(day))
        .collect::<Result<Vec<_>>>()?;

    Ok(format!(
        "0 {} {} * * {}",
        parsed.minute(),
        parsed.hour(),
        days.join(",")
    ))
}

fn weekday_name(day: &str) -> Result<&'static str> {
    match day.trim().to_lowercase().as_str() {
        "mon" => Ok("Mon"),
        "tue" => Ok("Tue"),
        "wed" => Ok("Wed"),
        "thu" => Ok("Thu"),
        "fri" => Ok("Fri"),
        "sat" => Ok("Sat"),
        "sun" => Ok("Sun"),
        _ => Err(AppError::Schedule(format!("Invalid briefing day '{}'", day))),
    }
}

pub fn parse_cron(expr: &str) -> Result<Schedule> {
    expr.parse::<Schedule>()
        .map_err(|e| AppError::Schedule(format!("Invalid cron expression '{}': {}", expr, e)))
}

/// First scheduled instant strictly after `after`, in UTC.
pub fn next_run_after(schedule: &Schedule, timezone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Classifier;
    use crate::db::Repository;
    use crate::feed::FeedFetcher;
    use chrono::TimeZone;

    fn days(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    async fn scheduler() -> Scheduler {
        let repo = Repository::open_in_memory().await.unwrap();
        let pipeline = Pipeline::new(
            repo,
            FeedFetcher::new("http://127.0.0.1:9").unwrap(),
            Classifier::new(None),
            "unknown".to_string(),
        );
        Scheduler::new(Arc::new(pipeline))
    }

    #[test]
    fn builds_weekday_cron_expression() {
        let expr = briefing_cron("09:05", &days(&["mon", "TUE", "fri"])).unwrap();
        assert_eq!(expr, "0 5 9 * * Mon,Tue,Fri");
        assert!(parse_cron(&expr).is_ok());
    }

    #[test]
    fn rejects_bad_time_and_day() {
        assert!(briefing_cron("25:00", &days(&["mon"])).is_err());
        assert!(briefing_cron("nine", &days(&["mon"])).is_err());
        assert!(briefing_cron("09:00", &days(&["someday"])).is_err());
    }

    #[test]
    fn next_run_respects_timezone_and_weekdays() {
        let schedule = parse_cron(&briefing_cron("09:00", &days(&["mon", "wed"])).unwrap()).unwrap();
        let london: Tz = "Europe/London".parse().unwrap();

        // Winter: London is UTC+0. Monday 08:00 -> Monday 09:00.
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule, london, monday),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
        );

        // Saturday skips to Monday.
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule, london, saturday),
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap())
        );

        // Summer: 09:00 BST is 08:00 UTC. 2026-07-01 is a Wednesday.
        let summer = Utc.with_ymd_and_hms(2026, 7, 1, 7, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&schedule, london, summer),
            Some(Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn lagging_clock_does_not_repeat_a_run() {
        let schedule = parse_cron(&briefing_cron("09:00", &days(&["mon", "wed"])).unwrap()).unwrap();
        let london: Tz = "Europe/London".parse().unwrap();
        let fired = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let lagging_now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 58).unwrap();

        // From the lagging wall clock alone, the same instant would come up again.
        assert_eq!(next_run_after(&schedule, london, lagging_now), Some(fired));

        let cursor = resume_after(fired, lagging_now);
        assert_eq!(
            next_run_after(&schedule, london, cursor),
            Some(Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap())
        );

        // A clock that ran ahead (e.g. after suspend) skips missed instants.
        let late = Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(resume_after(fired, late), late);
    }

    #[tokio::test]
    async fn reschedule_replaces_all_jobs() {
        let mut scheduler = scheduler().await;

        scheduler.reschedule(&ScheduleConfig::default()).unwrap();
        assert_eq!(scheduler.job_names(), vec!["poll", "briefing_0", "briefing_1"]);

        let single = ScheduleConfig {
            briefing_times: vec!["07:30".to_string()],
            ..ScheduleConfig::default()
        };
        scheduler.reschedule(&single).unwrap();
        assert_eq!(scheduler.job_names(), vec!["poll", "briefing_0"]);
        assert_eq!(scheduler.current(), Some(&single));

        scheduler.shutdown();
        assert!(scheduler.job_names().is_empty());
        assert!(scheduler.current().is_none());
    }

    #[tokio::test]
    async fn invalid_config_keeps_previous_jobs() {
        let mut scheduler = scheduler().await;
        scheduler.reschedule(&ScheduleConfig::default()).unwrap();

        let bad_zone = ScheduleConfig {
            timezone: "Mars/Olympus".to_string(),
            ..ScheduleConfig::default()
        };
        assert!(scheduler.reschedule(&bad_zone).is_err());

        let bad_time = ScheduleConfig {
            briefing_times: vec!["9am".to_string()],
            ..ScheduleConfig::default()
        };
        assert!(scheduler.reschedule(&bad_time).is_err());

        assert_eq!(scheduler.job_names().len(), 3);
        assert_eq!(scheduler.current(), Some(&ScheduleConfig::default()));
    }

    #[tokio::test]
    async fn no_days_means_poll_only() {
        let mut scheduler = scheduler().await;
        let config = ScheduleConfig {
            briefing_days: vec![],
            ..ScheduleConfig::default()
        };
        scheduler.reschedule(&config).unwrap();
        assert_eq!(scheduler.job_names(), vec!["poll"]);
    }
}
