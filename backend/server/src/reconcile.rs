//! # Reconciliation
//!
//! Moves the daily visitor window into durable history and resets it.
//!
//! ## Jobs
//! - Snapshot, at the start of the day: count `unique_visitor` and append one history row dated
//!   yesterday (the reference time zone's date at run time, minus one day).
//! - Clear, shortly after: delete `unique_visitor` and `visitor_area`.
//!
//! Both fire on cron-style triggers evaluated in a fixed time zone, never the host's local time.
//! A run missed while the process is down is not made up.
//!
//! Snapshot writes at most one row per day, so running it twice is harmless. Clear first makes
//! sure yesterday's row exists (taking the snapshot itself if the snapshot job is late), and only
//! then deletes. A failed job is logged and waits for its next trigger.
use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{error, info};

use crate::{
    error::AppError,
    history::{UniqueView, VisitorHistory},
    keys::{UNIQUE_VISITOR, VISITOR_AREA},
    store::KeyValueStore,
};

/// A six-field cron expression (`sec min hour day month weekday`) that fires once a day.
///
/// Day, month and weekday must be wildcards (`*` or `?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronTrigger {
    second: u32,
    minute: u32,
    hour: u32,
}

impl CronTrigger {
    pub fn daily(hour: u32, minute: u32, second: u32) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(Self {
            second,
            minute,
            hour,
        })
    }

    /// First firing strictly after `now`, in `time_zone`. Skips days where the firing time does
    /// not exist locally.
    pub fn next_after(&self, now: DateTime<Utc>, time_zone: Tz) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&time_zone).date_naive();

        today.iter_days().take(3).find_map(|day| {
            let local = day.and_hms_opt(self.hour, self.minute, self.second)?;
            let fire = time_zone
                .from_local_datetime(&local)
                .earliest()?
                .with_timezone(&Utc);

            (fire > now).then_some(fire)
        })
    }
}

impl FromStr for CronTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [second, minute, hour, day, month, weekday] = fields[..] else {
            return Err(format!("Expected 6 cron fields, got {}", fields.len()));
        };

        let wildcard = |field: &str| field == "*" || field == "?";
        if !(wildcard(day) && wildcard(month) && wildcard(weekday)) {
            return Err(format!("Only daily cron expressions are supported: {s:?}"));
        }

        let number = |field: &str| {
            field
                .parse::<u32>()
                .map_err(|_| format!("Invalid cron field {field:?} in {s:?}"))
        };

        CronTrigger::daily(number(hour)?, number(minute)?, number(second)?)
            .ok_or_else(|| format!("Cron time out of range: {s:?}"))
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} * * ?", self.second, self.minute, self.hour)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub snapshot: CronTrigger,
    pub clear: CronTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Snapshot,
    Clear,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Job::Snapshot => "visitor snapshot",
            Job::Clear => "visitor clear",
        })
    }
}

pub struct Reconciler {
    store: Arc<dyn KeyValueStore>,
    history: Arc<dyn VisitorHistory>,
    time_zone: Tz,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        history: Arc<dyn VisitorHistory>,
        time_zone: Tz,
    ) -> Self {
        Self {
            store,
            history,
            time_zone,
        }
    }

    fn yesterday(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.with_timezone(&self.time_zone).date_naive();
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    }

    /// Append yesterday's unique visitor count unless a row for that day already exists.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<Option<UniqueView>, AppError> {
        let day = self.yesterday(now);
        let row = UniqueView {
            day,
            views_count: self.store.scard(UNIQUE_VISITOR).await?,
            recorded_at: now,
        };

        if !self.history.append_if_absent(row.clone()).await? {
            info!("Visitor snapshot for {day} already recorded");
            return Ok(None);
        }

        info!("Recorded {} unique visitors for {day}", row.views_count);

        Ok(Some(row))
    }

    /// Reset the visitor window once yesterday's snapshot is durable.
    pub async fn clear_at(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.snapshot_at(now).await?;

        self.store.del(UNIQUE_VISITOR).await?;
        self.store.del(VISITOR_AREA).await?;

        info!("Cleared visitor window");

        Ok(())
    }

    async fn run_once(&self, job: Job) -> Result<(), AppError> {
        match job {
            Job::Snapshot => self.snapshot_at(Utc::now()).await.map(|_| ()),
            Job::Clear => self.clear_at(Utc::now()).await,
        }
    }

    async fn run(
        self: Arc<Self>,
        job: Job,
        trigger: CronTrigger,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let now = Utc::now();
            let Some(next) = trigger.next_after(now, self.time_zone) else {
                error!("No upcoming firing for {job} ({trigger}), stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();

            info!("Next {job} at {}", next.with_timezone(&self.time_zone));

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("Stopping {job}");
                    return;
                }
            }

            if let Err(e) = self.run_once(job).await {
                error!("{job} failed, skipping this cycle: {e}");
            }
        }
    }

    /// Start both jobs; they run until `shutdown` changes or its sender is dropped.
    pub fn spawn(
        self: Arc<Self>,
        schedule: Schedule,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        [
            (Job::Snapshot, schedule.snapshot),
            (Job::Clear, schedule.clear),
        ]
        .into_iter()
        .map(|(job, trigger)| tokio::spawn(self.clone().run(job, trigger, shutdown.clone())))
        .collect()
    }
}
