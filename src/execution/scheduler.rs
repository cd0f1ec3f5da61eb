//! Time-based dispatch of units of work
//!
//! Times are local wall-clock (`NaiveDateTime`), matching how `scheduled_time`
//! is written in configuration.

use crate::core::config::ServiceSettings;
use crate::core::error::{Result, ServiceError};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// When a unit of work is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once a day at a wall-clock time
    Daily(NaiveTime),
    /// Every fixed interval, measured from the end of the previous run
    Interval(Duration),
}

impl Trigger {
    /// The trigger configured by `scheduled_time` or `interval`, if any
    pub fn from_settings(settings: &ServiceSettings) -> Result<Option<Trigger>> {
        settings.validate()?;
        if let Some(raw) = &settings.scheduled_time {
            return parse_time_of_day(raw).map(|t| Some(Trigger::Daily(t)));
        }
        Ok(settings.interval_duration()?.map(Trigger::Interval))
    }

    /// First due time strictly after `now`
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            Trigger::Daily(time) => {
                let today = now.date().and_time(*time);
                if today > now {
                    today
                } else {
                    today + TimeDelta::days(1)
                }
            }
            Trigger::Interval(interval) => TimeDelta::from_std(*interval)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(NaiveDateTime::MAX),
        }
    }
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| {
            ServiceError::config(
                "scheduled_time",
                format!("'{}' is not a time of day (expected HH:MM or HH:MM:SS)", raw),
            )
        })
}

/// How long to sleep before checking again
///
/// Half the remaining time, but never less than `resolution`.
pub fn sleep_interval(resolution: Duration, remaining: TimeDelta) -> Duration {
    let half = remaining
        .to_std()
        .map(|d| d.mul_f64(0.5))
        .unwrap_or(Duration::ZERO);
    half.max(resolution)
}

/// Source of time for the scheduler
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    async fn sleep(&self, duration: Duration);
}

/// Local wall clock with tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Scheduler bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    /// Due time of the next dispatch
    pub next_run: Option<NaiveDateTime>,
    /// Number of units of work dispatched
    pub dispatched: u64,
}

impl ScheduleState {
    /// Record the next due time; returns whether it changed
    pub fn observe(&mut self, next_run: NaiveDateTime) -> bool {
        let changed = self.next_run != Some(next_run);
        self.next_run = Some(next_run);
        changed
    }
}

/// Dispatches units of work on a [`Trigger`]
pub struct Scheduler<C> {
    trigger: Trigger,
    resolution: Duration,
    clock: C,
    state: ScheduleState,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(trigger: Trigger, resolution: Duration, clock: C) -> Self {
        Self {
            trigger,
            resolution,
            clock,
            state: ScheduleState::default(),
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Loop forever, returning only when a unit of work fails
    ///
    /// Each cycle runs the job if it is due, works out the next due time,
    /// logs it when it changed, and sleeps [`sleep_interval`].
    pub async fn run<F, Fut>(&mut self, mut job: F) -> Result<Infallible>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut next_run = self.trigger.next_after(self.clock.now());

        loop {
            if self.clock.now() >= next_run {
                info!("Dispatching scheduled run");
                self.state.dispatched += 1;
                job().await?;
                next_run = self.trigger.next_after(self.clock.now());
            }

            let interval = sleep_interval(self.resolution, next_run - self.clock.now());
            if self.state.observe(next_run) {
                info!(
                    "Next scheduled run at {} (checking every {:.1}s or sooner)",
                    next_run,
                    interval.as_secs_f64()
                );
            }
            self.clock.sleep(interval).await;
        }
    }
}
