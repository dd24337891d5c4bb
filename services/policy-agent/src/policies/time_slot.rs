//! Acquire nodes for a time window, optionally repeated.
//!
//! Parameters (from index 2): acquire time, release time, period in
//! milliseconds (empty for a single window) and the preemptive flag. Times
//! use the `%Y-%m-%d %H:%M:%S %z` format, e.g. `2026-10-16 14:30:00 +0000`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use tracing::debug;

use crate::error::PolicyError;
use crate::factory::PolicyRegistry;
use crate::policy::{
    NodeSourcePolicy, ParamReader, PolicyCore, PolicyParam, TickKind, ACCESS_PARAM_COUNT, MAX_PERIOD_MILLIS,
};

/// Registry name.
pub const NAME: &str = "TimeSlotPolicy";

/// Format of the acquire and release times.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Next firing of a trigger anchored at `at` and repeating every `period`.
///
/// Returns the smallest `at + k * period` (k >= 0) not before `now`. Without
/// a period, or with a zero period, a time in the past fires at `now`.
/// `None` if that occurrence is outside the representable time range.
pub fn next_occurrence(at: DateTime<Utc>, period: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if at >= now {
        return Some(at);
    }

    let period_ms = match period {
        Some(period) if !period.is_zero() => i64::try_from(period.as_millis()).ok()?.max(1),
        _ => return Some(now),
    };

    let behind = now - at;
    let mut behind_ms = behind.num_milliseconds();
    if behind > TimeDelta::try_milliseconds(behind_ms)? {
        behind_ms += 1;
    }

    let steps = behind_ms / period_ms + i64::from(behind_ms % period_ms != 0);
    let offset = TimeDelta::try_milliseconds(steps.checked_mul(period_ms)?)?;
    at.checked_add_signed(offset)
}

fn parse_time(text: &str, name: &str) -> Result<DateTime<FixedOffset>, PolicyError> {
    DateTime::parse_from_str(text.trim(), TIME_FORMAT).map_err(|e| {
        PolicyError::config(format!(
            "cannot parse {name} '{text}' (expected format {TIME_FORMAT}): {e}"
        ))
    })
}

fn parse_period(text: &str) -> Result<Option<Duration>, PolicyError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match text.parse::<u64>() {
        Ok(ms) if ms <= MAX_PERIOD_MILLIS => Ok(Some(Duration::from_millis(ms))),
        _ => Err(PolicyError::config(format!(
            "invalid period '{text}', expected at most {MAX_PERIOD_MILLIS} milliseconds"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimeSlotSettings {
    acquire_at: DateTime<FixedOffset>,
    release_at: DateTime<FixedOffset>,
    period: Option<Duration>,
    preemptive: bool,
}

impl TimeSlotSettings {
    fn parse(params: &[PolicyParam]) -> Result<Self, PolicyError> {
        let reader = ParamReader::new(params);
        Ok(Self {
            acquire_at: parse_time(&reader.text(0, "acquire time")?, "acquire time")?,
            release_at: parse_time(&reader.text(1, "release time")?, "release time")?,
            period: parse_period(&reader.text(2, "period")?)?,
            preemptive: reader.flag(3, "preemptive")?,
        })
    }

    /// Repeat interval, if the slot repeats at all.
    fn repeat(&self) -> Option<Duration> {
        self.period.filter(|p| !p.is_zero())
    }
}

/// Deploys all nodes at the acquire time and removes them at the release
/// time, once or every period.
pub struct TimeSlotPolicy {
    core: PolicyCore,
    settings: Option<TimeSlotSettings>,
}

impl TimeSlotPolicy {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(NAME),
            settings: None,
        }
    }

    fn settings(&self) -> Result<&TimeSlotSettings, PolicyError> {
        self.settings
            .as_ref()
            .ok_or_else(|| PolicyError::config("time slot policy is not configured"))
    }

    fn start_schedule(&mut self) -> Result<(), PolicyError> {
        let settings = self.settings()?.clone();
        let mailbox = self.core.mailbox()?.clone();
        let now = Utc::now();

        let next = |at: DateTime<FixedOffset>| {
            next_occurrence(at.with_timezone(&Utc), settings.repeat(), now).ok_or_else(|| {
                PolicyError::config(format!("time slot starting {} cannot be scheduled", at.format(TIME_FORMAT)))
            })
        };
        let acquire = next(settings.acquire_at)?;
        let release = next(settings.release_at)?;

        let scheduler = self.core.scheduler_mut();
        match settings.repeat() {
            Some(period) => {
                scheduler.repeating(&mailbox, TickKind::Acquire, acquire, period)?;
                scheduler.repeating(&mailbox, TickKind::Release, release, period)?;
            }
            None => {
                scheduler.once(&mailbox, TickKind::Acquire, acquire);
                scheduler.once(&mailbox, TickKind::Release, release);
            }
        }

        debug!(
            policy = NAME,
            acquire = %acquire,
            release = %release,
            generation = scheduler.generation(),
            "Time slot scheduled"
        );
        Ok(())
    }
}

impl Default for TimeSlotPolicy {
    fn default() -> Self {
        Self::new()
    }
}

pub fn register(registry: &mut PolicyRegistry) {
    registry.register(NAME, || Box::new(TimeSlotPolicy::new()));
}

#[async_trait]
impl NodeSourcePolicy for TimeSlotPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }

    fn description(&self) -> &'static str {
        "Acquires nodes for a specified time window, optionally repeated periodically."
    }

    fn summary(&self) -> String {
        match &self.settings {
            Some(s) => {
                let period = match s.repeat() {
                    Some(p) => format!("every {} ms", p.as_millis()),
                    None => "once".to_string(),
                };
                format!(
                    "{NAME} [acquire: {}, release: {}, {period}, preemptive: {}]",
                    s.acquire_at.format(TIME_FORMAT),
                    s.release_at.format(TIME_FORMAT),
                    s.preemptive
                )
            }
            None => NAME.to_string(),
        }
    }

    fn configure_strategy(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        self.settings = Some(TimeSlotSettings::parse(params)?);
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), PolicyError> {
        self.start_schedule()
    }

    async fn reconfigure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        let (user, provider) = PolicyCore::parse_access(params)?;
        let settings = TimeSlotSettings::parse(&params[ACCESS_PARAM_COUNT..])?;

        self.core.scheduler_mut().cancel();
        self.settings = Some(settings);
        self.core.set_access(user, provider);
        self.start_schedule()
    }

    async fn on_tick(&mut self, tick: TickKind) -> Result<(), PolicyError> {
        match tick {
            TickKind::Acquire => self.core.acquire_all_nodes(),
            TickKind::Release => {
                let preemptive = self.settings()?.preemptive;
                self.core.remove_all_nodes(preemptive)
            }
            other => {
                debug!(policy = NAME, tick = ?other, "Ignoring unexpected tick");
                Ok(())
            }
        }
    }
}
