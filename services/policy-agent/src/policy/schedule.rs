//! Policy-owned timers.
//!
//! A `Scheduler` spawns one tokio task per trigger. Tasks never touch policy
//! state; each firing is posted to the policy mailbox as a `ScheduledTick`
//! stamped with the scheduler generation it was created under.
//!
//! `cancel` aborts every trigger task and bumps the generation, so a tick
//! already queued when the schedule changed is recognized as stale and
//! dropped by the actor.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use super::PolicyMessage;
use crate::actors::ActorHandle;
use crate::error::PolicyError;

/// What a timer firing asks the policy to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    /// Acquire nodes.
    Acquire,
    /// Release nodes.
    Release,
    /// Periodic node health check.
    HealthCheck,
    /// Replace nodes whose removal has been confirmed.
    ReplaceRemoved { confirmed: usize },
}

impl TickKind {
    /// Completions of work already started stay valid across a reschedule.
    pub fn survives_reschedule(&self) -> bool {
        matches!(self, TickKind::ReplaceRemoved { .. })
    }
}

/// A tick as delivered to the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub generation: u64,
    pub kind: TickKind,
}

/// Introspection record for an installed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub kind: TickKind,

    /// Next firing, if any is left.
    pub next_fire: Option<DateTime<Utc>>,

    /// Fixed-rate period in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_ms: Option<u64>,

    /// Cron expression driving the trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

/// A parsed cron expression.
///
/// Accepts the classic five-field form (minute granularity) as well as the
/// six and seven field forms with seconds and year.
#[derive(Debug, Clone)]
pub struct CronExpression {
    text: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    /// Parse `text`; five-field expressions fire at second zero.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let text = text.trim();
        let normalized = match text.split_whitespace().count() {
            5 => format!("0 {text}"),
            _ => text.to_string(),
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| PolicyError::config(format!("invalid cron expression '{text}': {e}")))?;

        Ok(Self {
            text: text.to_string(),
            schedule,
        })
    }

    /// The expression as given.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CronExpression {}

/// Timer tasks for one policy.
#[derive(Debug, Default)]
pub struct Scheduler {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    completions: Vec<JoinHandle<()>>,
    triggers: Vec<TriggerInfo>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if `tick` was produced under the current generation, or is a
    /// completion that outlives reschedules.
    pub fn is_current(&self, tick: &ScheduledTick) -> bool {
        tick.generation == self.generation || tick.kind.survives_reschedule()
    }

    /// Installed triggers.
    pub fn triggers(&self) -> &[TriggerInfo] {
        &self.triggers
    }

    /// Fire `kind` once at `at`. A time in the past fires immediately.
    pub fn once(&mut self, mailbox: &ActorHandle<PolicyMessage>, kind: TickKind, at: DateTime<Utc>) {
        let tick = self.tick(kind);
        let mailbox = mailbox.clone();
        let delay = delay_until(at);

        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            deliver(&mailbox, tick).await;
        }));
        self.triggers.push(TriggerInfo {
            kind,
            next_fire: Some(at),
            repeat_ms: None,
            cron: None,
        });
    }

    /// Fire `kind` at `first`, then every `period` at a fixed rate.
    ///
    /// Fails without installing anything if `first` lies beyond what the
    /// runtime clock can represent.
    pub fn repeating(
        &mut self,
        mailbox: &ActorHandle<PolicyMessage>,
        kind: TickKind,
        first: DateTime<Utc>,
        period: Duration,
    ) -> Result<(), PolicyError> {
        if period.is_zero() {
            self.once(mailbox, kind, first);
            return Ok(());
        }

        let start = tokio::time::Instant::now()
            .checked_add(delay_until(first))
            .ok_or_else(|| PolicyError::config(format!("first firing at {first} is too far in the future")))?;
        let tick = self.tick(kind);
        let mailbox = mailbox.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if !deliver(&mailbox, tick).await {
                    break;
                }
            }
        }));
        self.triggers.push(TriggerInfo {
            kind,
            next_fire: Some(first),
            repeat_ms: u64::try_from(period.as_millis()).ok(),
            cron: None,
        });
        Ok(())
    }

    /// Fire `kind` at every match of `expression`.
    pub fn cron(&mut self, mailbox: &ActorHandle<PolicyMessage>, kind: TickKind, expression: &CronExpression) {
        let tick = self.tick(kind);
        let mailbox = mailbox.clone();
        let schedule = expression.clone();
        let next_fire = expression.next_after(&Utc::now());

        self.tasks.push(tokio::spawn(async move {
            let mut cursor = Utc::now();
            while let Some(next) = schedule.next_after(&cursor) {
                tokio::time::sleep(delay_until(next)).await;
                cursor = next;
                if !deliver(&mailbox, tick).await {
                    return;
                }
            }
            debug!(cron = %schedule.as_str(), "Cron schedule has no further firings");
        }));
        self.triggers.push(TriggerInfo {
            kind,
            next_fire,
            repeat_ms: None,
            cron: Some(expression.as_str().to_string()),
        });
    }

    /// Run `work` off the mailbox and post the tick it yields.
    ///
    /// `cancel` leaves these tasks running; they end with the scheduler.
    pub fn after<F>(&mut self, mailbox: &ActorHandle<PolicyMessage>, work: F)
    where
        F: Future<Output = TickKind> + Send + 'static,
    {
        self.completions.retain(|task| !task.is_finished());

        let generation = self.generation;
        let mailbox = mailbox.clone();
        self.completions.push(tokio::spawn(async move {
            let kind = work.await;
            deliver(&mailbox, ScheduledTick { generation, kind }).await;
        }));
    }

    /// Stop every trigger. Returns the number of aborted tasks.
    ///
    /// Takes effect immediately: no tick from the previous generation is
    /// acted on once this returns.
    pub fn cancel(&mut self) -> usize {
        let cancelled = self.tasks.len();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.triggers.clear();
        self.generation += 1;
        cancelled
    }

    fn tick(&self, kind: TickKind) -> ScheduledTick {
        ScheduledTick {
            generation: self.generation,
            kind,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in self.tasks.iter().chain(&self.completions) {
            task.abort();
        }
    }
}

/// Time left until `at`, zero if it already passed.
fn delay_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Post a tick. Returns false once the mailbox is gone.
async fn deliver(mailbox: &ActorHandle<PolicyMessage>, tick: ScheduledTick) -> bool {
    match mailbox.send(PolicyMessage::Tick(tick)).await {
        Ok(()) => true,
        Err(_) => {
            debug!(actor_id = %mailbox.actor_id(), ?tick, "Policy mailbox closed, dropping tick");
            false
        }
    }
}
