//! Acquire and release nodes on cron schedules.
//!
//! Parameters (from index 2):
//!
//! | index | meaning                                   |
//! |-------|-------------------------------------------|
//! | 2     | acquisition cron expression               |
//! | 3     | removal cron expression                   |
//! | 4     | preemptive removal                        |
//! | 5     | force deployment at activation            |

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PolicyError;
use crate::factory::PolicyRegistry;
use crate::policy::{
    CronExpression, NodeSourcePolicy, ParamReader, PolicyCore, PolicyParam, TickKind, ACCESS_PARAM_COUNT,
};

/// Registry name.
pub const NAME: &str = "CronPolicy";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronSettings {
    acquire: CronExpression,
    release: CronExpression,
    preemptive: bool,
    force_deployment: bool,
}

impl CronSettings {
    fn parse(params: &[PolicyParam]) -> Result<Self, PolicyError> {
        let reader = ParamReader::new(params);
        Ok(Self {
            acquire: CronExpression::parse(&reader.text(0, "acquisition cron")?)?,
            release: CronExpression::parse(&reader.text(1, "removal cron")?)?,
            preemptive: reader.flag(2, "preemptive")?,
            force_deployment: reader.flag(3, "force deployment")?,
        })
    }
}

/// Deploys all nodes when the acquisition cron fires and removes them when
/// the removal cron fires.
pub struct CronPolicy {
    core: PolicyCore,
    settings: Option<CronSettings>,
}

impl CronPolicy {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(NAME),
            settings: None,
        }
    }

    fn settings(&self) -> Result<&CronSettings, PolicyError> {
        self.settings
            .as_ref()
            .ok_or_else(|| PolicyError::config("cron policy is not configured"))
    }

    fn start_schedule(&mut self) -> Result<(), PolicyError> {
        let settings = self.settings()?.clone();
        let mailbox = self.core.mailbox()?.clone();

        let scheduler = self.core.scheduler_mut();
        scheduler.cron(&mailbox, TickKind::Acquire, &settings.acquire);
        scheduler.cron(&mailbox, TickKind::Release, &settings.release);

        debug!(
            policy = NAME,
            acquire = %settings.acquire.as_str(),
            release = %settings.release.as_str(),
            generation = scheduler.generation(),
            "Cron schedule started"
        );
        Ok(())
    }
}

impl Default for CronPolicy {
    fn default() -> Self {
        Self::new()
    }
}

pub fn register(registry: &mut PolicyRegistry) {
    registry.register(NAME, || Box::new(CronPolicy::new()));
}

#[async_trait]
impl NodeSourcePolicy for CronPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }

    fn description(&self) -> &'static str {
        "Acquires and removes nodes at specified times, given as cron expressions."
    }

    fn summary(&self) -> String {
        match &self.settings {
            Some(s) => format!(
                "{NAME} [acquisition: '{}', removal: '{}', preemptive: {}, force deployment: {}]",
                s.acquire.as_str(),
                s.release.as_str(),
                s.preemptive,
                s.force_deployment
            ),
            None => NAME.to_string(),
        }
    }

    fn configure_strategy(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        self.settings = Some(CronSettings::parse(params)?);
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), PolicyError> {
        self.start_schedule()?;

        if self.settings()?.force_deployment {
            info!(policy = NAME, "Forcing node deployment at activation");
            self.core.acquire_all_nodes()?;
        }
        Ok(())
    }

    async fn reconfigure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        let (user, provider) = PolicyCore::parse_access(params)?;
        let settings = CronSettings::parse(&params[ACCESS_PARAM_COUNT..])?;

        let cancelled = self.core.scheduler_mut().cancel();
        debug!(policy = NAME, cancelled, "Previous cron schedule stopped");

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
