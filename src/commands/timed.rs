use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry, FlagKind};

#[derive(Debug, Clone, Copy)]
pub struct DurationUnit {
    pub suffix: char,
    pub seconds: i64,
    pub label: &'static str,
}

const SECONDS: DurationUnit = DurationUnit { suffix: 's', seconds: 1, label: "seconds" };
const MINUTES: DurationUnit = DurationUnit { suffix: 'm', seconds: 60, label: "minutes" };
const HOURS: DurationUnit = DurationUnit { suffix: 'h', seconds: 3600, label: "hours" };

/// Sets a timed gate (`meditate`, `wait`) from an `<integer><unit>` token.
pub struct TimedGateHandler {
    flag: FlagKind,
    activity: &'static str,
    units: &'static [DurationUnit],
    missing: &'static str,
    invalid: &'static str,
}

impl TimedGateHandler {
    pub fn meditate() -> Self {
        Self {
            flag: FlagKind::Meditating,
            activity: "meditate",
            units: &[MINUTES, HOURS],
            missing: "Meditate for how long? (e.g., meditate 10m)",
            invalid: "Invalid duration format. Use 'm' for minutes or 'h' for hours.",
        }
    }

    pub fn wait() -> Self {
        Self {
            flag: FlagKind::Waiting,
            activity: "wait",
            units: &[SECONDS, MINUTES],
            missing: "Wait for how long? (e.g., wait 15s, wait 5m)",
            invalid: "Invalid duration format. Use 's' for seconds or 'm' for minutes.",
        }
    }

    /// Parses `5m`-style tokens against this handler's unit set.
    pub fn parse(&self, token: &str) -> Option<(i64, DurationUnit)> {
        let suffix = token.chars().last()?;
        let digits = &token[..token.len() - suffix.len_utf8()];
        let value: i64 = digits.parse().ok().filter(|v| *v > 0)?;
        let unit = self
            .units
            .iter()
            .find(|u| u.suffix == suffix.to_ascii_lowercase())?;
        Some((value, *unit))
    }
}

#[async_trait]
impl CommandHandler for TimedGateHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let token = match split_args(&entry.command, 2).get(1) {
            Some(token) => token.to_string(),
            None => {
                entry.fail(self.missing);
                return Ok(());
            }
        };

        let (value, unit) = match self.parse(&token) {
            Some(parsed) => parsed,
            None => {
                entry.fail(self.invalid);
                return Ok(());
            }
        };

        let deadline = match value
            .checked_mul(unit.seconds)
            .and_then(Duration::try_seconds)
            .and_then(|span| ctx.now.checked_add_signed(span))
        {
            Some(deadline) => deadline,
            None => {
                entry.fail(self.invalid);
                return Ok(());
            }
        };
        agent.flags.set(self.flag, deadline);
        log::info!("{} will {} until {}", agent.name, self.activity, deadline.to_rfc3339());

        entry.complete(format!("You begin to {} for {} {}.", self.activity, value, unit.label));
        Ok(())
    }
}
