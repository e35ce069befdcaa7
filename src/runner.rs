use tracing::debug;

use crate::config::UnitConfig;
use crate::engine::{HttpUnit, UnitSnapshot};
use crate::queue::ResultQueue;
use crate::state::CallState;

/// What a host run left behind once the unit was released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub call_state: CallState,
    pub queue: ResultQueue,
    pub steps: u64,
    pub suspends: u32,
    /// The host stopped stepping before the call budget was spent.
    pub aborted: bool,
}

/// Minimal host that drives a unit step by step.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitRunner;

impl UnitRunner {
    /// Initializes, steps until no work remains, then releases.
    pub fn run(config: UnitConfig) -> crate::Result<RunReport> {
        let mut unit = HttpUnit::initialize(config)?;
        drive(&mut unit, None)?;
        Ok(finish(unit, 0))
    }

    /// Stops after `steps_before_abort` steps even if calls remain.
    pub fn run_and_abort(config: UnitConfig, steps_before_abort: u64) -> crate::Result<RunReport> {
        let mut unit = HttpUnit::initialize(config)?;
        drive(&mut unit, Some(steps_before_abort))?;
        Ok(finish(unit, 0))
    }

    /// Every `suspend_after_steps` steps the unit is suspended, serialized to
    /// JSON, released and resumed into a fresh instance, at most
    /// `max_suspends` times.
    pub fn run_with_suspend_and_resume(
        config: UnitConfig,
        suspend_after_steps: u64,
        max_suspends: u32,
    ) -> crate::Result<RunReport> {
        let mut unit = HttpUnit::initialize(config.clone())?;
        let mut suspends = 0_u32;
        let mut steps = 0_u64;

        loop {
            let limit = (suspends < max_suspends && suspend_after_steps > 0)
                .then_some(suspend_after_steps);
            let more_work = drive(&mut unit, limit)?;
            steps += unit.steps();
            if !more_work || limit.is_none() {
                break;
            }

            unit.suspend();
            let json = unit.snapshot().to_json()?;
            unit.release();
            suspends += 1;
            debug!(suspends, completed = unit.call_state().calls_completed(), "unit suspended");

            unit = HttpUnit::resume(config.clone(), UnitSnapshot::from_json(&json)?)?;
        }

        let mut report = finish(unit, suspends);
        report.steps = steps;
        Ok(report)
    }
}

/// Steps until the unit runs out of work or `max_steps` is reached. Returns
/// whether work remains.
fn drive(unit: &mut HttpUnit, max_steps: Option<u64>) -> crate::Result<bool> {
    let mut taken = 0_u64;
    loop {
        if max_steps.is_some_and(|max_steps| taken >= max_steps) {
            return Ok(unit.call_state().has_more_work());
        }
        let report = unit.run_one_step()?;
        taken += 1;
        if !report.more_work {
            return Ok(false);
        }
    }
}

fn finish(unit: HttpUnit, suspends: u32) -> RunReport {
    let steps = unit.steps();
    let (call_state, queue) = unit.into_parts();
    RunReport {
        aborted: call_state.has_more_work(),
        call_state,
        queue,
        steps,
        suspends,
    }
}
