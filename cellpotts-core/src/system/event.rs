use super::System;
use crate::*;
use cellpotts_concepts::*;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// When the condition of an [EventSystem] fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTrigger {
    /// Once whenever the condition becomes nonzero after a value which was not positive
    #[default]
    OnChange,
    /// On every execution while the condition is nonzero. Ignores the delay.
    WhenTrue,
}

/// When the assignments of a delayed event are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventComputeTime {
    /// Computed when the condition fires and assigned after the delay
    #[default]
    OnTrigger,
    /// Computed and assigned after the delay
    OnExecution,
}

/// Everything needed to build an [EventSystem].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDescription {
    /// Fires when nonzero
    pub condition: String,
    /// Edge or level triggering
    #[serde(default)]
    pub trigger: EventTrigger,
    /// Time between firing and assignment
    #[serde(default)]
    pub delay: f64,
    /// Whether delayed assignments use the values at firing time
    #[serde(default)]
    pub compute_time: EventComputeTime,
    /// Rules, intermediates and functions executed when the event fires
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    /// Seed of the random functions
    #[serde(default)]
    pub seed: u64,
}

#[derive(Clone, Debug)]
struct DelayedAssignment {
    time: f64,
    focus: SymbolFocus,
    values: Option<Vec<f64>>,
}

fn holds(value: f64) -> bool {
    value != 0.0
}

/// Assignments executed at every focus where a condition fires.
///
/// The assignments form a triggered [System] of rules. With a positive delay, an
/// [EventTrigger::OnChange] event schedules the assignment for `time + delay`. Scheduled
/// assignments are executed by the first call to [EventSystem::execute] at or after their
/// time. [EventTrigger::WhenTrue] events always assign immediately.
#[derive(Debug)]
pub struct EventSystem {
    system: System,
    condition: Expression,
    condition_cache: EvaluatorCache,
    granularity: Granularity,
    trigger: EventTrigger,
    delay: f64,
    compute_time: EventComputeTime,
    history: BTreeMap<SymbolFocus, f64>,
    scheduled: Vec<DelayedAssignment>,
}

impl EventSystem {
    /// Compile an event against the symbols of `scope`.
    pub fn new(description: &EventDescription, scope: &dyn Scope) -> Result<Self, ConfigError> {
        if let Some(d) = description
            .declarations
            .iter()
            .find(|d| matches!(d, Declaration::DiffEqn { .. } | Declaration::VectorDiffEqn { .. }))
        {
            return Err(ConfigError(format!(
                "events can not integrate the differential equation for \"{}\"",
                d.symbol()
            )));
        }
        if !(description.delay >= 0.0) {
            return Err(ConfigError(format!(
                "invalid event delay {}",
                description.delay
            )));
        }
        let mut condition_cache = EvaluatorCache::new(description.seed);
        let condition = Expression::compile(
            &description.condition,
            &mut condition_cache,
            scope,
            &FunctionTable::new(),
        )?;
        let condition_granularity = condition_cache
            .externals()
            .map(|info| info.granularity)
            .fold(Granularity::Global, Granularity::max);
        let system = System::with_granularity(
            &SystemDescription {
                kind: SystemKind::Triggered,
                solver: SolverSpec::new(SolverMethod::Discrete, 0.0),
                declarations: description.declarations.clone(),
                seed: description.seed,
            },
            scope,
            condition_granularity,
        )?;
        let granularity = system.target_granularity();
        Ok(Self {
            system,
            condition,
            condition_cache,
            granularity,
            trigger: description.trigger,
            delay: description.delay,
            compute_time: description.compute_time,
            history: BTreeMap::new(),
            scheduled: Vec::new(),
        })
    }

    /// The assignments.
    pub fn system(&self) -> &System {
        &self.system
    }

    /// Granularity at which the condition is tested.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Number of scheduled assignments.
    pub fn scheduled(&self) -> usize {
        self.scheduled.len()
    }

    fn schedule(&mut self, assignment: DelayedAssignment) {
        let index = self
            .scheduled
            .partition_point(|a| a.time <= assignment.time);
        self.scheduled.insert(index, assignment);
    }

    /// Test the condition at every focus and execute all due assignments.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn execute<S: ScopeMut>(&mut self, scope: &mut S) -> Result<(), SystemError> {
        let time = scope.time();
        let foci = scope.foci(self.granularity);
        for focus in foci.iter() {
            self.condition_cache.fetch(&*scope, focus)?;
            let value = self.condition.eval(&mut self.condition_cache);
            if self.trigger == EventTrigger::WhenTrue {
                if holds(value) {
                    self.system.compute(scope, focus)?;
                }
                continue;
            }
            let previous = self.history.insert(*focus, value);
            if !holds(value) || previous.is_some_and(|p| p > 0.0) {
                continue;
            }
            if self.delay > 0.0 {
                let values = match self.compute_time {
                    EventComputeTime::OnTrigger => {
                        let mut values = Vec::new();
                        self.system.compute_to_target(&*scope, focus, &mut values)?;
                        Some(values)
                    }
                    EventComputeTime::OnExecution => None,
                };
                self.schedule(DelayedAssignment {
                    time: time + self.delay,
                    focus: *focus,
                    values,
                });
            } else {
                self.system.compute(scope, focus)?;
            }
        }

        // Absorb rounding of the accumulated simulation time
        let horizon = time + 1e-12 * time.abs().max(1.0);
        let due = self.scheduled.partition_point(|a| a.time <= horizon);
        let present: BTreeSet<SymbolFocus> = foci.into_iter().collect();
        let assignments: Vec<_> = self.scheduled.drain(..due).collect();
        for assignment in assignments {
            // The focus may have disappeared in the meantime
            if !present.contains(&assignment.focus) {
                continue;
            }
            match assignment.values {
                Some(values) => self
                    .system
                    .apply_ext_buffer(scope, &assignment.focus, &values)?,
                None => self.system.compute(scope, &assignment.focus)?,
            }
        }
        Ok(())
    }
}
