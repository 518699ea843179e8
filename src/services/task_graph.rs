//! Phase graph and unit-of-work planning.
//!
//! A run is a small DAG of named phases. Each phase declares its
//! dependencies, what kind of work it does, and (for fan-out phases) a list
//! of unit templates. Planning a phase is a pure function of the context
//! record and the run configuration, so a resumed run plans the same task ids
//! as the original one.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ContextRecord, RunConfig, TaskId, TaskSpec, WorkerKind};

pub const CONTEXT_PHASE: &str = "context";
pub const ANALYSIS_PHASE: &str = "analysis";
pub const INVESTIGATION_PHASE: &str = "investigation";
pub const AGGREGATION_PHASE: &str = "aggregation";

/// Phases that can never be skipped.
pub const MANDATORY_PHASES: [&str; 2] = [CONTEXT_PHASE, AGGREGATION_PHASE];

/// How the orchestrator executes a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Produce the context record.
    Context,
    /// Plan all units up front, dispatch them in the background, wait.
    FanOut,
    /// Re-enter the phase one unit at a time until convergence.
    Iterative,
    /// Merge results into the final artifact.
    Aggregation,
}

/// Predicate that can remove a unit of work from a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Evidence mentions an external crash-reporting system.
    CrashReportReferenced,
    /// A forward-search boundary was configured.
    ForwardBoundarySet,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrashReportReferenced => "crash-report-referenced",
            Self::ForwardBoundarySet => "forward-boundary-set",
        }
    }

    pub fn admits(&self, ctx: &PlanningContext<'_>) -> bool {
        match self {
            Self::CrashReportReferenced => ctx.context.references_any(&ctx.run.crash_report_markers),
            Self::ForwardBoundarySet => ctx
                .run
                .forward_boundary
                .as_deref()
                .is_some_and(|b| !b.trim().is_empty()),
        }
    }
}

/// Whether a template yields one unit or one unit per context segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitScope {
    Whole,
    PerSegment,
}

/// Generator for the units of one worker kind within a phase.
#[derive(Debug, Clone)]
pub struct UnitTemplate {
    pub kind: WorkerKind,
    pub scope: UnitScope,
    pub gates: Vec<Gate>,
    pub instruction: String,
}

impl UnitTemplate {
    pub fn new(kind: WorkerKind, scope: UnitScope, instruction: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            gates: Vec::new(),
            instruction: instruction.into(),
        }
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gates.push(gate);
        self
    }
}

/// One named phase.
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub name: String,
    pub kind: PhaseKind,
    pub depends_on: Vec<String>,
    pub units: Vec<UnitTemplate>,
    /// Dispatch units in sequential batches of this size.
    pub batch_size: Option<usize>,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            units: Vec::new(),
            batch_size: None,
        }
    }

    pub fn after(mut self, phase: impl Into<String>) -> Self {
        self.depends_on.push(phase.into());
        self
    }

    pub fn with_unit(mut self, unit: UnitTemplate) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_batch_size(mut self, size: Option<usize>) -> Self {
        self.batch_size = size.filter(|s| *s > 0);
        self
    }

    pub fn is_reentrant(&self) -> bool {
        self.kind == PhaseKind::Iterative
    }
}

/// Inputs of unit planning.
#[derive(Debug, Clone, Copy)]
pub struct PlanningContext<'a> {
    pub context: &'a ContextRecord,
    pub run: &'a RunConfig,
}

/// Context gathering, fan-out analysis, aggregation.
pub fn review_pipeline() -> Vec<PhaseSpec> {
    vec![
        PhaseSpec::new(CONTEXT_PHASE, PhaseKind::Context),
        PhaseSpec::new(ANALYSIS_PHASE, PhaseKind::FanOut)
            .after(CONTEXT_PHASE)
            .with_unit(UnitTemplate::new(
                WorkerKind::ChangeAnalysis,
                UnitScope::PerSegment,
                "Analyze this change for defects; report each issue as a finding with a severity.",
            ))
            .with_unit(
                UnitTemplate::new(
                    WorkerKind::CrashReport,
                    UnitScope::Whole,
                    "Correlate the change with the referenced crash report.",
                )
                .gated(Gate::CrashReportReferenced),
            )
            .with_unit(
                UnitTemplate::new(
                    WorkerKind::HistorySearch,
                    UnitScope::Whole,
                    "Search history up to the forward boundary for follow-up fixes of this change.",
                )
                .gated(Gate::ForwardBoundarySet),
            ),
        PhaseSpec::new(AGGREGATION_PHASE, PhaseKind::Aggregation).after(ANALYSIS_PHASE),
    ]
}

/// Context gathering, iterative theory investigation, aggregation.
pub fn investigation() -> Vec<PhaseSpec> {
    vec![
        PhaseSpec::new(CONTEXT_PHASE, PhaseKind::Context),
        PhaseSpec::new(INVESTIGATION_PHASE, PhaseKind::Iterative).after(CONTEXT_PHASE),
        PhaseSpec::new(AGGREGATION_PHASE, PhaseKind::Aggregation).after(INVESTIGATION_PHASE),
    ]
}

/// Every name accepted in the skip set.
pub fn known_skip_names() -> BTreeSet<&'static str> {
    let mut names: BTreeSet<&'static str> = [
        CONTEXT_PHASE,
        ANALYSIS_PHASE,
        INVESTIGATION_PHASE,
        AGGREGATION_PHASE,
    ]
    .into_iter()
    .collect();
    names.extend(WorkerKind::ALL.iter().map(WorkerKind::as_str));
    names
}

/// Order phases so every phase follows its dependencies.
///
/// Ties keep declaration order. Unknown dependencies are `UnknownPhase`;
/// cycles are `DependencyCycle` with the offending path.
pub fn topological_order(phases: &[PhaseSpec]) -> DomainResult<Vec<&PhaseSpec>> {
    let index: HashMap<&str, usize> = phases
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; phases.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); phases.len()];
    for (i, phase) in phases.iter().enumerate() {
        for dep in &phase.depends_on {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| DomainError::UnknownPhase(dep.clone()))?;
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..phases.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(phases.len());
    while let Some(i) = ready.pop_front() {
        order.push(&phases[i]);
        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push_back(j);
            }
        }
    }

    if order.len() != phases.len() {
        return Err(DomainError::DependencyCycle(find_cycle(phases, &index, &in_degree)));
    }
    Ok(order)
}

/// Walk dependencies among the phases Kahn's algorithm could not place.
fn find_cycle(phases: &[PhaseSpec], index: &HashMap<&str, usize>, in_degree: &[usize]) -> Vec<String> {
    let Some(start) = (0..phases.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;
    loop {
        let next = phases[current]
            .depends_on
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .find(|&d| in_degree[d] > 0);
        let Some(next) = next else {
            break;
        };
        if !seen.insert(next) {
            let from = path.iter().position(|&p| p == next).unwrap_or(0);
            let mut cycle: Vec<String> = path[from..].iter().map(|&p| phases[p].name.clone()).collect();
            cycle.push(phases[next].name.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(|p| phases[p].name.clone()).collect()
}

/// Units of work of a fan-out phase, after skips and gates.
pub fn plan_units(phase: &PhaseSpec, ctx: &PlanningContext<'_>) -> Vec<TaskSpec> {
    if ctx.run.is_skipped(&phase.name) {
        tracing::info!(phase = %phase.name, "phase skipped");
        return Vec::new();
    }

    let mut specs = Vec::new();
    for template in &phase.units {
        if ctx.run.is_skipped(template.kind.as_str()) {
            tracing::info!(phase = %phase.name, kind = %template.kind, "worker kind skipped");
            continue;
        }
        if let Some(gate) = template.gates.iter().find(|g| !g.admits(ctx)) {
            tracing::debug!(phase = %phase.name, kind = %template.kind, gate = gate.as_str(), "unit gated out");
            continue;
        }

        let base = |id: TaskId| {
            let spec = TaskSpec::new(id, template.kind, phase.name.clone(), template.instruction.clone());
            match (&ctx.run.forward_boundary, template.kind) {
                (Some(boundary), WorkerKind::HistorySearch) => spec.with_boundary(boundary.clone()),
                _ => spec,
            }
        };

        match template.scope {
            UnitScope::PerSegment if !ctx.context.segments.is_empty() => {
                for segment in &ctx.context.segments {
                    let id = TaskId::sanitized(&[phase.name.as_str(), template.kind.as_str(), segment.id.as_str()]);
                    specs.push(base(id).with_segment(segment.id.clone()));
                }
            }
            UnitScope::PerSegment | UnitScope::Whole => {
                specs.push(base(TaskId::sanitized(&[phase.name.as_str(), template.kind.as_str()])));
            }
        }
    }
    specs
}
