use std::collections::HashSet;

use crate::migration::{Migration, MigrationPhase, MigrationState};

/// One scheduled unit of work: a migration's content for one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanEntry {
    /// Index into the pending list the plan was computed from.
    pub migration: usize,
    /// Which of the migration's content slots to execute.
    pub phase: MigrationPhase,
}

/// The scheduled decomposition of the pending list into the three deployment
/// sweeps. Deterministic given the pending list.
#[derive(Clone, Debug, Default)]
pub struct MigrationPlan {
    pre: Vec<PlanEntry>,
    core: Vec<PlanEntry>,
    post: Vec<PlanEntry>,
    is_core_required: bool,
    has_pre_content_in_core: bool,
    has_post_content_in_core: bool,
}

impl MigrationPlan {
    /// Entries executed during the given deployment sweep, in order.
    pub fn entries(&self, phase: MigrationPhase) -> &[PlanEntry] {
        match phase {
            MigrationPhase::Pre => &self.pre,
            MigrationPhase::Core => &self.core,
            MigrationPhase::Post => &self.post,
        }
    }

    pub fn is_empty(&self, phase: MigrationPhase) -> bool {
        self.entries(phase).is_empty()
    }

    /// True when disruptive content must run during the Core sweep, which
    /// requires the caller to assert an outage window.
    pub fn is_core_required(&self) -> bool {
        self.is_core_required
    }

    pub fn has_pre_content_in_core(&self) -> bool {
        self.has_pre_content_in_core
    }

    pub fn has_post_content_in_core(&self) -> bool {
        self.has_post_content_in_core
    }

    fn sweep_mut(&mut self, phase: MigrationPhase) -> &mut Vec<PlanEntry> {
        match phase {
            MigrationPhase::Pre => &mut self.pre,
            MigrationPhase::Core => &mut self.core,
            MigrationPhase::Post => &mut self.post,
        }
    }
}

/// Assemble the three-phase execution plan for a resolved pending list.
///
/// Content runs in the earliest sweep its dependencies allow: Pre content as
/// early as possible, Post content as late as possible, with both hoisted
/// into the Core window only where a cross-migration dependency forces the
/// target's Post to complete before the referrer's Pre may run. Each
/// migration's `planned_phase` markers are recorded on the pending list as a
/// side effect.
pub fn plan_migrations(pending: &mut [Migration]) -> MigrationPlan {
    Planner {
        pending,
        scheduled: HashSet::new(),
        plan: MigrationPlan::default(),
    }
    .build()
}

struct Planner<'a> {
    pending: &'a mut [Migration],
    scheduled: HashSet<(usize, MigrationPhase)>,
    plan: MigrationPlan,
}

impl Planner<'_> {
    fn build(mut self) -> MigrationPlan {
        self.schedule_pre();
        self.schedule_core();
        self.schedule_post();
        self.finish()
    }

    /// Pre sweep: everything up to the first migration whose dependencies
    /// are not yet satisfiable runs its Pre content early.
    fn schedule_pre(&mut self) {
        for index in 0..self.pending.len() {
            if self.unsatisfied_dependency(index).is_some() {
                break;
            }
            self.schedule(index, MigrationPhase::Pre, MigrationPhase::Pre);
        }
    }

    /// Core sweep: every migration's Core runs here; a blocking dependency
    /// first pulls the surrounding Post and Pre content into the window.
    fn schedule_core(&mut self) {
        for index in 0..self.pending.len() {
            if let Some(dependency) = self.unsatisfied_dependency(index) {
                self.satisfy(dependency);
            }
            self.schedule(index, MigrationPhase::Core, MigrationPhase::Core);
        }
    }

    /// Post sweep: whatever Post content the Core sweep did not hoist runs
    /// last.
    fn schedule_post(&mut self) {
        for index in 0..self.pending.len() {
            if !self.scheduled.contains(&(index, MigrationPhase::Post)) {
                self.schedule(index, MigrationPhase::Post, MigrationPhase::Post);
            }
        }
    }

    /// The latest declared dependency of `index` that is neither complete on
    /// the target nor scheduled to complete, walking declarations from last
    /// to first. Unresolved references are the validator's problem, not
    /// ours.
    fn unsatisfied_dependency(&self, index: usize) -> Option<usize> {
        for reference in self.pending[index].depends_on().iter().rev() {
            let Some(target) = reference.target() else {
                continue;
            };
            if self.pending[target].state() == MigrationState::AppliedPost {
                continue;
            }
            if self.scheduled.contains(&(target, MigrationPhase::Post)) {
                continue;
            }
            return Some(target);
        }
        None
    }

    /// Hoist the Post content of everything up to and including `dependency`
    /// into the Core window, then pull the following Pre content in behind
    /// it until another unsatisfied dependency stops the run.
    fn satisfy(&mut self, dependency: usize) {
        let mut before = true;
        for index in 0..self.pending.len() {
            if before {
                if !self.scheduled.contains(&(index, MigrationPhase::Post)) {
                    self.schedule(index, MigrationPhase::Post, MigrationPhase::Core);
                }
                if index == dependency {
                    before = false;
                }
            } else {
                if self.unsatisfied_dependency(index).is_some() {
                    break;
                }
                if !self.scheduled.contains(&(index, MigrationPhase::Pre)) {
                    self.schedule(index, MigrationPhase::Pre, MigrationPhase::Core);
                }
            }
        }
    }

    /// Record `(migration, phase)` as scheduled; append a plan entry and the
    /// planned-phase marker unless the target has already run that content.
    fn schedule(&mut self, index: usize, phase: MigrationPhase, sweep: MigrationPhase) {
        self.scheduled.insert((index, phase));
        if self.pending[index].state().covers(phase) {
            return;
        }
        self.plan.sweep_mut(sweep).push(PlanEntry {
            migration: index,
            phase,
        });
        self.pending[index].content_mut(phase).set_planned_phase(sweep);
    }

    fn finish(self) -> MigrationPlan {
        let Planner { pending, mut plan, .. } = self;
        plan.is_core_required = plan
            .core
            .iter()
            .any(|entry| pending[entry.migration].content(entry.phase).is_required());
        plan.has_pre_content_in_core = plan
            .core
            .iter()
            .any(|entry| entry.phase == MigrationPhase::Pre);
        plan.has_post_content_in_core = plan
            .core
            .iter()
            .any(|entry| entry.phase == MigrationPhase::Post);
        plan
    }
}
