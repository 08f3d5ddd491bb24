//! Deferred inference actions.
//!
//! Statement hooks cannot always act immediately: an `import` needs a module
//! another source has not announced yet, a `uses` needs a grouping defined
//! three files away. Instead of resolving eagerly they register an
//! [`InferenceAction`]: a unit of work gated on one or more
//! [`Prerequisite`]s, each naming a target context, a namespace binding (or
//! a phase milestone) and the phase by which it must be satisfiable.
//!
//! The action is an explicit state machine (`Pending → Applied | Failed`)
//! held in an [`ActionQueue`]. After every source walk and at each phase
//! barrier the queue re-scans pending actions *in registration order* (so
//! builds are deterministic) and fires those whose prerequisites all hold;
//! firing may enqueue further actions, so the scan loops to a fixpoint. At
//! the barrier, any pending action with a due, unsatisfied prerequisite is
//! failed; that is the moment a forward reference is proven to be a
//! dangling one, and the only moment a Reference error may be raised.
//!
//! An action still pending after the terminal phase is a scheduler
//! invariant violation: engine bug, always fatal.

use crate::context::{Arena, ContextId};
use crate::namespace::{NamespaceKey, NamespaceKind, Scope};
use crate::reactor::ModelBuild;
use crate::registry::ModelPhase;
use crate::{err_msg, YantraError};

/// What a prerequisite waits for.
#[derive(Debug, Clone)]
pub enum PrereqTarget {
    /// A namespace binding observable from `ctx`.
    NamespaceItem {
        ctx: ContextId,
        scope: Scope,
        kind: NamespaceKind,
        key: NamespaceKey,
    },
    /// `ctx` having reached a phase.
    PhaseReached { ctx: ContextId },
    /// Permission to mutate `ctx` once the named phase is underway.
    Mutation { ctx: ContextId },
}

/// A named, phase-gated condition an inference action waits on.
#[derive(Debug, Clone)]
pub struct Prerequisite {
    pub target: PrereqTarget,
    /// The phase by whose completion this prerequisite must be satisfiable;
    /// afterwards it is proven permanently unsatisfiable.
    pub phase: ModelPhase,
}

impl Prerequisite {
    fn satisfied(&self, arena: &Arena, current: ModelPhase) -> bool {
        match &self.target {
            PrereqTarget::NamespaceItem {
                ctx,
                scope,
                kind,
                key,
            } => arena.ns_get(*ctx, *scope, *kind, key).is_some(),
            PrereqTarget::PhaseReached { ctx } => arena.phase(*ctx) >= self.phase,
            PrereqTarget::Mutation { .. } => current >= self.phase,
        }
    }
}

impl std::fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            PrereqTarget::NamespaceItem { kind, key, .. } => {
                write!(f, "{kind:?} binding '{key}' by {}", self.phase)
            }
            PrereqTarget::PhaseReached { ctx } => {
                write!(f, "context #{ctx:?} reaching {}", self.phase)
            }
            PrereqTarget::Mutation { ctx } => {
                write!(f, "mutation of context #{ctx:?} in {}", self.phase)
            }
        }
    }
}

type ApplyFn = Box<dyn FnOnce(&mut ModelBuild) -> Result<(), YantraError>>;
type FailFn = Box<dyn FnOnce(&[Prerequisite]) -> YantraError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Pending,
    Applied,
    Failed,
}

/// One registered unit of deferred work.
struct InferenceAction {
    /// Earliest phase in which this action may fire.
    phase: ModelPhase,
    prereqs: Vec<Prerequisite>,
    apply: Option<ApplyFn>,
    on_failed: Option<FailFn>,
    state: ActionState,
}

impl std::fmt::Debug for InferenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceAction")
            .field("phase", &self.phase)
            .field("prereqs", &self.prereqs)
            .field("state", &self.state)
            .finish()
    }
}

/// Builder for one inference action.
#[must_use]
pub struct ActionBuilder {
    phase: ModelPhase,
    prereqs: Vec<Prerequisite>,
    apply: Option<ApplyFn>,
    on_failed: Option<FailFn>,
}

impl ActionBuilder {
    /// Starts an action that may fire once the build is in `phase`.
    pub fn new(phase: ModelPhase) -> Self {
        Self {
            phase,
            prereqs: Vec::new(),
            apply: None,
            on_failed: None,
        }
    }

    /// Requires a namespace binding, observable from `ctx`, to appear by
    /// the completion of `phase`.
    pub fn require_namespace_item(
        mut self,
        ctx: ContextId,
        scope: Scope,
        kind: NamespaceKind,
        key: NamespaceKey,
        phase: ModelPhase,
    ) -> Self {
        self.prereqs.push(Prerequisite {
            target: PrereqTarget::NamespaceItem {
                ctx,
                scope,
                kind,
                key,
            },
            phase,
        });
        self
    }

    /// Requires `ctx` to have reached `phase`.
    pub fn require_phase(mut self, ctx: ContextId, phase: ModelPhase) -> Self {
        self.prereqs.push(Prerequisite {
            target: PrereqTarget::PhaseReached { ctx },
            phase,
        });
        self
    }

    /// Declares intent to mutate `ctx` during `phase`.
    pub fn mutates(mut self, ctx: ContextId, phase: ModelPhase) -> Self {
        self.prereqs.push(Prerequisite {
            target: PrereqTarget::Mutation { ctx },
            phase,
        });
        self
    }

    /// The work to run once every prerequisite is satisfied. The closure
    /// captures [`ContextId`]s, never live references; ids stay valid for
    /// the whole build.
    pub fn apply(
        mut self,
        f: impl FnOnce(&mut ModelBuild) -> Result<(), YantraError> + 'static,
    ) -> Self {
        self.apply = Some(Box::new(f));
        self
    }

    /// The error to report when a prerequisite is proven unsatisfiable.
    pub fn on_failure(
        mut self,
        f: impl FnOnce(&[Prerequisite]) -> YantraError + 'static,
    ) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }

    /// Registers the action. Queue position fixes firing order within a
    /// phase.
    pub fn submit(self, queue: &mut ActionQueue) {
        queue.actions.push(InferenceAction {
            phase: self.phase,
            prereqs: self.prereqs,
            apply: self.apply,
            on_failed: self.on_failed,
            state: ActionState::Pending,
        });
    }
}

/// The scheduler's queue, in registration order.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Vec<InferenceAction>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_action(phase: ModelPhase) -> ActionBuilder {
        ActionBuilder::new(phase)
    }

    /// First pending action whose phase has arrived and whose prerequisites
    /// all hold.
    pub(crate) fn next_ready(&self, arena: &Arena, current: ModelPhase) -> Option<usize> {
        self.actions.iter().position(|action| {
            action.state == ActionState::Pending
                && action.phase <= current
                && action.prereqs.iter().all(|p| p.satisfied(arena, current))
        })
    }

    /// Marks `idx` applied and surrenders its work closure.
    pub(crate) fn take_apply(&mut self, idx: usize) -> ApplyFn {
        let action = &mut self.actions[idx];
        debug_assert_eq!(action.state, ActionState::Pending);
        action.state = ActionState::Applied;
        action
            .apply
            .take()
            .unwrap_or_else(|| Box::new(|_| Ok(())))
    }

    /// Phase barrier: fails the first pending action that has a due,
    /// unsatisfied prerequisite. `completed` is the phase that just ran to
    /// completion everywhere; at that point its bindings are final.
    pub(crate) fn fail_due(
        &mut self,
        arena: &Arena,
        completed: ModelPhase,
    ) -> Result<(), YantraError> {
        for action in &mut self.actions {
            if action.state != ActionState::Pending {
                continue;
            }
            let unsatisfied: Vec<Prerequisite> = action
                .prereqs
                .iter()
                .filter(|p| p.phase <= completed && !p.satisfied(arena, completed))
                .cloned()
                .collect();
            if unsatisfied.is_empty() {
                continue;
            }
            action.state = ActionState::Failed;
            let err = match action.on_failed.take() {
                Some(fail) => fail(&unsatisfied),
                None => err_msg!(
                    Reference,
                    "unresolved prerequisite: {}",
                    unsatisfied
                        .iter()
                        .map(Prerequisite::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            return Err(err);
        }
        Ok(())
    }

    /// Terminal-phase check: a pending action surviving the whole build
    /// means the scheduler itself misbehaved.
    pub(crate) fn assert_drained(&self) -> Result<(), YantraError> {
        let stuck = self
            .actions
            .iter()
            .filter(|a| a.state == ActionState::Pending)
            .count();
        if stuck > 0 {
            return Err(err_msg!(
                SchedulerInvariant,
                "{stuck} inference action(s) neither applied nor failed at end of build"
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
