//! This module contains the interface to the constraint-solving oracle that
//! decides branch feasibility at divergence points.
//!
//! # The Oracle as an External Service
//!
//! The engine never inspects constraints itself; it treats the solver as an
//! opaque, synchronous decision service. There is at most one outstanding
//! feasibility query per divergence decision, and queries against a single
//! state's constraint set are never issued concurrently. Any implementation
//! that delegates to a worker pool must preserve that serialisation.

use std::{collections::HashMap, fmt::Debug, rc::Rc};

use uuid::Uuid;

use crate::state::constraints::{Constraint, PathConstraints, SymbolicCondition};

/// A dynamically dispatched [`FeasibilityOracle`] instance.
pub type DynOracle = Rc<dyn FeasibilityOracle>;

/// The interface to an object that can judge whether a branch constraint is
/// satisfiable under a state's accumulated path constraints.
pub trait FeasibilityOracle
where
    Self: Debug,
{
    /// Checks whether `candidate` is satisfiable in conjunction with
    /// `constraints`.
    #[must_use]
    fn is_feasible(&self, constraints: &PathConstraints, candidate: &Constraint) -> bool;

    /// Produces concrete bytes satisfying `constraints` for the value
    /// underlying `condition`, if the solver can construct one.
    ///
    /// This exists for test-case extraction by collaborators; the core
    /// engine never calls it.
    #[must_use]
    fn concrete_example(
        &self,
        _constraints: &PathConstraints,
        _condition: &SymbolicCondition,
    ) -> Option<Vec<u8>> {
        None
    }
}

/// An oracle that judges every branch feasible.
///
/// Exploration degrades gracefully under it: every divergence point becomes
/// a two-way fork, so it over-approximates the reachable paths. It is useful
/// when no solver is wired up and for exercising the engine in tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PermissiveOracle;

impl PermissiveOracle {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn FeasibilityOracle> {
        Rc::new(self)
    }
}

impl FeasibilityOracle for PermissiveOracle {
    fn is_feasible(&self, _constraints: &PathConstraints, _candidate: &Constraint) -> bool {
        true
    }
}

/// An oracle scripted with per-condition feasibility verdicts.
///
/// Conditions without an explicit rule are judged feasible on both branches.
/// This stands in for a real solver wherever the exact feasibility outcome
/// needs to be controlled, which makes it the workhorse of the engine's own
/// tests.
#[derive(Clone, Debug, Default)]
pub struct ScriptedOracle {
    /// Feasibility of the taken and not-taken branches, per condition
    /// identity.
    verdicts: HashMap<Uuid, (bool, bool)>,
}

impl ScriptedOracle {
    /// Constructs an oracle with no scripted rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the feasibility verdicts for `condition`: `taken` for the
    /// branch on which it holds and `not_taken` for the branch on which it
    /// does not.
    #[must_use]
    pub fn rule(mut self, condition: &SymbolicCondition, taken: bool, not_taken: bool) -> Self {
        self.verdicts.insert(condition.id(), (taken, not_taken));
        self
    }

    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn FeasibilityOracle> {
        Rc::new(self)
    }
}

impl FeasibilityOracle for ScriptedOracle {
    fn is_feasible(&self, _constraints: &PathConstraints, candidate: &Constraint) -> bool {
        let (taken, not_taken) = self
            .verdicts
            .get(&candidate.condition().id())
            .copied()
            .unwrap_or((true, true));

        if candidate.holds() {
            taken
        } else {
            not_taken
        }
    }
}
