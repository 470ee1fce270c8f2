//! The path-constraint representation carried by every execution state.
//!
//! The engine treats branch conditions as opaque: a condition is an identity
//! plus the guest location that produced it, and only the oracle can judge
//! what a condition means. What the engine does track precisely is the
//! accumulation of asserted constraints along each explored path.

use std::fmt::Formatter;

use uuid::Uuid;

/// An opaque symbolic boolean produced by the translation layer at a
/// divergence point.
///
/// Conditions are compared by identity. Two divergence points that happen to
/// express the same logical predicate are still distinct conditions here;
/// deciding logical equivalence is the oracle's job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SymbolicCondition {
    /// The identity of the condition.
    id: Uuid,

    /// The guest program counter at which the condition was produced.
    origin: u64,
}

impl SymbolicCondition {
    /// Constructs a new condition originating at the guest program counter
    /// `origin`.
    #[must_use]
    pub fn new(origin: u64) -> Self {
        let id = Uuid::new_v4();
        Self { id, origin }
    }

    /// Gets the identity of this condition.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Gets the guest program counter at which this condition was produced.
    #[must_use]
    pub fn origin(&self) -> u64 {
        self.origin
    }
}

impl std::fmt::Display for SymbolicCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let short = &self.id.as_simple().to_string()[..8];
        write!(f, "c{short}@{:#x}", self.origin)
    }
}

/// A single clause in a path-constraint set: a condition asserted to hold or
/// to not hold.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Constraint {
    /// The condition being constrained.
    condition: SymbolicCondition,

    /// Whether the condition is asserted to hold.
    holds: bool,
}

impl Constraint {
    /// Constructs a constraint asserting that `condition` holds.
    #[must_use]
    pub fn truth(condition: SymbolicCondition) -> Self {
        let holds = true;
        Self { condition, holds }
    }

    /// Constructs a constraint asserting that `condition` does not hold.
    #[must_use]
    pub fn negation(condition: SymbolicCondition) -> Self {
        let holds = false;
        Self { condition, holds }
    }

    /// Gets the condition being constrained.
    #[must_use]
    pub fn condition(&self) -> &SymbolicCondition {
        &self.condition
    }

    /// Checks whether the condition is asserted to hold.
    #[must_use]
    pub fn holds(&self) -> bool {
        self.holds
    }

    /// Gets the constraint asserting the opposite branch of the same
    /// condition.
    #[must_use]
    pub fn negated(&self) -> Self {
        let condition = self.condition;
        let holds = !self.holds;
        Self { condition, holds }
    }

    /// Checks whether `other` constrains the same condition to the opposite
    /// branch.
    #[must_use]
    pub fn excludes(&self, other: &Self) -> bool {
        self.condition == other.condition && self.holds != other.holds
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.holds {
            write!(f, "{}", self.condition)
        } else {
            write!(f, "!{}", self.condition)
        }
    }
}

/// The accumulated path constraints of one execution state.
///
/// Constraints are append-only: a clause asserted on a path is never
/// retracted. Constraint pruning, where it exists at all, is a concern of
/// the input-generation collaborators and operates on copies.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PathConstraints {
    clauses: Vec<Constraint>,
}

impl PathConstraints {
    /// Creates an empty constraint set, as carried by the root state.
    #[must_use]
    pub fn new() -> Self {
        let clauses = Vec::new();
        Self { clauses }
    }

    /// Appends `constraint` to the path.
    pub fn assert(&mut self, constraint: Constraint) {
        self.clauses.push(constraint);
    }

    /// Gets the clauses of this constraint set in the order they were
    /// asserted.
    #[must_use]
    pub fn clauses(&self) -> &[Constraint] {
        self.clauses.as_slice()
    }

    /// Gets the number of clauses in this constraint set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Checks if this constraint set contains no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Checks whether this constraint set extends `parent`, sharing its
    /// entire clause prefix.
    ///
    /// A child produced by a fork always extends its parent's constraint set
    /// at the fork point by exactly one clause.
    #[must_use]
    pub fn extends(&self, parent: &Self) -> bool {
        self.clauses.len() >= parent.clauses.len()
            && self.clauses[..parent.clauses.len()] == parent.clauses[..]
    }
}
