//! This module contains the definition of [`ExecutionState`], the divergent
//! machine-and-constraint snapshots explored by the engine.

pub mod constraints;
pub mod snapshot;

use crate::{
    error::{container::Locatable, fork},
    oracle::FeasibilityOracle,
    state::{
        constraints::{Constraint, PathConstraints, SymbolicCondition},
        snapshot::{MachineSnapshot, RegisterId, SymbolicRegisters},
    },
};

/// The unique, monotonically allocated identifier of an execution state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StateId(u64);

impl StateId {
    /// Constructs a state identifier with the raw `value`.
    ///
    /// Identifiers for live states should come from a [`StateIdAllocator`];
    /// this constructor exists for collaborators that persist and replay
    /// identifiers.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Gets the raw value of this identifier.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The allocator for state identifiers.
///
/// Identifiers increase monotonically and are never reused, so an identifier
/// names one divergent future for the lifetime of an exploration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateIdAllocator {
    next: u64,
}

impl StateIdAllocator {
    /// Constructs an allocator whose first identifier is zero.
    #[must_use]
    pub fn new() -> Self {
        let next = 0;
        Self { next }
    }

    /// Allocates the next identifier.
    pub fn allocate(&mut self) -> StateId {
        let id = StateId(self.next);
        self.next += 1;
        id
    }

    /// Gets the number of identifiers allocated so far.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

/// One divergent machine-and-constraint snapshot.
///
/// Exactly one execution state is bound to the physical emulator at any
/// instant; every other live state is a fully materialized, inert snapshot
/// awaiting selection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionState {
    /// The unique identifier of this state.
    id: StateId,

    /// The private machine image of this state.
    snapshot: MachineSnapshot,

    /// The path constraints accumulated along this state's branch history.
    constraints: PathConstraints,

    /// The registers of this state currently holding symbolic values.
    symbolic: SymbolicRegisters,

    /// Whether this state was produced preemptively, pending a later
    /// decision on whether to explore it.
    speculative: bool,

    /// Whether this state has been marked for deletion but not yet reaped.
    zombie: bool,

    /// Whether this state was designated to continue as the main line after
    /// the most recent multi-way fork.
    carry_on: bool,

    /// Whether the fork coordinator may fork this state at divergence
    /// points.
    forking_enabled: bool,

    /// The number of run slices the emulator has advanced this state by.
    slices_run: u64,
}

impl ExecutionState {
    /// Constructs the root state of an exploration: a zeroed machine image
    /// with an empty constraint set.
    #[must_use]
    pub fn new_root(id: StateId, forking_enabled: bool) -> Self {
        let snapshot = MachineSnapshot::new();
        let constraints = PathConstraints::new();
        let symbolic = SymbolicRegisters::new();
        let speculative = false;
        let zombie = false;
        let carry_on = false;
        let slices_run = 0;

        Self {
            id,
            snapshot,
            constraints,
            symbolic,
            speculative,
            zombie,
            carry_on,
            forking_enabled,
            slices_run,
        }
    }

    /// Gets the identifier of this state.
    #[must_use]
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Gets the machine snapshot of this state.
    #[must_use]
    pub fn snapshot(&self) -> &MachineSnapshot {
        &self.snapshot
    }

    /// Gets the machine snapshot of this state for modification.
    #[must_use]
    pub fn snapshot_mut(&mut self) -> &mut MachineSnapshot {
        &mut self.snapshot
    }

    /// Gets the path constraints accumulated by this state.
    #[must_use]
    pub fn constraints(&self) -> &PathConstraints {
        &self.constraints
    }

    /// Forks this state on `condition` at the guest program counter
    /// `location`.
    ///
    /// The oracle is consulted for the feasibility of both branches. When
    /// both are feasible the result is two freshly identified children, each
    /// carrying the parent's snapshot plus the respective branch constraint;
    /// the parent is conceptually replaced and must not be scheduled again.
    /// When only one branch is feasible the result is a single successor that
    /// reuses the parent's identifier, so no identifier is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`fork::Error::InfeasiblePath`] if the oracle judges both
    /// branches infeasible, which is fatal to this state.
    pub fn fork(
        &self,
        location: u64,
        condition: &SymbolicCondition,
        oracle: &dyn FeasibilityOracle,
        ids: &mut StateIdAllocator,
    ) -> fork::Result<ForkOutcome> {
        let taken = Constraint::truth(*condition);
        let not_taken = Constraint::negation(*condition);
        let taken_feasible = oracle.is_feasible(&self.constraints, &taken);
        let not_taken_feasible = oracle.is_feasible(&self.constraints, &not_taken);

        match (taken_feasible, not_taken_feasible) {
            (true, true) => {
                let mut true_state = self.duplicate(ids.allocate());
                true_state.assert(taken);
                let mut false_state = self.duplicate(ids.allocate());
                false_state.assert(not_taken);

                Ok(ForkOutcome::Both {
                    true_state,
                    false_state,
                })
            }
            (true, false) => {
                let mut successor = self.duplicate(self.id);
                successor.assert(taken);
                Ok(ForkOutcome::Single(successor))
            }
            (false, true) => {
                let mut successor = self.duplicate(self.id);
                successor.assert(not_taken);
                Ok(ForkOutcome::Single(successor))
            }
            (false, false) => Err(fork::Error::InfeasiblePath.locate(location)),
        }
    }

    /// Deep-copies this state under the identifier `id`.
    ///
    /// The copy owns independent snapshot and constraint data. Its zombie
    /// and carry-on markers are reset; the speculative and forking flags are
    /// inherited.
    #[must_use]
    pub fn duplicate(&self, id: StateId) -> Self {
        let mut copy = self.clone();
        copy.id = id;
        copy.zombie = false;
        copy.carry_on = false;
        copy
    }

    /// Appends `constraint` to this state's path constraints.
    pub fn assert(&mut self, constraint: Constraint) {
        self.constraints.assert(constraint);
    }

    /// Allows the fork coordinator to fork this state at divergence points.
    pub fn enable_forking(&mut self) {
        self.forking_enabled = true;
    }

    /// Prevents the fork coordinator from forking this state; divergence
    /// points are then resolved concretely by the caller.
    pub fn disable_forking(&mut self) {
        self.forking_enabled = false;
    }

    /// Checks whether this state may be forked at divergence points.
    #[must_use]
    pub fn forking_enabled(&self) -> bool {
        self.forking_enabled
    }

    /// Writes `value` to `register`, updating the symbolic-register mask
    /// according to whether the value came from a `symbolic` source.
    pub fn write_register(&mut self, register: RegisterId, value: u64, symbolic: bool) {
        self.snapshot.write_register(register, value);
        if symbolic {
            self.symbolic.mark(register);
        } else {
            self.symbolic.clear(register);
        }
    }

    /// Marks `register` as holding a symbolic value.
    pub fn mark_symbolic(&mut self, register: RegisterId) {
        self.symbolic.mark(register);
    }

    /// Checks whether `register` currently holds a symbolic value.
    #[must_use]
    pub fn is_symbolic(&self, register: RegisterId) -> bool {
        self.symbolic.is_symbolic(register)
    }

    /// Gets the symbolic-register mask of this state.
    #[must_use]
    pub fn symbolic_registers(&self) -> &SymbolicRegisters {
        &self.symbolic
    }

    /// Checks whether this state was produced preemptively.
    #[must_use]
    pub fn is_speculative(&self) -> bool {
        self.speculative
    }

    /// Sets whether this state is speculative.
    pub fn set_speculative(&mut self, speculative: bool) {
        self.speculative = speculative;
    }

    /// Checks whether this state is marked for deletion but not yet reaped.
    #[must_use]
    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    /// Sets whether this state is a zombie.
    pub fn set_zombie(&mut self, zombie: bool) {
        self.zombie = zombie;
    }

    /// Checks whether this state was designated to continue as the main line
    /// after the most recent multi-way fork.
    #[must_use]
    pub fn is_carry_on(&self) -> bool {
        self.carry_on
    }

    /// Sets whether this state is the carry-on state.
    pub fn set_carry_on(&mut self, carry_on: bool) {
        self.carry_on = carry_on;
    }

    /// Records that the emulator has advanced this state by one run slice.
    pub fn note_slice(&mut self) {
        self.slices_run += 1;
    }

    /// Gets the number of run slices the emulator has advanced this state
    /// by.
    #[must_use]
    pub fn slices_run(&self) -> u64 {
        self.slices_run
    }
}

/// The result of forking an execution state on a condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkOutcome {
    /// Both branches were feasible; the parent is replaced by two freshly
    /// identified children.
    Both {
        /// The child on which the condition holds.
        true_state: ExecutionState,

        /// The child on which the condition does not hold.
        false_state: ExecutionState,
    },

    /// Only one branch was feasible; the successor reuses the parent's
    /// identifier and carries the lone feasible constraint.
    Single(ExecutionState),
}

#[cfg(test)]
mod test {
    use crate::{
        error::fork,
        oracle::{FeasibilityOracle, PermissiveOracle, ScriptedOracle},
        state::{
            constraints::SymbolicCondition,
            snapshot::RegisterId,
            ExecutionState,
            ForkOutcome,
            StateId,
            StateIdAllocator,
        },
    };

    fn root_with_allocator() -> (ExecutionState, StateIdAllocator) {
        let mut ids = StateIdAllocator::new();
        let root = ExecutionState::new_root(ids.allocate(), true);
        (root, ids)
    }

    #[test]
    fn two_feasible_branches_produce_exclusive_children() -> anyhow::Result<()> {
        let (root, mut ids) = root_with_allocator();
        let condition = SymbolicCondition::new(0x88);
        let outcome = root.fork(0x88, &condition, &PermissiveOracle, &mut ids)?;

        let ForkOutcome::Both {
            true_state,
            false_state,
        } = outcome
        else {
            panic!("both branches were feasible but a single successor was produced");
        };

        assert_ne!(true_state.id(), root.id());
        assert_ne!(false_state.id(), root.id());
        assert_ne!(true_state.id(), false_state.id());

        // Each child extends the parent by exactly one clause, and the two
        // added clauses are mutually exclusive.
        assert!(true_state.constraints().extends(root.constraints()));
        assert!(false_state.constraints().extends(root.constraints()));
        assert_eq!(true_state.constraints().len(), root.constraints().len() + 1);
        assert_eq!(false_state.constraints().len(), root.constraints().len() + 1);

        let added_true = true_state.constraints().clauses().last().unwrap();
        let added_false = false_state.constraints().clauses().last().unwrap();
        assert!(added_true.excludes(added_false));

        Ok(())
    }

    #[test]
    fn single_feasible_branch_reuses_the_parent_identifier() -> anyhow::Result<()> {
        let (root, mut ids) = root_with_allocator();
        let condition = SymbolicCondition::new(0x88);
        let oracle = ScriptedOracle::new().rule(&condition, true, false);

        let outcome = root.fork(0x88, &condition, &oracle, &mut ids)?;
        let ForkOutcome::Single(successor) = outcome else {
            panic!("only one branch was feasible but two successors were produced");
        };

        assert_eq!(successor.id(), root.id());
        assert_eq!(successor.constraints().len(), 1);
        assert!(successor.constraints().clauses()[0].holds());

        // No identifier was consumed for the lone successor.
        assert_eq!(ids.allocated(), 1);

        Ok(())
    }

    #[test]
    fn infeasible_divergence_is_fatal() {
        let (root, mut ids) = root_with_allocator();
        let condition = SymbolicCondition::new(0x88);
        let oracle = ScriptedOracle::new().rule(&condition, false, false);

        let error = root
            .fork(0x88, &condition, &oracle, &mut ids)
            .expect_err("an infeasible divergence produced a successor");

        assert_eq!(error.location, 0x88);
        assert_eq!(error.payload, fork::Error::InfeasiblePath);
    }

    #[test]
    fn register_writes_update_the_symbolic_mask() {
        let (mut root, _) = root_with_allocator();
        let register = RegisterId::new(7).unwrap();

        root.write_register(register, 42, true);
        assert!(root.is_symbolic(register));

        root.write_register(register, 42, false);
        assert!(!root.is_symbolic(register));
    }

    #[test]
    fn duplicates_are_independent() {
        let (mut root, mut ids) = root_with_allocator();
        root.set_carry_on(true);

        let copy = root.duplicate(ids.allocate());
        assert_ne!(copy.id(), root.id());
        assert!(!copy.is_carry_on());
        assert_eq!(copy.constraints(), root.constraints());
    }

    #[test]
    fn the_permissive_oracle_accepts_everything() {
        let (root, _) = root_with_allocator();
        let condition = SymbolicCondition::new(0);
        let constraint = crate::state::constraints::Constraint::truth(condition);

        assert!(PermissiveOracle.is_feasible(root.constraints(), &constraint));
    }
}
