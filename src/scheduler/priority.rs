//! A seeded priority-class scheduling strategy.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Formatter,
    rc::Rc,
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    error::scheduling::{Error, Result},
    scheduler::{PoolUpdate, Scheduler},
    state::{ExecutionState, StateId},
};

/// The function that assigns a state to a priority class on entry.
pub type Classifier = Rc<dyn Fn(&ExecutionState) -> u64>;

/// A scheduler that groups states into priority classes and selects among
/// them at random.
///
/// Each selection draws a class uniformly at random among the non-empty
/// classes, then a member uniformly at random within it. Classes therefore
/// receive equal attention regardless of population, so a class with a
/// single rarely-reached state is selected as often as one with hundreds.
/// A state's class is assigned once, when it enters the scheduler.
///
/// The generator is seeded explicitly, making a whole exploration
/// reproducible from its seed.
pub struct PriorityClassScheduler {
    /// The function assigning states to classes.
    classifier: Classifier,

    /// The members of each non-empty class.
    classes: BTreeMap<u64, Vec<StateId>>,

    /// The class each tracked state was assigned to.
    class_of: HashMap<StateId, u64>,

    /// The seeded source of selection randomness.
    rng: StdRng,
}

impl PriorityClassScheduler {
    /// Constructs a scheduler that classifies states with `classifier` and
    /// draws selections from a generator seeded with `seed`.
    #[must_use]
    pub fn new(classifier: Classifier, seed: u64) -> Self {
        let classes = BTreeMap::new();
        let class_of = HashMap::new();
        let rng = StdRng::seed_from_u64(seed);

        Self {
            classifier,
            classes,
            class_of,
            rng,
        }
    }
}

impl Scheduler for PriorityClassScheduler {
    fn select_state(&mut self) -> Result<StateId> {
        if self.classes.is_empty() {
            return Err(Error::NoStatesAvailable);
        }
        let class_index = self.rng.gen_range(0..self.classes.len());
        let members = self
            .classes
            .values()
            .nth(class_index)
            .expect("the drawn index is within the class count");
        let member_index = self.rng.gen_range(0..members.len());

        Ok(members[member_index])
    }

    fn update(&mut self, update: &PoolUpdate) {
        for removed in update.removed {
            let Some(class) = self.class_of.remove(removed) else {
                continue;
            };
            let members = self
                .classes
                .get_mut(&class)
                .expect("every tracked state belongs to a populated class");
            members.retain(|id| id != removed);
            if members.is_empty() {
                self.classes.remove(&class);
            }
        }
        for added in update.added {
            let id = added.id();
            if self.class_of.contains_key(&id) {
                continue;
            }
            let class = (self.classifier)(added);
            self.class_of.insert(id, class);
            self.classes.entry(class).or_default().push(id);
        }
    }

    fn empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl std::fmt::Debug for PriorityClassScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityClassScheduler")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}
