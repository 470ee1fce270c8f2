//! The materialized machine snapshot owned by each execution state.
//!
//! Every state that is not bound to the physical emulator holds its machine
//! image here, fully materialized and inert. The translation layer copies
//! the snapshot into the physical register file when a state is selected and
//! copies it back out at the next suspension point.

use std::collections::BTreeMap;

use crate::constant::GUEST_REGISTER_COUNT;

/// An identifier for one slot in the guest register file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RegisterId(u8);

impl RegisterId {
    /// Constructs a register identifier for the slot at `index`.
    ///
    /// Returns [`None`] if `index` is not below
    /// [`GUEST_REGISTER_COUNT`].
    #[must_use]
    pub fn new(index: u8) -> Option<Self> {
        (index < GUEST_REGISTER_COUNT).then_some(Self(index))
    }

    /// Gets the slot index of this register.
    #[must_use]
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A deep-copyable image of the guest machine: the register file and a
/// sparse byte-addressed memory.
///
/// Memory is sparse because forked states share almost all of their image
/// with their siblings in practice; only the bytes a path actually touches
/// are materialized.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineSnapshot {
    /// The guest general-purpose register file.
    registers: Vec<u64>,

    /// The bytes of guest memory this path has written.
    memory: BTreeMap<u64, u8>,
}

impl MachineSnapshot {
    /// Constructs a zeroed snapshot.
    #[must_use]
    pub fn new() -> Self {
        let registers = vec![0; GUEST_REGISTER_COUNT as usize];
        let memory = BTreeMap::new();
        Self { registers, memory }
    }

    /// Reads the value of `register`.
    #[must_use]
    pub fn read_register(&self, register: RegisterId) -> u64 {
        self.registers[register.index() as usize]
    }

    /// Writes `value` to `register`.
    pub fn write_register(&mut self, register: RegisterId, value: u64) {
        self.registers[register.index() as usize] = value;
    }

    /// Reads the byte at `address`, or zero if this path has never written
    /// it.
    #[must_use]
    pub fn read_byte(&self, address: u64) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    /// Writes `value` to the byte at `address`.
    pub fn write_byte(&mut self, address: u64, value: u8) {
        self.memory.insert(address, value);
    }

    /// Writes `bytes` starting at `address`.
    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            self.memory.insert(address + offset as u64, *byte);
        }
    }

    /// Gets the number of memory bytes this path has materialized.
    #[must_use]
    pub fn touched_bytes(&self) -> usize {
        self.memory.len()
    }
}

/// The bitmask tracking which guest registers currently hold unconstrained
/// symbolic values.
///
/// The mask is updated on every register write: a write from a symbolic
/// source sets the bit, a write from a concrete source clears it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SymbolicRegisters {
    mask: u64,
}

impl SymbolicRegisters {
    /// Constructs a mask in which every register is concrete.
    #[must_use]
    pub fn new() -> Self {
        let mask = 0;
        Self { mask }
    }

    /// Marks `register` as holding a symbolic value.
    pub fn mark(&mut self, register: RegisterId) {
        self.mask |= 1 << register.index();
    }

    /// Marks `register` as holding a concrete value.
    pub fn clear(&mut self, register: RegisterId) {
        self.mask &= !(1 << register.index());
    }

    /// Checks whether `register` holds a symbolic value.
    #[must_use]
    pub fn is_symbolic(&self, register: RegisterId) -> bool {
        self.mask & (1 << register.index()) != 0
    }

    /// Gets the number of registers currently holding symbolic values.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Gets the raw mask.
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.mask
    }
}
