//! Parameter and result bindings.
//!
//! A binding is the array of value slots a prepared statement reads its
//! parameters from (or writes result columns into), plus a version counter.
//! Statements remember the version they last established their slots
//! against; any mismatch means the slot layout must be re-established
//! before the next execute.

use objmap_core::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Which column subset an image is being bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Every column, in select order
    Select,
    /// Columns written by the persist statement
    Insert,
    /// Columns written by the update statement (no id, readonly or managed)
    Update,
}

/// A slot array with a monotonically increasing layout version.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    slots: Vec<Value>,
    version: usize,
}

/// A binding shared between an image owner and the statements bound to it.
pub type SharedBinding = Rc<RefCell<Binding>>;

impl Binding {
    /// Create a binding with `count` NULL slots at version 0.
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![Value::Null; count],
            version: 0,
        }
    }

    /// Create a binding ready to be shared with statements.
    pub fn shared(count: usize) -> SharedBinding {
        Rc::new(RefCell::new(Self::new(count)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current layout version.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Signal that statements bound to this binding must re-establish their
    /// parameter slots.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Change the slot count. Always a layout change.
    pub fn resize(&mut self, count: usize) {
        self.slots.resize(count, Value::Null);
        self.bump_version();
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Mutable slot access. Writing values does not change the layout.
    pub fn slots_mut(&mut self) -> &mut [Value] {
        &mut self.slots
    }

    /// Reset every slot to NULL without touching the version.
    pub fn clear(&mut self) {
        self.slots.fill(Value::Null);
    }
}
