//! This module provides [QuorumSet], a capped set that reports the exact moment it fills up.

use crate::ProcessorId;
use std::collections::BTreeSet;

/// An insert-only set of processors with a target cardinality.
///
/// Protocol stages that act exactly once upon reaching a quorum (broadcasting a set, emitting a
/// completion message) accumulate members here: the set refuses growth past its target and
/// [`insert`][QuorumSet::insert] tells the caller whether this insertion was the filling one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuorumSet {
    members: BTreeSet<ProcessorId>,
    target: usize,
}

/// The effect of inserting into a [QuorumSet].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumInsert {
    /// The member was added without reaching the target.
    Added,

    /// The member was added and the set is now exactly full.
    JustFilled,

    /// The set was already full; the member was not added.
    AlreadyFull,

    /// The member was already present.
    Duplicate,
}

impl QuorumSet {
    /// Constructs a set that fills at the given target cardinality.
    pub fn new(target: usize) -> Self {
        Self { members: BTreeSet::new(), target }
    }

    /// Attempts to add a member, reporting the fill transition.
    pub fn insert(&mut self, member: ProcessorId) -> QuorumInsert {
        if self.members.contains(&member) {
            return QuorumInsert::Duplicate;
        }
        if self.members.len() >= self.target {
            return QuorumInsert::AlreadyFull;
        }
        self.members.insert(member);
        if self.members.len() == self.target { QuorumInsert::JustFilled } else { QuorumInsert::Added }
    }

    /// Checks whether the set reached its target.
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.target
    }

    /// Checks membership.
    pub fn contains(&self, member: &ProcessorId) -> bool {
        self.members.contains(member)
    }

    /// The number of members collected so far.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Checks whether no member was collected yet.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The members collected so far, in ascending order.
    pub fn members(&self) -> &BTreeSet<ProcessorId> {
        &self.members
    }
}
