use crate::record::NodeId;
use std::collections::BTreeSet;
use std::fmt;

/// Ballot orders coordinators. Ties on `number` are broken by node id, so two nodes can never
/// run the same ballot.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    number: u64,
    coordinator: NodeId,
}

impl Ballot {
    pub fn new(number: u64, coordinator: NodeId) -> Self {
        Ballot { number, coordinator }
    }

    /// Ballot 0 belongs to the smallest member and counts as prepared by everyone, so a fresh
    /// group can decide its first slot without a prepare round.
    pub fn initial(members: &BTreeSet<NodeId>) -> Option<Self> {
        members.iter().next().map(|first| Ballot::new(0, *first))
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn coordinator(&self) -> NodeId {
        self.coordinator
    }

    /// The smallest ballot owned by `node` that beats this one.
    pub fn next_for(&self, node: NodeId) -> Ballot {
        Ballot::new(self.number + 1, node)
    }
}

impl fmt::Debug for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.number, self.coordinator.as_u32())
    }
}
