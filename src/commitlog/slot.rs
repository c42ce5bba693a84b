use std::fmt;

/// Slot is a position in a group's replicated log. Slots start at 0; each holds at most one
/// decided request.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Slot(u64);

impl Slot {
    pub fn new(slot: u64) -> Self {
        Slot(slot)
    }

    pub fn start_slot() -> Self {
        Slot(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Slot {
        Slot(self.0 + 1)
    }

    pub fn plus(&self, delta: u64) -> Slot {
        Slot(self.0 + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Slot> {
        self.0.checked_sub(delta).map(Slot)
    }

    /// Number of slots from `earlier` up to self, zero if `earlier` is not earlier.
    pub fn distance_from(&self, earlier: Slot) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
