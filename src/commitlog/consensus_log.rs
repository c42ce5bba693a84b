use crate::commitlog::Slot;
use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DecisionOutcome {
    /// Decision stored.
    New,
    /// Already held a decision for this slot.
    Duplicate,
    /// Slot was already executed (or collected).
    Stale,
    /// Slot is too far ahead of execution; it will come back through sync.
    WindowFull,
}

/// The portable part of a log: everything needed to rebuild it after a pause.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogSnapshot {
    pub(crate) next_to_execute: Slot,
    pub(crate) gc_floor: Slot,
    pub(crate) decided: Vec<(Slot, Bytes)>,
}

/// ConsensusLog holds the decided slots of one group instance on this replica.
///
/// Decisions may arrive in any order. They are executed strictly in slot order, and at most
/// `window` slots past the execution frontier are buffered. Executed slots stay around for
/// retransmission to lagging peers until garbage collected.
pub(crate) struct ConsensusLog {
    decided: BTreeMap<Slot, Bytes>,
    max_decided: Option<Slot>,
    next_to_execute: Slot,
    gc_floor: Slot,
    window: u64,
}

impl ConsensusLog {
    pub(crate) fn new(window: u64) -> Self {
        assert!(window > 0, "decided window must be positive");
        ConsensusLog {
            decided: BTreeMap::new(),
            max_decided: None,
            next_to_execute: Slot::start_slot(),
            gc_floor: Slot::start_slot(),
            window,
        }
    }

    pub(crate) fn restore(snapshot: LogSnapshot, window: u64) -> Self {
        let mut log = ConsensusLog::new(window);
        log.next_to_execute = snapshot.next_to_execute;
        log.gc_floor = snapshot.gc_floor;
        log.max_decided = snapshot.next_to_execute.checked_minus(1);
        for (slot, payload) in snapshot.decided {
            if slot >= log.gc_floor {
                log.insert(slot, payload);
            }
        }
        log
    }

    pub(crate) fn checkpoint(&self) -> LogSnapshot {
        LogSnapshot {
            next_to_execute: self.next_to_execute,
            gc_floor: self.gc_floor,
            decided: self.decided.iter().map(|(s, p)| (*s, p.clone())).collect(),
        }
    }

    pub(crate) fn record_decision(&mut self, slot: Slot, payload: Bytes) -> DecisionOutcome {
        if slot < self.next_to_execute {
            return DecisionOutcome::Stale;
        }
        if self.decided.contains_key(&slot) {
            return DecisionOutcome::Duplicate;
        }
        if slot.distance_from(self.next_to_execute) >= self.window {
            return DecisionOutcome::WindowFull;
        }

        self.insert(slot, payload);
        DecisionOutcome::New
    }

    /// Appends `payload` iff `slot` is the slot right after the highest decided one.
    pub(crate) fn append_if_next(&mut self, slot: Slot, payload: Bytes) -> bool {
        if slot != self.next_slot() {
            return false;
        }
        self.record_decision(slot, payload) == DecisionOutcome::New
    }

    /// The first slot after every decision held.
    pub(crate) fn next_slot(&self) -> Slot {
        match self.max_decided {
            Some(max) => max.next(),
            None => self.next_to_execute,
        }
    }

    /// Undecided slots below `max_decided`, ascending.
    pub(crate) fn missing_slots(&self) -> Vec<Slot> {
        let max = match self.max_decided {
            Some(max) => max,
            None => return Vec::new(),
        };
        let mut missing = Vec::new();
        let mut cursor = self.next_to_execute;
        for slot in self.decided.range(self.next_to_execute..=max).map(|(s, _)| *s) {
            while cursor < slot {
                missing.push(cursor);
                cursor = cursor.next();
            }
            cursor = slot.next();
        }
        missing
    }

    pub(crate) fn next_executable(&self) -> Option<(Slot, Bytes)> {
        self.decided
            .get(&self.next_to_execute)
            .map(|payload| (self.next_to_execute, payload.clone()))
    }

    pub(crate) fn mark_executed(&mut self, slot: Slot) {
        assert_eq!(
            slot, self.next_to_execute,
            "Executed slot out of order. This is a bug."
        );
        assert!(self.decided.contains_key(&slot), "Executed an undecided slot. This is a bug.");
        self.next_to_execute = slot.next();
    }

    /// Drops decided slots below `below`, never past the execution frontier. Returns the number
    /// of slots dropped.
    pub(crate) fn garbage_collect(&mut self, below: Slot) -> usize {
        let floor = below.min(self.next_to_execute);
        if floor <= self.gc_floor {
            return 0;
        }
        let retained = self.decided.split_off(&floor);
        let dropped = self.decided.len();
        self.decided = retained;
        self.gc_floor = floor;
        dropped
    }

    /// Jumps execution to `next_to_execute` after a checkpoint transfer was installed. Everything
    /// below it is dropped as if executed and collected.
    pub(crate) fn install_transfer(&mut self, next_to_execute: Slot) {
        if next_to_execute <= self.next_to_execute {
            return;
        }
        self.decided = self.decided.split_off(&next_to_execute);
        self.next_to_execute = next_to_execute;
        self.gc_floor = next_to_execute;
        let executed = next_to_execute.checked_minus(1);
        if self.max_decided < executed {
            self.max_decided = executed;
        }
    }

    pub(crate) fn get(&self, slot: Slot) -> Option<&Bytes> {
        self.decided.get(&slot)
    }

    /// Held decisions in `(after, upto]`, or from the first held slot when `after` is `None`.
    pub(crate) fn decided_after(&self, after: Option<Slot>, upto: Slot) -> Vec<(Slot, Bytes)> {
        let from = after.map(|s| s.next()).unwrap_or_else(Slot::start_slot);
        if from > upto {
            return Vec::new();
        }
        self.decided
            .range(from..=upto)
            .map(|(s, p)| (*s, p.clone()))
            .collect()
    }

    /// The unbroken run of decisions starting at `from`.
    pub(crate) fn contiguous_from(&self, from: Slot) -> Vec<(Slot, Bytes)> {
        let mut run = Vec::new();
        let mut cursor = from;
        while let Some(payload) = self.decided.get(&cursor) {
            run.push((cursor, payload.clone()));
            cursor = cursor.next();
        }
        run
    }

    pub(crate) fn max_decided(&self) -> Option<Slot> {
        self.max_decided
    }

    pub(crate) fn executed_slot(&self) -> Option<Slot> {
        self.next_to_execute.checked_minus(1)
    }

    pub(crate) fn next_to_execute(&self) -> Slot {
        self.next_to_execute
    }

    pub(crate) fn gc_floor(&self) -> Slot {
        self.gc_floor
    }

    pub(crate) fn unexecuted_len(&self) -> usize {
        self.decided.range(self.next_to_execute..).count()
    }

    fn insert(&mut self, slot: Slot, payload: Bytes) {
        self.decided.insert(slot, payload);
        if self.max_decided.map_or(true, |max| slot > max) {
            self.max_decided = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u64) -> Bytes {
        Bytes::from(format!("req-{}", n))
    }

    fn log_with(slots: &[u64]) -> ConsensusLog {
        let mut log = ConsensusLog::new(64);
        for s in slots {
            assert_eq!(log.record_decision(Slot::new(*s), payload(*s)), DecisionOutcome::New);
        }
        log
    }

    fn slots(raw: &[u64]) -> Vec<Slot> {
        raw.iter().map(|s| Slot::new(*s)).collect()
    }

    #[test]
    fn detects_gaps_below_max() {
        let log = log_with(&[0, 1, 3, 6]);
        assert_eq!(log.max_decided(), Some(Slot::new(6)));
        assert_eq!(log.missing_slots(), slots(&[2, 4, 5]));
        assert!(ConsensusLog::new(4).missing_slots().is_empty());
    }

    #[test]
    fn executes_strictly_in_order() {
        let mut log = log_with(&[1, 0, 3]);
        assert_eq!(log.executed_slot(), None);

        let (slot, data) = log.next_executable().unwrap();
        assert_eq!((slot, data), (Slot::new(0), payload(0)));
        log.mark_executed(slot);
        let (slot, _) = log.next_executable().unwrap();
        log.mark_executed(slot);

        assert_eq!(log.next_executable(), None);
        assert_eq!(log.executed_slot(), Some(Slot::new(1)));
        assert_eq!(log.missing_slots(), slots(&[2]));
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn executing_ahead_panics() {
        let mut log = log_with(&[0, 1]);
        log.mark_executed(Slot::new(1));
    }

    #[test]
    fn rereceiving_is_a_noop() {
        let mut log = log_with(&[0]);
        assert_eq!(log.record_decision(Slot::new(0), payload(9)), DecisionOutcome::Duplicate);
        assert_eq!(log.get(Slot::new(0)), Some(&payload(0)));

        log.mark_executed(Slot::new(0));
        assert_eq!(log.record_decision(Slot::new(0), payload(0)), DecisionOutcome::Stale);
    }

    #[test]
    fn window_bounds_unexecuted_decisions() {
        let mut log = ConsensusLog::new(4);
        assert_eq!(log.record_decision(Slot::new(3), payload(3)), DecisionOutcome::New);
        assert_eq!(log.record_decision(Slot::new(4), payload(4)), DecisionOutcome::WindowFull);
        assert_eq!(log.unexecuted_len(), 1);
    }

    #[test]
    fn append_only_at_frontier() {
        let mut log = ConsensusLog::new(8);
        assert!(!log.append_if_next(Slot::new(1), payload(1)));
        assert!(log.append_if_next(Slot::new(0), payload(0)));
        assert!(log.append_if_next(Slot::new(1), payload(1)));
        assert!(!log.append_if_next(Slot::new(1), payload(1)));
        assert_eq!(log.next_slot(), Slot::new(2));
    }

    #[test]
    fn gc_never_passes_execution() {
        let mut log = log_with(&[0, 1, 2, 3]);
        log.mark_executed(Slot::new(0));
        log.mark_executed(Slot::new(1));

        assert_eq!(log.garbage_collect(Slot::new(10)), 2);
        assert_eq!(log.gc_floor(), Slot::new(2));
        assert_eq!(log.get(Slot::new(1)), None);
        assert_eq!(log.decided_after(None, Slot::new(3)).len(), 2);
        assert_eq!(log.garbage_collect(Slot::new(1)), 0);
    }

    #[test]
    fn snapshot_restores_frontier_and_pending_decisions() {
        let mut log = log_with(&[0, 1, 4]);
        log.mark_executed(Slot::new(0));

        let restored = ConsensusLog::restore(log.checkpoint(), 64);
        assert_eq!(restored.next_to_execute(), Slot::new(1));
        assert_eq!(restored.max_decided(), Some(Slot::new(4)));
        assert_eq!(restored.missing_slots(), slots(&[2, 3]));
    }

    #[test]
    fn transfer_jumps_execution() {
        let mut log = log_with(&[0, 7, 8]);
        log.install_transfer(Slot::new(7));

        assert_eq!(log.executed_slot(), Some(Slot::new(6)));
        assert_eq!(log.get(Slot::new(0)), None);
        assert!(log.missing_slots().is_empty());
        assert_eq!(log.contiguous_from(Slot::new(7)).len(), 2);
        assert_eq!(log.next_executable().map(|(s, _)| s), Some(Slot::new(7)));
    }
}
