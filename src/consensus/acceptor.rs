use crate::commitlog::Slot;
use crate::consensus::Ballot;
use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedValue {
    pub ballot: Ballot,
    pub payload: Bytes,
}

/// Acceptor is the voting half of a replica: the highest ballot it promised and the value it
/// last accepted per slot.
pub(crate) struct Acceptor {
    promised: Ballot,
    accepted: BTreeMap<Slot, AcceptedValue>,
}

impl Acceptor {
    pub(crate) fn new(initial: Ballot) -> Self {
        Acceptor {
            promised: initial,
            accepted: BTreeMap::new(),
        }
    }

    pub(crate) fn restore(promised: Ballot, accepted: Vec<(Slot, AcceptedValue)>) -> Self {
        Acceptor {
            promised,
            accepted: accepted.into_iter().collect(),
        }
    }

    pub(crate) fn promised(&self) -> Ballot {
        self.promised
    }

    /// Promise `ballot` if it is at least as high as anything promised so far, and report the
    /// values accepted at or above `first_undecided`. On rejection, returns the ballot that
    /// outranks it.
    pub(crate) fn handle_prepare(
        &mut self,
        ballot: Ballot,
        first_undecided: Slot,
    ) -> Result<Vec<(Slot, AcceptedValue)>, Ballot> {
        if ballot < self.promised {
            return Err(self.promised);
        }
        self.promised = ballot;

        Ok(self
            .accepted
            .range(first_undecided..)
            .map(|(slot, value)| (*slot, value.clone()))
            .collect())
    }

    pub(crate) fn handle_accept(&mut self, ballot: Ballot, slot: Slot, payload: Bytes) -> Result<(), Ballot> {
        if ballot < self.promised {
            return Err(self.promised);
        }
        self.promised = ballot;
        self.accepted.insert(slot, AcceptedValue { ballot, payload });

        Ok(())
    }

    /// Forget votes for slots every member has executed.
    pub(crate) fn forget_below(&mut self, slot: Slot) {
        self.accepted = self.accepted.split_off(&slot);
    }

    pub(crate) fn accepted(&self) -> Vec<(Slot, AcceptedValue)> {
        self.accepted.iter().map(|(s, v)| (*s, v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeId;

    #[test]
    fn rejects_lower_ballots() {
        let b1 = Ballot::new(1, NodeId(1));
        let b2 = Ballot::new(2, NodeId(1));
        let mut acceptor = Acceptor::new(Ballot::new(0, NodeId(1)));

        assert!(acceptor.handle_accept(b1, Slot::new(0), Bytes::from_static(b"a")).is_ok());
        assert_eq!(acceptor.handle_prepare(b2, Slot::new(0)).unwrap().len(), 1);
        assert_eq!(
            acceptor.handle_accept(b1, Slot::new(1), Bytes::from_static(b"b")),
            Err(b2)
        );
        assert_eq!(acceptor.handle_prepare(b1, Slot::new(0)), Err(b2));
        assert_eq!(acceptor.promised(), b2);
    }

    #[test]
    fn prepare_reports_only_undecided_votes() {
        let b = Ballot::new(0, NodeId(1));
        let mut acceptor = Acceptor::new(b);
        for s in 0..4 {
            acceptor.handle_accept(b, Slot::new(s), Bytes::from(vec![s as u8])).unwrap();
        }

        let votes = acceptor.handle_prepare(b.next_for(NodeId(2)), Slot::new(2)).unwrap();
        let slots: Vec<u64> = votes.iter().map(|(s, _)| s.as_u64()).collect();
        assert_eq!(slots, vec![2, 3]);

        acceptor.forget_below(Slot::new(3));
        assert_eq!(acceptor.accepted().len(), 1);
    }
}
