use crate::instance::InstanceClient;
use crate::record::Epoch;
use crate::record::GroupId;
use crate::record::NodeId;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Lifecycle stage of a group's instance on this node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Active,
    /// Idle for a deactivation period. Paused on the next sweep unless traffic arrives.
    Hibernating,
    /// Checkpointed and unloaded. The next request reloads it.
    Paused,
    /// Recently removed. Recreating the group is refused until the morgue delay elapses.
    Morgue,
}

pub(super) enum Entry {
    /// Being built, resumed or paused. Lookups wait for it to settle.
    Creating,
    Active(ActiveEntry),
    Paused(PausedEntry),
}

pub(super) struct ActiveEntry {
    pub(super) client: InstanceClient,
    pub(super) cancel: CancellationToken,
    pub(super) members: BTreeSet<NodeId>,
    pub(super) last_activity: Instant,
    pub(super) hibernating: bool,
}

impl ActiveEntry {
    pub(super) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.hibernating = false;
    }
}

pub(super) struct PausedEntry {
    pub(super) members: BTreeSet<NodeId>,
    /// Held here when persistent logging is disabled, otherwise in the record store.
    pub(super) checkpoint: Option<Bytes>,
}

/// InstanceTable is the node's map of group instances plus the morgue. It only bookkeeps; the
/// manager owns every transition's I/O.
#[derive(Default)]
pub(super) struct InstanceTable {
    entries: HashMap<GroupId, Entry>,
    epochs_by_name: HashMap<String, BTreeSet<Epoch>>,
    morgue: HashMap<String, BTreeMap<Epoch, Instant>>,
    live: usize,
}

impl InstanceTable {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn get_mut(&mut self, group: &GroupId) -> Option<&mut Entry> {
        self.entries.get_mut(group)
    }

    pub(super) fn is_creating(&self, group: &GroupId) -> bool {
        matches!(self.entries.get(group), Some(Entry::Creating))
    }

    pub(super) fn insert(&mut self, group: GroupId, entry: Entry) -> Option<Entry> {
        if let Entry::Active(_) = entry {
            self.live += 1;
        }
        self.epochs_by_name
            .entry(group.name().to_string())
            .or_default()
            .insert(group.epoch());

        let replaced = self.entries.insert(group, entry);
        if let Some(Entry::Active(_)) = replaced {
            self.live -= 1;
        }
        replaced
    }

    pub(super) fn remove(&mut self, group: &GroupId) -> Option<Entry> {
        let removed = self.entries.remove(group)?;
        if let Entry::Active(_) = removed {
            self.live -= 1;
        }
        if let Some(epochs) = self.epochs_by_name.get_mut(group.name()) {
            epochs.remove(&group.epoch());
            if epochs.is_empty() {
                self.epochs_by_name.remove(group.name());
            }
        }
        Some(removed)
    }

    /// Entries holding ACTIVE or HIBERNATING instances.
    pub(super) fn live_count(&self) -> usize {
        self.live
    }

    pub(super) fn highest_epoch(&self, name: &str) -> Option<Epoch> {
        self.epochs_by_name.get(name)?.iter().next_back().copied()
    }

    /// Epochs of the same name older than `group`, split into the ones still running (or being
    /// built) and the paused ones.
    pub(super) fn older_epochs(&self, group: &GroupId) -> (Vec<GroupId>, Vec<GroupId>) {
        let mut running = Vec::new();
        let mut paused = Vec::new();
        let epochs = match self.epochs_by_name.get(group.name()) {
            Some(epochs) => epochs,
            None => return (running, paused),
        };

        for epoch in epochs.range(..group.epoch()) {
            let older = GroupId::new(group.name(), *epoch);
            match self.entries.get(&older) {
                Some(Entry::Paused(_)) => paused.push(older),
                Some(_) => running.push(older),
                None => {}
            }
        }
        (running, paused)
    }

    /// Idle ACTIVE entries. Each is returned with whether it was already hibernating.
    pub(super) fn idle(&self, now: Instant, period: Duration) -> Vec<(GroupId, bool)> {
        self.entries
            .iter()
            .filter_map(|(group, entry)| match entry {
                Entry::Active(active) if now.saturating_duration_since(active.last_activity) >= period => {
                    Some((group.clone(), active.hibernating))
                }
                _ => None,
            })
            .collect()
    }

    pub(super) fn least_recently_active(&self, except: &GroupId) -> Option<GroupId> {
        self.entries
            .iter()
            .filter_map(|(group, entry)| match entry {
                Entry::Active(active) if group != except => Some((active.last_activity, group)),
                _ => None,
            })
            .min()
            .map(|(_, group)| group.clone())
    }

    pub(super) fn bury(&mut self, group: GroupId, now: Instant) {
        self.morgue
            .entry(group.name().to_string())
            .or_default()
            .insert(group.epoch(), now);
    }

    pub(super) fn exhume(&mut self, group: &GroupId) {
        if let Some(epochs) = self.morgue.get_mut(group.name()) {
            epochs.remove(&group.epoch());
            if epochs.is_empty() {
                self.morgue.remove(group.name());
            }
        }
    }

    /// A group is quarantined while the morgue holds the same name at its epoch or a later one.
    /// Recreating an older epoch of a removed group is as wrong as recreating the group itself.
    pub(super) fn is_quarantined(&self, group: &GroupId, now: Instant, delay: Duration) -> bool {
        self.morgue.get(group.name()).map_or(false, |epochs| {
            epochs
                .range(group.epoch()..)
                .any(|(_, buried_at)| now.saturating_duration_since(*buried_at) < delay)
        })
    }

    pub(super) fn purge_morgue(&mut self, now: Instant, delay: Duration) -> usize {
        let mut purged = 0;
        self.morgue.retain(|_, epochs| {
            let before = epochs.len();
            epochs.retain(|_, buried_at| now.saturating_duration_since(*buried_at) < delay);
            purged += before - epochs.len();
            !epochs.is_empty()
        });
        purged
    }

    pub(super) fn state(&self, group: &GroupId, now: Instant, morgue_delay: Duration) -> Option<InstanceState> {
        let state = match self.entries.get(group) {
            Some(Entry::Creating) => InstanceState::Creating,
            Some(Entry::Active(active)) if active.hibernating => InstanceState::Hibernating,
            Some(Entry::Active(_)) => InstanceState::Active,
            Some(Entry::Paused(_)) => InstanceState::Paused,
            None => {
                let buried = self
                    .morgue
                    .get(group.name())
                    .and_then(|epochs| epochs.get(&group.epoch()))
                    .map_or(false, |buried_at| now.saturating_duration_since(*buried_at) < morgue_delay);
                if !buried {
                    return None;
                }
                InstanceState::Morgue
            }
        };
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, epoch: u32) -> GroupId {
        GroupId::new(name, Epoch::new(epoch))
    }

    fn paused() -> Entry {
        Entry::Paused(PausedEntry {
            members: BTreeSet::new(),
            checkpoint: None,
        })
    }

    #[test]
    fn morgue_blocks_same_and_older_epochs_until_delay() {
        let mut table = InstanceTable::new();
        let start = Instant::now();
        let delay = Duration::from_secs(30);

        table.bury(group("alice", 2), start);

        assert!(table.is_quarantined(&group("alice", 2), start, delay));
        assert!(table.is_quarantined(&group("alice", 0), start + Duration::from_secs(29), delay));
        assert!(!table.is_quarantined(&group("alice", 3), start, delay));
        assert!(!table.is_quarantined(&group("bob", 2), start, delay));
        assert_eq!(table.state(&group("alice", 2), start, delay), Some(InstanceState::Morgue));

        let later = start + delay;
        assert!(!table.is_quarantined(&group("alice", 2), later, delay));
        assert_eq!(table.purge_morgue(later, delay), 1);
        assert_eq!(table.state(&group("alice", 2), later, delay), None);
    }

    #[test]
    fn tracks_epochs_per_name() {
        let mut table = InstanceTable::new();
        table.insert(group("alice", 0), paused());
        table.insert(group("alice", 1), Entry::Creating);
        table.insert(group("bob", 4), Entry::Creating);

        assert_eq!(table.highest_epoch("alice"), Some(Epoch::new(1)));
        let (running, paused) = table.older_epochs(&group("alice", 2));
        assert_eq!(running, vec![group("alice", 1)]);
        assert_eq!(paused, vec![group("alice", 0)]);

        table.remove(&group("alice", 1));
        assert_eq!(table.highest_epoch("alice"), Some(Epoch::new(0)));
        table.remove(&group("alice", 0));
        assert_eq!(table.highest_epoch("alice"), None);
        assert_eq!(table.live_count(), 0);
    }
}
