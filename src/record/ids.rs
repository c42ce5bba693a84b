use std::fmt;

/// NodeId identifies a replica host. Ordering matters: the smallest member of a group owns the
/// initial ballot.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Epoch versions a name's replica group. It increments by one on every reconfiguration.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u32);

impl Epoch {
    pub fn new(epoch: u32) -> Self {
        Epoch(epoch)
    }

    pub fn initial() -> Self {
        Epoch(0)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GroupId names one consensus instance: a record name at a specific epoch. Instances of
/// different epochs of the same name never share state.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupId {
    name: String,
    epoch: Epoch,
}

impl GroupId {
    pub fn new(name: impl Into<String>, epoch: Epoch) -> Self {
        GroupId {
            name: name.into(),
            epoch,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn next_epoch(&self) -> GroupId {
        GroupId::new(self.name.clone(), self.epoch.next())
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.epoch.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
