use crate::consensus::GroupMessage;
use crate::record::NodeId;
use crate::transport::GroupTransport;
use crate::transport::TransportError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// LocalNetwork connects nodes living in the same process. Each node gets an unbounded inbox.
/// Nodes can be isolated to simulate partitions: nothing reaches or leaves an isolated node.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Default)]
struct NetworkInner {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<GroupMessage>>,
    isolated: HashSet<NodeId>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `node`, replacing any previous attachment. Messages for it arrive on the
    /// returned receiver.
    pub fn join(&self, node: NodeId) -> (LocalTransport, mpsc::UnboundedReceiver<GroupMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().inboxes.insert(node, tx);

        let transport = LocalTransport {
            me: node,
            network: self.clone(),
        };
        (transport, rx)
    }

    pub fn leave(&self, node: NodeId) {
        self.inner().inboxes.remove(&node);
    }

    pub fn isolate(&self, node: NodeId) {
        self.inner().isolated.insert(node);
    }

    pub fn heal(&self, node: NodeId) {
        self.inner().isolated.remove(&node);
    }

    fn deliver(&self, from: NodeId, to: NodeId, message: GroupMessage) -> Result<(), TransportError> {
        let inner = self.inner();
        if inner.isolated.contains(&from) || inner.isolated.contains(&to) {
            return Err(TransportError::Unreachable(to));
        }
        let inbox = inner.inboxes.get(&to).ok_or(TransportError::Unreachable(to))?;
        inbox.send(message).map_err(|_| TransportError::Unreachable(to))
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, NetworkInner> {
        self.inner.lock().expect("LocalNetwork mutex guard poison")
    }
}

#[derive(Clone)]
pub struct LocalTransport {
    me: NodeId,
    network: LocalNetwork,
}

#[async_trait::async_trait]
impl GroupTransport for LocalTransport {
    async fn send_to(&self, member: NodeId, message: GroupMessage) -> Result<(), TransportError> {
        self.network.deliver(self.me, member, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::PeerMessage;
    use crate::record::Epoch;
    use crate::record::GroupId;

    fn message(from: u32) -> GroupMessage {
        GroupMessage {
            group: GroupId::new("alice", Epoch::initial()),
            from: NodeId(from),
            body: PeerMessage::CheckpointRequest,
        }
    }

    #[tokio::test]
    async fn isolated_nodes_neither_send_nor_receive() {
        let network = LocalNetwork::new();
        let (t1, mut rx1) = network.join(NodeId(1));
        let (t2, mut rx2) = network.join(NodeId(2));

        t1.send_to(NodeId(2), message(1)).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap().from, NodeId(1));

        network.isolate(NodeId(2));
        assert!(t1.send_to(NodeId(2), message(1)).await.is_err());
        assert!(t2.send_to(NodeId(1), message(2)).await.is_err());

        network.heal(NodeId(2));
        t2.send_to(NodeId(1), message(2)).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().from, NodeId(2));

        assert!(t1.send_to(NodeId(9), message(1)).await.is_err());
    }
}
