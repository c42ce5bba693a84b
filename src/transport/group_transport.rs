use crate::consensus::GroupMessage;
use crate::record::NodeId;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0} is unreachable")]
    Unreachable(NodeId),
}

/// GroupTransport moves group messages between nodes. Delivery is at-least-once and unordered;
/// the consensus core orders everything by slot and tolerates loss and duplicates.
#[async_trait::async_trait]
pub trait GroupTransport: Send + Sync + 'static {
    async fn send_to(&self, member: NodeId, message: GroupMessage) -> Result<(), TransportError>;

    /// Sends `message` to every member in `members`. Unreachable members are skipped; the
    /// result reports the last failure.
    async fn broadcast(&self, members: &BTreeSet<NodeId>, message: GroupMessage) -> Result<(), TransportError> {
        let mut result = Ok(());
        for member in members {
            if let Err(e) = self.send_to(*member, message.clone()).await {
                result = Err(e);
            }
        }
        result
    }
}
