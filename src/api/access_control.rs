use crate::record::NodeId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Create,
    Remove,
    Reconfigure,
}

#[derive(Clone, Debug)]
pub struct AccessRequest<'a> {
    pub kind: AccessKind,
    pub name: &'a str,
    pub field: Option<&'a str>,
    pub principal: Option<&'a str>,
    /// The node the request arrived at.
    pub node: NodeId,
}

/// AccessControl vets a request's writer or reader before it reaches the state machine. Whatever
/// passes is trusted from then on; signature schemes live behind this trait.
#[async_trait::async_trait]
pub trait AccessControl: Send + Sync + 'static {
    async fn authorize(&self, request: AccessRequest<'_>) -> bool;
}

/// Lets everything through.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl AccessControl for AllowAll {
    async fn authorize(&self, _request: AccessRequest<'_>) -> bool {
        true
    }
}
