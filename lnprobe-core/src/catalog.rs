use crate::error::ProbeError;
use crate::rpc::{LightningRpc, NodeEntry};
use log::info;

/// Snapshot of the gossip graph's nodes, plus our own identity.
#[derive(Clone, Debug)]
pub struct NodeCatalog {
    self_id: String,
    nodes: Vec<NodeEntry>,
}

impl NodeCatalog {
    pub fn new(self_id: impl Into<String>, nodes: Vec<NodeEntry>) -> Self {
        Self {
            self_id: self_id.into(),
            nodes,
        }
    }

    pub async fn load(rpc: &dyn LightningRpc) -> Result<Self, ProbeError> {
        let self_id = rpc.getinfo().await?.id;
        info!("This node: {self_id}");

        let nodes = rpc.listnodes().await?.nodes;
        info!("Num nodes: {}", nodes.len());

        Ok(Self::new(self_id, nodes))
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn is_self(&self, node_id: &str) -> bool {
        node_id == self.self_id
    }

    /// Node ids worth probing, in gossip order.
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .map(|node| node.nodeid.as_str())
            .filter(move |id| !self.is_self(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
