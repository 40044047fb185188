use anyhow::Result;
use candle_core::Device;

pub trait Dataset {
    type Batch;
    type NodeSelector: Sized;
    fn all_nodes(&self) -> Result<Self::NodeSelector>;
    fn induced_subgraph(&self, nodes: Self::NodeSelector, device: &Device) -> Result<Self::Batch>;
}

pub trait RandomSplit<Ratio> {
    type Output;
    fn random_split(&self, ratio: Ratio) -> Result<Self::Output>;
}

/// Which directed edges an undirected interaction record produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgeDirection {
    Forward,
    Reverse,
    #[default]
    Both,
}
impl EdgeDirection {
    pub fn has_forward_edges(self) -> bool {
        matches!(self, Self::Forward | Self::Both)
    }
    pub fn has_reverse_edges(self) -> bool {
        matches!(self, Self::Reverse | Self::Both)
    }
}
