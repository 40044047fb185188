use anyhow::Result;
use candle_core::Device;

use super::traits::Dataset;

/// Yields the whole graph as a single batch.
pub struct FullBatchLoader<'a, T> {
    done: bool,
    device: &'a Device,
    dataset: &'a T,
}
impl<'a, T: Dataset + 'a> FullBatchLoader<'a, T> {
    pub fn new(dataset: &'a T, device: &'a Device) -> Self {
        Self {
            done: false,
            device,
            dataset,
        }
    }
}

impl<'a, T: Dataset> Iterator for FullBatchLoader<'a, T> {
    type Item = Result<T::Batch>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(
            self.dataset
                .all_nodes()
                .and_then(|nodes| self.dataset.induced_subgraph(nodes, self.device)),
        )
    }
}
